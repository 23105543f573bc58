pub mod attribute;
pub mod config;
pub mod entity;
pub mod event;
mod lock;
pub mod net;
pub mod source;
pub mod units;

pub use attribute::{AttributeGroup, AttributeKey, AttributeShape, AttributeValue, Color};
pub use config::{ConfigError, SyncConfig};
pub use entity::{
    ColormapSettings, Entity, EntityRegistry, EntityState, PositionSource, PropertyFlags,
    SizeScaling, SyncError, VelocitySource,
};
pub use event::{DisconnectReason, EventRecorder, NoopObserver, SyncEvent, SyncObserver};
pub use net::{
    CodecError, Connection, ConnectionError, ConnectionState, DEFAULT_PORT, Frame, FrameReader,
    MessageType, NetworkStats, Notifier, PROTOCOL_VERSION, ProtocolError, ProtocolVersion,
};
pub use source::{
    AttributeNotFound, AttributeStore, CartesianColumns, ColormapSampler, CoordinateFrame,
    CoordinateTransform, DataSources, TransformError,
};
pub use units::{DistanceUnit, TimeUnit, UnitError};
