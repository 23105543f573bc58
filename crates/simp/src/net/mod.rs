pub mod aggregator;
pub mod codec;
pub mod connection;
pub mod dispatch;
pub mod endpoint;
pub mod protocol;
mod stats;

pub use aggregator::{Outbox, OutgoingAggregator, PendingValue};
pub use codec::{CodecError, SubjectReader};
pub use connection::{Connection, ConnectionError, ConnectionState, Notifier, parse_address};
pub use dispatch::{
    DataMessage, DispatchOutcome, Dispatcher, decode_data_subject, encode_data_subject,
};
pub use protocol::{
    DEFAULT_MAX_SUBJECT_LEN, DEFAULT_PORT, Frame, FrameReader, HEADER_LEN, MessageType,
    PROTOCOL_VERSION, ProtocolError, ProtocolVersion,
};
pub use stats::{NetworkStats, StatsRecorder};
