mod recorder;
mod types;

pub use recorder::EventRecorder;
pub use types::{DisconnectReason, SyncEvent};

use crate::attribute::{AttributeKey, AttributeValue};
use crate::net::{ConnectionError, ConnectionState};

/// Callbacks from the connection threads. They run outside every internal
/// lock, so an implementation may call back into the `Connection`.
pub trait SyncObserver: Send + Sync {
    fn on_connection_state_changed(&self, _old: ConnectionState, _new: ConnectionState) {}

    fn on_remote_update_applied(
        &self,
        _entity_id: &str,
        _key: AttributeKey,
        _value: &AttributeValue,
    ) {
    }

    fn on_connection_error(&self, _err: &ConnectionError) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl SyncObserver for NoopObserver {}
