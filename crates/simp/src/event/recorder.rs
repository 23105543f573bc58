use std::collections::VecDeque;
use std::sync::Mutex;

use crate::attribute::{AttributeKey, AttributeValue};
use crate::lock;
use crate::net::{ConnectionError, ConnectionState};

use super::SyncObserver;
use super::types::SyncEvent;

const DEFAULT_CAPACITY: usize = 1024;

/// Observer that queues every callback for later inspection. The oldest
/// event is evicted once `capacity` is reached.
#[derive(Debug)]
pub struct EventRecorder {
    events: Mutex<VecDeque<SyncEvent>>,
    capacity: usize,
}

impl Default for EventRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventRecorder {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
            capacity: capacity.max(1),
        }
    }

    fn push(&self, event: SyncEvent) {
        let mut events = lock::lock(&self.events);
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    pub fn drain(&self) -> Vec<SyncEvent> {
        lock::lock(&self.events).drain(..).collect()
    }

    pub fn len(&self) -> usize {
        lock::lock(&self.events).len()
    }

    pub fn is_empty(&self) -> bool {
        lock::lock(&self.events).is_empty()
    }
}

impl SyncObserver for EventRecorder {
    fn on_connection_state_changed(&self, old: ConnectionState, new: ConnectionState) {
        self.push(SyncEvent::StateChanged { old, new });
    }

    fn on_remote_update_applied(
        &self,
        entity_id: &str,
        key: AttributeKey,
        value: &AttributeValue,
    ) {
        self.push(SyncEvent::RemoteUpdate {
            entity_id: entity_id.to_string(),
            key,
            value: value.clone(),
        });
    }

    fn on_connection_error(&self, err: &ConnectionError) {
        self.push(SyncEvent::Error {
            message: err.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest() {
        let recorder = EventRecorder::new(2);
        for alpha in [0.1, 0.2, 0.3] {
            let value = AttributeValue::Float(alpha);
            recorder.on_remote_update_applied("e1", AttributeKey::Alpha, &value);
        }
        let events = recorder.drain();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            SyncEvent::RemoteUpdate { value: AttributeValue::Float(v), .. } if *v == 0.2
        ));
        assert!(recorder.is_empty());
    }

    #[test]
    fn test_records_state_changes_in_order() {
        let recorder = EventRecorder::default();
        let disconnected = ConnectionState::Disconnected;
        let connecting = ConnectionState::Connecting;
        recorder.on_connection_state_changed(disconnected, connecting);
        recorder.on_connection_state_changed(connecting, disconnected);
        assert_eq!(
            recorder.drain(),
            vec![
                SyncEvent::StateChanged {
                    old: ConnectionState::Disconnected,
                    new: ConnectionState::Connecting
                },
                SyncEvent::StateChanged {
                    old: ConnectionState::Connecting,
                    new: ConnectionState::Disconnected
                },
            ]
        );
    }
}
