use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::attribute::{AttributeKey, AttributeValue};
use crate::lock;

use super::codec::{self, write_string};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingValue {
    pub bytes: Vec<u8>,
    pub count: u32,
}

/// Keyed deltas waiting for the sender loop. Adding the same key twice before
/// a drain keeps only the second value.
#[derive(Debug, Default)]
pub struct OutgoingAggregator {
    pending: HashMap<String, BTreeMap<AttributeKey, PendingValue>>,
    removals: VecDeque<String>,
}

impl OutgoingAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, entity_id: &str, key: AttributeKey, bytes: Vec<u8>, count: u32) {
        self.pending
            .entry(entity_id.to_string())
            .or_default()
            .insert(key, PendingValue { bytes, count });
    }

    pub fn add_value(&mut self, entity_id: &str, key: AttributeKey, value: &AttributeValue) {
        self.add(entity_id, key, value.encode(), value.element_count());
    }

    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.pending.values().all(BTreeMap::is_empty)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.values().map(BTreeMap::len).sum()
    }

    /// Serializes every entity with pending keys into a `DATA` subject and
    /// clears what was taken. Entities `display_name_of` no longer knows are
    /// dropped.
    pub fn drain_and_build_subjects<F>(&mut self, mut display_name_of: F) -> Vec<(String, Vec<u8>)>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut subjects = Vec::new();
        for (entity_id, values) in self.pending.drain() {
            if values.is_empty() {
                continue;
            }
            let Some(display_name) = display_name_of(&entity_id) else {
                log::warn!(
                    "dropping {} pending keys for unknown entity {}",
                    values.len(),
                    entity_id
                );
                continue;
            };
            let subject = build_data_subject(&entity_id, &display_name, &values);
            subjects.push((entity_id, subject));
        }
        subjects
    }

    /// Queues a `RSGN` for the entity and forgets any data still pending for it.
    pub fn queue_removal(&mut self, entity_id: &str) {
        self.pending.remove(entity_id);
        if !self.removals.iter().any(|queued| queued == entity_id) {
            self.removals.push_back(entity_id.to_string());
        }
    }

    pub fn drain_removals(&mut self) -> Vec<Vec<u8>> {
        self.removals
            .drain(..)
            .map(|entity_id| build_removal_subject(&entity_id))
            .collect()
    }

    pub fn discard(&mut self, entity_id: &str) {
        self.pending.remove(entity_id);
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.removals.clear();
    }
}

pub fn build_data_subject(
    entity_id: &str,
    display_name: &str,
    values: &BTreeMap<AttributeKey, PendingValue>,
) -> Vec<u8> {
    let body_len: usize = values
        .iter()
        .map(|(key, value)| key.as_str().len() + 5 + value.bytes.len())
        .sum();
    let mut subject = Vec::with_capacity(entity_id.len() + display_name.len() + 2 + body_len);
    write_string(&mut subject, entity_id);
    write_string(&mut subject, display_name);
    for (key, value) in values {
        write_string(&mut subject, key.as_str());
        if key.shape().is_array() {
            subject.extend_from_slice(&codec::encode_u32(value.count));
        }
        subject.extend_from_slice(&value.bytes);
    }
    subject
}

pub fn build_removal_subject(entity_id: &str) -> Vec<u8> {
    codec::encode_string(entity_id)
}

/// The aggregator plus the condvar the sender loop sleeps on.
#[derive(Debug, Default)]
pub struct Outbox {
    state: Mutex<OutgoingAggregator>,
    ready: Condvar,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, OutgoingAggregator> {
        lock::lock(&self.state)
    }

    pub fn notify(&self) {
        self.ready.notify_all();
    }

    /// Blocks until there is something to send or `running` is cleared.
    /// `idle` bounds each wait so a missed notification is not fatal.
    pub fn wait_for_work(
        &self,
        running: &AtomicBool,
        idle: Duration,
    ) -> Option<MutexGuard<'_, OutgoingAggregator>> {
        let mut guard = self.lock();
        loop {
            if !running.load(Ordering::Acquire) {
                return None;
            }
            if !guard.is_empty() {
                return Some(guard);
            }
            guard = match self.ready.wait_timeout(guard, idle) {
                Ok((guard, _)) => guard,
                Err(poisoned) => lock::recover(poisoned).0,
            };
        }
    }
}
