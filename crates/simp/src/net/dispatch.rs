use crate::attribute::{AttributeKey, AttributeValue};
use crate::entity::EntityRegistry;
use crate::event::SyncObserver;

use super::codec::{SubjectReader, write_string};
use super::protocol::ProtocolError;

#[derive(Debug, Clone, PartialEq)]
pub struct DataMessage {
    pub entity_id: String,
    pub display_name: String,
    pub attributes: Vec<(AttributeKey, AttributeValue)>,
}

/// Decodes a whole `DATA` subject. Nothing is returned unless every key and
/// value decodes.
pub fn decode_data_subject(subject: &[u8]) -> Result<DataMessage, ProtocolError> {
    let mut reader = SubjectReader::new(subject);
    let entity_id = reader.read_string()?;
    let display_name = reader.read_string()?;

    let mut attributes = Vec::new();
    while !reader.is_at_end() {
        let token = reader.read_string()?;
        let Some(key) = AttributeKey::from_token(&token) else {
            return Err(ProtocolError::UnknownAttributeKey(token));
        };
        let value = AttributeValue::decode(key.shape(), &mut reader)?;
        attributes.push((key, value));
    }

    Ok(DataMessage {
        entity_id,
        display_name,
        attributes,
    })
}

/// Encodes the attributes in the order given. Values whose shape does not
/// match their key are skipped.
pub fn encode_data_subject(message: &DataMessage) -> Vec<u8> {
    let mut subject = Vec::new();
    write_string(&mut subject, &message.entity_id);
    write_string(&mut subject, &message.display_name);
    for (key, value) in &message.attributes {
        if key.shape() != value.shape() {
            log::warn!("skipping {} with mismatched {:?} value", key, value.shape());
            continue;
        }
        write_string(&mut subject, key.as_str());
        if key.shape().is_array() {
            subject.extend_from_slice(&super::codec::encode_u32(value.element_count()));
        }
        subject.extend_from_slice(&value.encode());
    }
    subject
}

pub fn decode_removal_subject(subject: &[u8]) -> Result<String, ProtocolError> {
    Ok(SubjectReader::new(subject).read_string()?)
}

/// The peer's software name carried by `CONN`. An empty subject is accepted.
pub fn decode_connection_subject(subject: &[u8]) -> Result<String, ProtocolError> {
    if subject.is_empty() {
        return Ok(String::new());
    }
    Ok(SubjectReader::new(subject).read_string()?)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Applied {
        entity_id: String,
        applied: usize,
        ignored: usize,
    },
    UnknownEntity(String),
}

/// Applies inbound `DATA` to local entities with echo suppression held.
pub struct Dispatcher<'a> {
    entities: &'a EntityRegistry,
    observer: &'a dyn SyncObserver,
}

impl<'a> Dispatcher<'a> {
    pub fn new(entities: &'a EntityRegistry, observer: &'a dyn SyncObserver) -> Self {
        Self { entities, observer }
    }

    pub fn dispatch_data(&self, subject: &[u8]) -> Result<DispatchOutcome, ProtocolError> {
        let message = decode_data_subject(subject)?;
        let Some(entity) = self.entities.get(&message.entity_id) else {
            log::debug!("data for unknown entity {}", message.entity_id);
            return Ok(DispatchOutcome::UnknownEntity(message.entity_id));
        };

        let _guard = entity.suppress_echo();
        let mut applied = 0;
        let mut ignored = 0;
        for (key, value) in &message.attributes {
            if entity.apply_remote(*key, value) {
                applied += 1;
                self.observer
                    .on_remote_update_applied(entity.id(), *key, value);
            } else {
                log::debug!("ignoring inbound {} for {}", key, entity.id());
                ignored += 1;
            }
        }

        Ok(DispatchOutcome::Applied {
            entity_id: message.entity_id,
            applied,
            ignored,
        })
    }
}
