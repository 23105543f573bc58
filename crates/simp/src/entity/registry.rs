use std::sync::{Arc, RwLock};

use crate::lock;

use super::Entity;

/// The entities synchronized over one connection. Lookups are a linear scan.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: RwLock<Vec<Arc<Entity>>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the entity, replacing one with the same id. Returns the replaced
    /// entity.
    pub fn insert(&self, entity: Arc<Entity>) -> Option<Arc<Entity>> {
        let mut entities = lock::write(&self.entities);
        match entities.iter_mut().find(|e| e.id() == entity.id()) {
            Some(slot) => Some(std::mem::replace(slot, entity)),
            None => {
                entities.push(entity);
                None
            }
        }
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Entity>> {
        let mut entities = lock::write(&self.entities);
        let index = entities.iter().position(|e| e.id() == id)?;
        Some(entities.remove(index))
    }

    pub fn get(&self, id: &str) -> Option<Arc<Entity>> {
        lock::read(&self.entities)
            .iter()
            .find(|e| e.id() == id)
            .cloned()
    }

    pub fn display_name_of(&self, id: &str) -> Option<String> {
        lock::read(&self.entities)
            .iter()
            .find(|e| e.id() == id)
            .map(|e| e.display_name().to_string())
    }

    pub fn snapshot(&self) -> Vec<Arc<Entity>> {
        lock::read(&self.entities).clone()
    }

    pub fn len(&self) -> usize {
        lock::read(&self.entities).len()
    }

    pub fn is_empty(&self) -> bool {
        lock::read(&self.entities).is_empty()
    }

    pub fn reset_initial_data_all(&self) {
        for entity in lock::read(&self.entities).iter() {
            entity.reset_initial_data();
        }
    }
}
