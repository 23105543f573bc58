mod registry;
mod state;
mod sync;

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::attribute::{AttributeKey, AttributeValue};
use crate::lock;

pub use registry::EntityRegistry;
pub use state::{
    ColormapSettings, EntityState, PositionSource, PropertyFlags, SizeScaling, VelocitySource,
};
pub use sync::{SyncError, collect_updates};

/// One synchronized dataset or layer.
#[derive(Debug)]
pub struct Entity {
    id: String,
    display_name: String,
    state: Mutex<EntityState>,
    suppress_echo: AtomicBool,
    has_sent_initial_data: AtomicBool,
}

impl Entity {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, state: EntityState) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            state: Mutex::new(state),
            suppress_echo: AtomicBool::new(false),
            has_sent_initial_data: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn state(&self) -> EntityState {
        lock::lock(&self.state).clone()
    }

    /// Mutates local state. The caller reports what changed through
    /// `Connection::on_entity_property_changed`.
    pub fn update<R>(&self, f: impl FnOnce(&mut EntityState) -> R) -> R {
        f(&mut lock::lock(&self.state))
    }

    pub fn apply_remote(&self, key: AttributeKey, value: &AttributeValue) -> bool {
        lock::lock(&self.state).apply_remote(key, value)
    }

    pub fn suppress_echo(&self) -> EchoGuard<'_> {
        let previous = self.suppress_echo.swap(true, Ordering::AcqRel);
        EchoGuard {
            flag: &self.suppress_echo,
            previous,
        }
    }

    pub fn is_suppressing_echo(&self) -> bool {
        self.suppress_echo.load(Ordering::Acquire)
    }

    pub fn has_sent_initial_data(&self) -> bool {
        self.has_sent_initial_data.load(Ordering::Acquire)
    }

    pub fn mark_initial_data_sent(&self) {
        self.has_sent_initial_data.store(true, Ordering::Release);
    }

    pub fn reset_initial_data(&self) {
        self.has_sent_initial_data.store(false, Ordering::Release);
    }
}

/// Holds the entity's suppress-echo flag set until dropped.
#[must_use]
#[derive(Debug)]
pub struct EchoGuard<'a> {
    flag: &'a AtomicBool,
    previous: bool,
}

impl Drop for EchoGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(self.previous, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_guard_restores_flag() {
        let entity = Entity::new("e1", "Stars", EntityState::default());
        assert!(!entity.is_suppressing_echo());
        {
            let _outer = entity.suppress_echo();
            assert!(entity.is_suppressing_echo());
            {
                let _inner = entity.suppress_echo();
            }
            assert!(entity.is_suppressing_echo());
        }
        assert!(!entity.is_suppressing_echo());
    }

    #[test]
    fn test_update_and_snapshot() {
        let entity = Entity::new("e1", "Stars", EntityState::default());
        entity.update(|state| state.size = 4.0);
        assert_eq!(entity.state().size, 4.0);

        assert!(!entity.has_sent_initial_data());
        entity.mark_initial_data_sent();
        assert!(entity.has_sent_initial_data());
        entity.reset_initial_data();
        assert!(!entity.has_sent_initial_data());
    }
}
