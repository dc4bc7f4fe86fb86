use super::{DeskEntity, EntityBase, EntityState, Platform};
use crate::coordinator::{DeskCoordinator, DeskSnapshot};

/// On while the desk is moving
pub struct MovingSensor {
    base: EntityBase,
    is_on: bool,
    available: bool,
}

impl MovingSensor {
    pub const KEY: &'static str = "desk_moving";

    pub fn new(coordinator: DeskCoordinator) -> Self {
        log::debug!("Initializing moving sensor for desk {}", coordinator.desk_info());
        Self {
            base: EntityBase::new(coordinator, Self::KEY, Platform::BinarySensor),
            is_on: false,
            available: false,
        }
    }
}

impl DeskEntity for MovingSensor {
    fn base(&self) -> &EntityBase {
        &self.base
    }

    fn handle_coordinator_update(&mut self, snapshot: &DeskSnapshot) {
        self.is_on = snapshot.moving;
        self.available = snapshot.connected;
    }

    fn state(&self) -> EntityState {
        EntityState::Moving(self.is_on)
    }

    fn available(&self) -> bool {
        self.available
    }
}
