use super::{DeskEntity, EntityBase, EntityState, Platform};
use crate::coordinator::{DeskCoordinator, DeskSnapshot};

/// Desk height in inches
pub struct HeightSensor {
    base: EntityBase,
    native_value: Option<f64>,
    available: bool,
}

impl HeightSensor {
    pub const KEY: &'static str = "desk_height";
    pub const UNIT: &'static str = "in";
    pub const DISPLAY_PRECISION: usize = 1;

    pub fn new(coordinator: DeskCoordinator) -> Self {
        log::debug!("Initializing height sensor for desk {}", coordinator.desk_info());
        Self {
            base: EntityBase::new(coordinator, Self::KEY, Platform::Sensor),
            native_value: None,
            available: false,
        }
    }

    /// Value rounded for display, e.g. "30.0 in"
    pub fn display(&self) -> Option<String> {
        self.native_value
            .map(|v| format!("{:.*} {}", Self::DISPLAY_PRECISION, v, Self::UNIT))
    }
}

impl DeskEntity for HeightSensor {
    fn base(&self) -> &EntityBase {
        &self.base
    }

    fn handle_coordinator_update(&mut self, snapshot: &DeskSnapshot) {
        self.native_value = snapshot.height_in;
        self.available = snapshot.connected;
    }

    fn state(&self) -> EntityState {
        EntityState::Height(self.native_value)
    }

    fn available(&self) -> bool {
        self.available
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fast_settings, test_desk, FakeDesk, FakeFactory};
    use std::sync::Arc;

    #[test]
    fn test_display() {
        let coordinator = DeskCoordinator::new(
            test_desk(),
            Arc::new(FakeFactory(FakeDesk::new())),
            fast_settings(),
        );
        let mut sensor = HeightSensor::new(coordinator);
        assert_eq!(sensor.display(), None);

        sensor.handle_coordinator_update(&DeskSnapshot {
            connected: true,
            height_mm: Some(1050),
            height_in: Some(1050.0 / 25.4),
            moving: false,
        });
        assert_eq!(sensor.display().as_deref(), Some("41.3 in"));
        assert!(sensor.available());
    }
}
