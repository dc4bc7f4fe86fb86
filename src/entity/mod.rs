//! Entity views over a [`DeskCoordinator`].
//!
//! Entities copy what they show out of each pushed [`DeskSnapshot`] and never
//! touch the desk link. Buttons relay presses back into coordinator commands.

mod binary_sensor;
mod button;
mod sensor;

pub use binary_sensor::MovingSensor;
pub use button::{ButtonAction, PresetButton};
pub use sensor::HeightSensor;

use crate::coordinator::{DeskCoordinator, DeskSnapshot};

/// Which kind of entity this is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Sensor,
    BinarySensor,
    Button,
}

/// The value an entity exposes
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntityState {
    /// Height in inches
    Height(Option<f64>),
    Moving(bool),
    /// Buttons carry no state
    Button,
}

/// Links an entity to the desk it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub identifier: String,
    pub name: String,
}

/// Identity shared by every entity of a desk
#[derive(Clone)]
pub struct EntityBase {
    coordinator: DeskCoordinator,
    key: &'static str,
    platform: Platform,
}

impl EntityBase {
    pub fn new(coordinator: DeskCoordinator, key: &'static str, platform: Platform) -> Self {
        Self {
            coordinator,
            key,
            platform,
        }
    }

    pub fn coordinator(&self) -> &DeskCoordinator {
        &self.coordinator
    }
}

pub trait DeskEntity: Send + Sync {
    fn base(&self) -> &EntityBase;

    /// Copy the relevant fields of a pushed snapshot
    fn handle_coordinator_update(&mut self, snapshot: &DeskSnapshot);

    fn state(&self) -> EntityState;

    fn available(&self) -> bool;

    fn key(&self) -> &'static str {
        self.base().key
    }

    fn platform(&self) -> Platform {
        self.base().platform
    }

    fn unique_id(&self) -> String {
        format!("{}_{}", self.base().coordinator.desk_address(), self.key())
    }

    fn device_info(&self) -> DeviceInfo {
        let coordinator = &self.base().coordinator;
        DeviceInfo {
            identifier: coordinator.desk_address().to_string(),
            name: coordinator.desk_name().to_string(),
        }
    }
}

/// Every entity exposed for one desk, seeded with the coordinator's current snapshot
pub fn entities_for(coordinator: &DeskCoordinator) -> Vec<Box<dyn DeskEntity>> {
    log::debug!("Setting up entities for desk {}", coordinator.desk_info());

    let mut entities: Vec<Box<dyn DeskEntity>> = vec![
        Box::new(HeightSensor::new(coordinator.clone())),
        Box::new(MovingSensor::new(coordinator.clone())),
    ];
    entities.extend(
        PresetButton::all(coordinator)
            .into_iter()
            .map(|b| Box::new(b) as Box<dyn DeskEntity>),
    );

    let snapshot = coordinator.snapshot();
    for entity in &mut entities {
        entity.handle_coordinator_update(&snapshot);
    }
    entities
}
