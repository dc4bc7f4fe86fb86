//! Session coordinator and entity views for Uplift BLE standing desks.

pub mod config;
pub mod coordinator;
pub mod desk;
pub mod entity;
pub mod error;
pub mod flow;
pub mod integration;
pub mod units;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{Config, ConnectionSettings, DeskEntry};
pub use coordinator::{DeskCoordinator, DeskSnapshot, SessionState};
pub use error::{DeskError, IntegrationError};
pub use integration::{Integration, LogStateWriter, StateUpdate, StateWriter};
