use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::config::{ConnectionSettings, DeskEntry};
use crate::coordinator::{DeskCoordinator, SessionState};
use crate::desk::DeskLinkFactory;
use crate::entity::{entities_for, DeskEntity, EntityState, Platform, PresetButton};
use crate::error::{DeskError, IntegrationError};

/// One entity state change, as handed to the host
#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdate {
    pub unique_id: String,
    pub platform: Platform,
    pub available: bool,
    pub state: EntityState,
}

/// Receives entity state changes. Called from the entry's update task, must not block.
pub trait StateWriter: Send + Sync {
    fn write_state(&self, update: StateUpdate);
}

/// Logs every state change
pub struct LogStateWriter;

impl StateWriter for LogStateWriter {
    fn write_state(&self, update: StateUpdate) {
        if !update.available {
            log::info!("{}: unavailable", update.unique_id);
            return;
        }
        match update.state {
            EntityState::Height(Some(inches)) => log::info!("{}: {:.1} in", update.unique_id, inches),
            EntityState::Height(None) => log::info!("{}: unknown", update.unique_id),
            EntityState::Moving(moving) => {
                log::info!("{}: {}", update.unique_id, if moving { "on" } else { "off" })
            }
            EntityState::Button => log::debug!("{}: available", update.unique_id),
        }
    }
}

struct EntryRuntime {
    coordinator: DeskCoordinator,
    buttons: Vec<PresetButton>,
    entity_ids: Vec<String>,
    updates: JoinHandle<()>,
    reconnect: JoinHandle<()>,
}

/// Sets up and tears down configured desks
pub struct Integration {
    factory: Arc<dyn DeskLinkFactory>,
    settings: ConnectionSettings,
    writer: Arc<dyn StateWriter>,
    entries: HashMap<String, EntryRuntime>,
}

impl Integration {
    pub fn new(
        factory: Arc<dyn DeskLinkFactory>,
        settings: ConnectionSettings,
        writer: Arc<dyn StateWriter>,
    ) -> Self {
        Self {
            factory,
            settings,
            writer,
            entries: HashMap::new(),
        }
    }

    fn entry_key(address: &str) -> String {
        address.to_ascii_uppercase()
    }

    /// Connect to a configured desk, read its height once and start publishing its entities
    pub async fn setup_entry(
        &mut self,
        entry: &DeskEntry,
    ) -> Result<DeskCoordinator, IntegrationError> {
        let key = Self::entry_key(&entry.address);
        if self.entries.contains_key(&key) {
            return Err(IntegrationError::AlreadySetUp {
                address: entry.address.clone(),
            });
        }

        let not_ready = |source: DeskError| IntegrationError::NotReady {
            address: entry.address.clone(),
            source,
        };

        if !self.factory.locate(&entry.address).await.map_err(&not_ready)? {
            return Err(not_ready(DeskError::DeviceNotFound {
                address: entry.address.clone(),
            }));
        }

        let coordinator = DeskCoordinator::new(
            entry.desk(),
            self.factory.clone(),
            self.settings.clone(),
        );
        coordinator.connect().await.map_err(&not_ready)?;

        if let Err(e) = coordinator.read_height().await {
            if let Err(close_err) = coordinator.disconnect().await {
                log::warn!("Failed to disconnect after setup error: {}", close_err);
            }
            return Err(not_ready(e));
        }

        log::debug!("Initializing Uplift desk {}", coordinator.desk_info());

        let entities = entities_for(&coordinator);
        let entity_ids = entities.iter().map(|e| e.unique_id()).collect();
        let updates = spawn_state_updates(&coordinator, entities, self.writer.clone());
        let reconnect = spawn_reconnect(&coordinator, self.settings.reconnect_interval());

        self.entries.insert(
            key,
            EntryRuntime {
                buttons: PresetButton::all(&coordinator),
                coordinator: coordinator.clone(),
                entity_ids,
                updates,
                reconnect,
            },
        );

        Ok(coordinator)
    }

    /// Stop publishing and disconnect. Returns false when the desk was not set up.
    pub async fn unload_entry(&mut self, address: &str) -> bool {
        let Some(runtime) = self.entries.remove(&Self::entry_key(address)) else {
            return false;
        };

        runtime.reconnect.abort();
        runtime.updates.abort();
        if let Err(e) = runtime.coordinator.disconnect().await {
            log::warn!(
                "Error while disconnecting {}: {}",
                runtime.coordinator.desk_info(),
                e
            );
        }
        log::info!("Unloaded desk {}", runtime.coordinator.desk_info());
        true
    }

    /// Unload every desk
    pub async fn shutdown(&mut self) {
        let addresses: Vec<String> = self.entries.keys().cloned().collect();
        for address in addresses {
            self.unload_entry(&address).await;
        }
    }

    pub fn coordinator(&self, address: &str) -> Option<&DeskCoordinator> {
        self.entries
            .get(&Self::entry_key(address))
            .map(|r| &r.coordinator)
    }

    pub fn entity_ids(&self, address: &str) -> Option<&[String]> {
        self.entries
            .get(&Self::entry_key(address))
            .map(|r| r.entity_ids.as_slice())
    }

    /// Press the button with entity key `key` on a desk
    pub async fn press(&self, address: &str, key: &str) -> Result<(), IntegrationError> {
        let runtime = self
            .entries
            .get(&Self::entry_key(address))
            .ok_or_else(|| IntegrationError::UnknownEntry(address.to_string()))?;

        let button = runtime
            .buttons
            .iter()
            .find(|b| b.key() == key)
            .ok_or_else(|| IntegrationError::UnknownButton {
                address: address.to_string(),
                key: key.to_string(),
            })?;

        Ok(button.press().await?)
    }
}

/// Write every entity's state once, then again whenever a pushed snapshot changes it
fn spawn_state_updates(
    coordinator: &DeskCoordinator,
    mut entities: Vec<Box<dyn DeskEntity>>,
    writer: Arc<dyn StateWriter>,
) -> JoinHandle<()> {
    let mut snapshots = coordinator.subscribe();

    tokio::spawn(async move {
        let mut last: Vec<Option<(bool, EntityState)>> = vec![None; entities.len()];
        loop {
            let snapshot = *snapshots.borrow_and_update();
            for (entity, last) in entities.iter_mut().zip(last.iter_mut()) {
                entity.handle_coordinator_update(&snapshot);
                let current = (entity.available(), entity.state());
                if last.as_ref() != Some(&current) {
                    writer.write_state(StateUpdate {
                        unique_id: entity.unique_id(),
                        platform: entity.platform(),
                        available: current.0,
                        state: current.1,
                    });
                    *last = Some(current);
                }
            }

            if snapshots.changed().await.is_err() {
                break;
            }
        }
    })
}

/// Restore the connection after the desk drops it, until the entry is unloaded
fn spawn_reconnect(coordinator: &DeskCoordinator, interval: Duration) -> JoinHandle<()> {
    let coordinator = coordinator.clone();
    let mut states = coordinator.subscribe_state();

    tokio::spawn(async move {
        loop {
            if *states.borrow_and_update() != SessionState::Disconnected {
                if states.changed().await.is_err() {
                    break;
                }
                continue;
            }

            sleep(interval).await;
            if coordinator.state() != SessionState::Disconnected {
                continue;
            }

            log::info!("Reconnecting to desk {}", coordinator.desk_info());
            match coordinator.connect().await {
                Ok(()) => {
                    if let Err(e) = coordinator.read_height().await {
                        log::warn!("Failed to read height after reconnecting: {}", e);
                    }
                }
                Err(e) => log::warn!(
                    "Reconnecting to {} failed: {}, retrying in {:?}",
                    coordinator.desk_info(),
                    e,
                    interval
                ),
            }
        }
    })
}
