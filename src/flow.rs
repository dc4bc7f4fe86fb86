use thiserror::Error;

use crate::config::{Config, DeskEntry};
use crate::desk::DiscoveredDesk;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FlowError {
    #[error("Desk {address} is already configured")]
    AlreadyConfigured { address: String },
}

/// Turns a discovered desk into a config entry once the user confirms it
#[derive(Debug)]
pub struct ConfigFlow {
    discovered: DiscoveredDesk,
}

impl ConfigFlow {
    /// Start a flow for a desk found by a scan, aborting if it already has an entry
    pub fn discovered(desk: DiscoveredDesk, config: &Config) -> Result<Self, FlowError> {
        if config.is_configured(&desk.address) {
            return Err(FlowError::AlreadyConfigured {
                address: desk.address,
            });
        }
        Ok(Self { discovered: desk })
    }

    /// Title shown while asking for confirmation
    pub fn title(&self) -> &str {
        &self.discovered.name
    }

    pub fn desk(&self) -> &DiscoveredDesk {
        &self.discovered
    }

    /// Create the entry and add it to `config`
    pub fn confirm(self, config: &mut Config) -> Result<DeskEntry, FlowError> {
        // Another flow for the same desk may have finished first
        if config.is_configured(&self.discovered.address) {
            return Err(FlowError::AlreadyConfigured {
                address: self.discovered.address,
            });
        }

        let entry = DeskEntry {
            address: self.discovered.address,
            name: self.discovered.name,
        };
        config.desks.push(entry.clone());
        log::info!("Configured desk {} ({})", entry.name, entry.address);
        Ok(entry)
    }
}
