use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::desk::DiscoveredDesk;

/// Configuration for the desk integration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// One entry per paired desk
    pub desks: Vec<DeskEntry>,

    /// Connection and session tuning shared by every desk
    pub connection: ConnectionSettings,
}

/// A configured desk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeskEntry {
    /// Bluetooth MAC address (or platform peripheral id)
    pub address: String,

    /// Display name, taken from the desk's advertisement
    pub name: String,
}

impl DeskEntry {
    /// Entries are unique per address
    pub fn unique_id(&self) -> &str {
        &self.address
    }

    pub fn desk(&self) -> DiscoveredDesk {
        DiscoveredDesk::new(self.name.clone(), self.address.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Connection attempts before giving up
    pub connect_attempts: u32,

    /// Pause between connection attempts
    pub retry_delay_ms: u64,

    /// Timeout for the BLE connect and service discovery steps
    pub connect_timeout_secs: u64,

    /// Timeout for a single command write or height query
    pub command_timeout_ms: u64,

    /// Quiet period after the last height report before the desk counts as stopped
    pub moving_settle_ms: u64,

    /// Send a wake command ahead of every height query and movement
    pub wake_before_command: bool,

    /// How long a discovery scan runs
    pub scan_secs: u64,

    /// Pause before restoring a connection the desk dropped
    pub reconnect_secs: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_attempts: 3,
            retry_delay_ms: 2000,
            connect_timeout_secs: 15,
            command_timeout_ms: 5000,
            moving_settle_ms: 1500,
            wake_before_command: true,
            scan_secs: 10,
            reconnect_secs: 30,
        }
    }
}

impl ConnectionSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn moving_settle(&self) -> Duration {
        Duration::from_millis(self.moving_settle_ms)
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(self.scan_secs)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_secs)
    }
}

impl Config {
    /// Get the configuration directory path (~/.uplift-desk)
    pub fn config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not find home directory")?;
        Ok(home.join(".uplift-desk"))
    }

    /// Get the configuration file path (~/.uplift-desk/config)
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config"))
    }

    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    /// Load configuration from file, or create default if not exists
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&content).context("Failed to parse config file")?;
            Ok(config)
        } else {
            log::info!("Config file not found, creating default");
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                fs::create_dir_all(dir).context("Failed to create config directory")?;
            }
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;

        log::info!("Configuration saved to {:?}", path);
        Ok(())
    }

    pub fn entry(&self, address: &str) -> Option<&DeskEntry> {
        self.desks
            .iter()
            .find(|d| d.address.eq_ignore_ascii_case(address))
    }

    pub fn is_configured(&self, address: &str) -> bool {
        self.entry(address).is_some()
    }

    /// Remove a desk entry, returning it if present
    pub fn remove_entry(&mut self, address: &str) -> Option<DeskEntry> {
        let index = self
            .desks
            .iter()
            .position(|d| d.address.eq_ignore_ascii_case(address))?;
        Some(self.desks.remove(index))
    }

    /// Resolve the desk a command targets: the given address, or the only configured desk
    pub fn select(&self, address: Option<&str>) -> Result<&DeskEntry> {
        match address {
            Some(address) => self
                .entry(address)
                .with_context(|| format!("No desk configured with address {}", address)),
            None => match self.desks.as_slice() {
                [only] => Ok(only),
                [] => anyhow::bail!("No desk configured. Run `uplift-desk scan` first."),
                _ => anyhow::bail!("Several desks configured, pass an address"),
            },
        }
    }
}
