use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::protocol::DeskCommand;
use crate::error::Result;

/// Identity of a desk found by a scan or stored in a config entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscoveredDesk {
    pub name: String,
    pub address: String,
}

impl DiscoveredDesk {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for DiscoveredDesk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.name, self.address)
    }
}

/// Pushed by a link whenever the desk reports something
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeskEvent {
    /// Current height in millimetres
    Height(u16),
    /// The peer dropped the connection
    Disconnected,
}

/// Callback a link invokes for every [`DeskEvent`]. Must not block.
pub type EventSink = Arc<dyn Fn(DeskEvent) + Send + Sync>;

/// Creates links to desks
#[async_trait]
pub trait DeskLinkFactory: Send + Sync {
    /// Whether the desk is currently visible to the adapter
    async fn locate(&self, address: &str) -> Result<bool>;

    /// Open a connection to the desk and start delivering events to `events`
    async fn open(&self, desk: &DiscoveredDesk, events: EventSink) -> Result<Box<dyn DeskLink>>;
}

/// A live connection to one desk
#[async_trait]
pub trait DeskLink: Send + Sync {
    async fn is_connected(&self) -> bool;

    /// Check the peer speaks the desk protocol
    async fn validate(&self) -> Result<()>;

    /// Write a command to the desk
    async fn send(&self, command: DeskCommand) -> Result<()>;

    /// Query the desk and wait for the next height report, in millimetres
    async fn request_height(&self) -> Result<u16>;

    async fn stop_notifications(&self) -> Result<()>;

    /// Close the connection. The link is unusable afterwards.
    async fn close(&self) -> Result<()>;
}
