use std::time::Duration;

use thiserror::Error;

/// Errors raised by a desk session and the link underneath it
#[derive(Error, Debug)]
pub enum DeskError {
    #[error("Desk is not connected")]
    NotConnected,

    #[error("Desk with address {address} not found")]
    DeviceNotFound { address: String },

    #[error("Failed to connect to desk after {attempts} attempt(s): {source}")]
    ConnectFailed {
        attempts: u32,
        #[source]
        source: Box<DeskError>,
    },

    #[error("Device is not an Uplift desk: {0}")]
    Validation(String),

    #[error("Invalid preset {0} (expected 1-4)")]
    InvalidPreset(u8),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),

    #[error("{0}")]
    Link(String),
}

impl DeskError {
    /// Whether another connection attempt could succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Validation(_) | Self::DeviceNotFound { .. })
    }
}

/// Errors raised while setting up or driving configured desks
#[derive(Error, Debug)]
pub enum IntegrationError {
    /// The desk could not be reached; setup may be retried later
    #[error("Desk {address} is not ready: {source}")]
    NotReady {
        address: String,
        #[source]
        source: DeskError,
    },

    #[error("Desk {address} is already set up")]
    AlreadySetUp { address: String },

    #[error("No desk set up with address {0}")]
    UnknownEntry(String),

    #[error("No button {key} on desk {address}")]
    UnknownButton { address: String, key: String },

    #[error(transparent)]
    Desk(#[from] DeskError),
}

pub type Result<T, E = DeskError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_is_not_retryable() {
        assert!(!DeskError::Validation("missing data-in".into()).is_retryable());
        assert!(!DeskError::DeviceNotFound { address: "AA".into() }.is_retryable());
        assert!(DeskError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(DeskError::Link("gatt write failed".into()).is_retryable());
    }

    #[test]
    fn test_connect_failed_message_includes_cause() {
        let err = DeskError::ConnectFailed {
            attempts: 3,
            source: Box::new(DeskError::Link("peer refused".into())),
        };
        assert_eq!(
            err.to_string(),
            "Failed to connect to desk after 3 attempt(s): peer refused"
        );
    }
}
