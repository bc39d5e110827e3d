use thiserror::Error;
use uuid::Uuid;

use crate::session::connection::ConnectionState;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure the core reports. None of them are fatal to the process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("Bluetooth permissions not granted")]
    PermissionDenied,

    #[error("Bluetooth is turned off")]
    RadioDisabled,

    #[error("Bluetooth scanner unavailable")]
    ScannerUnavailable,

    #[error("Scan timed out")]
    ScanTimeout,

    #[error("Scan failed with code {0}")]
    ScanFailed(i32),

    #[error("Device {0} not found")]
    DeviceNotFound(String),

    #[error("Connection failed with status {0}")]
    ConnectionFailed(i32),

    #[error("Service discovery failed with status {0}")]
    CapabilityDiscoveryFailed(i32),

    #[error("Service {0} not found")]
    ServiceNotFound(Uuid),

    #[error("Characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    #[error("Failed to initiate write")]
    WriteInitiationFailed,

    #[error("A command is already in flight")]
    CommandInFlight,

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Not connected (state: {0:?})")]
    NotReady(ConnectionState),

    #[error("Cannot connect while {0:?}")]
    InvalidState(ConnectionState),

    #[error("A session is already active")]
    SessionBusy,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Session manager has shut down")]
    SessionClosed,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub fn transport(message: impl ToString) -> Self {
        Error::TransportError(message.to_string())
    }
}
