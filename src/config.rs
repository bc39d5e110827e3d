// Session configuration.
//
// Loaded from JSON; every field falls back to its default so a config file
// only needs the values that differ from the stock ESP32 lock.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::central::ScanMode;
use crate::api::characteristic::CharacteristicWriteType;
use crate::{Error, Result};

pub const DEFAULT_DEVICE_NAME: &str = "ESP_SMART_LOCK";

/// The fixed command written to the lock.
pub const UNLOCK_PAYLOAD: &[u8] = b"unlock";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Advertised name of the lock; matched exactly
    pub device_name: String,

    /// How the peripheral is found
    pub discovery: DiscoveryMode,

    /// Upper bound on an active scan, in milliseconds
    pub scan_timeout_ms: u64,

    pub scan_mode: ScanMode,

    /// Where commands are written
    pub command: CommandTarget,

    /// Capacity of the session notification channel
    pub notification_capacity: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMode {
    #[default]
    ActiveScan,
    Paired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTarget {
    pub service: Uuid,
    pub characteristic: Uuid,
    #[serde(default)]
    pub write_type: CharacteristicWriteType,
}

impl CommandTarget {
    /// Service/characteristic pair of the ESP32 BLE server firmware.
    pub const fn esp32() -> Self {
        Self {
            service: Uuid::from_u128(0x4fafc201_1fb5_459e_8fcc_c5c9c331914b),
            characteristic: Uuid::from_u128(0xbeb5483e_36e1_4688_b7f5_ea07361b26a8),
            write_type: CharacteristicWriteType::WriteWithResponse,
        }
    }

    /// Nordic UART Service, TX characteristic.
    pub const fn nordic_uart() -> Self {
        Self {
            service: Uuid::from_u128(0x6E400001_B5A3_F393_E0A9_E50E24DCCA9E),
            characteristic: Uuid::from_u128(0x6E400002_B5A3_F393_E0A9_E50E24DCCA9E),
            write_type: CharacteristicWriteType::WriteWithResponse,
        }
    }
}

impl Default for CommandTarget {
    fn default() -> Self {
        Self::esp32()
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            discovery: DiscoveryMode::ActiveScan,
            scan_timeout_ms: 10_000,
            scan_mode: ScanMode::LowLatency,
            command: CommandTarget::default(),
            notification_capacity: 32,
        }
    }
}

impl SessionConfig {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn from_json_str(contents: &str) -> Result<Self> {
        let config: SessionConfig =
            serde_json::from_str(contents).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&contents)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.device_name.is_empty() {
            return Err(Error::Config("device_name must not be empty".into()));
        }
        if self.scan_timeout_ms == 0 {
            return Err(Error::Config("scan_timeout_ms must be positive".into()));
        }
        if self.notification_capacity == 0 {
            return Err(Error::Config("notification_capacity must be positive".into()));
        }
        Ok(())
    }
}
