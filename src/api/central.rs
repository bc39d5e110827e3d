use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Result;
use crate::api::central_event::CentralState;
use crate::api::characteristic::CharacteristicWriteType;
use crate::api::peripheral::PeripheralHandle;

/// The platform radio stack as seen by the session core.
///
/// Calls return as soon as the request has been handed to the radio. Their
/// outcomes (advertisements, connection changes, service discovery) arrive
/// later as [`CentralEvent`](crate::api::central_event::CentralEvent)s on the
/// channel the implementation was created with. `write` is the exception: its
/// boolean is the stack's synchronous "accepted for transmission" answer.
#[async_trait]
pub trait CentralManager: Send + Sync + 'static {
    async fn adapter_state(&self) -> Result<CentralState>;

    async fn start_scan(&self, filter: ScanFilter) -> Result<()>;

    async fn stop_scan(&self) -> Result<()>;

    /// Peripherals the platform already has a bond with.
    async fn bonded_peripherals(&self) -> Result<Vec<PeripheralHandle>>;

    async fn connect(&self, peripheral: &PeripheralHandle) -> Result<TransportId>;

    async fn discover_services(&self, transport: TransportId) -> Result<()>;

    async fn write(
        &self,
        transport: TransportId,
        service: Uuid,
        characteristic: Uuid,
        data: &[u8],
        write_type: CharacteristicWriteType,
    ) -> Result<bool>;

    async fn close(&self, transport: TransportId) -> Result<()>;
}

/// Runtime permission check consulted before any radio call.
pub trait PermissionGate: Send + Sync + 'static {
    fn permissions_granted(&self) -> bool;
}

impl<T: PermissionGate> PermissionGate for Arc<T> {
    fn permissions_granted(&self) -> bool {
        (**self).permissions_granted()
    }
}

/// Gate for platforms without runtime Bluetooth permissions.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysGranted;

impl PermissionGate for AlwaysGranted {
    fn permissions_granted(&self) -> bool {
        true
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ScanFilter {
    pub name: Option<String>,
    pub services: Vec<Uuid>,
    pub mode: ScanMode,
}

impl ScanFilter {
    pub fn by_name(name: &str, mode: ScanMode) -> Self {
        ScanFilter {
            name: Some(name.to_string()),
            services: Vec::new(),
            mode,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    LowPower,
    Balanced,
    #[default]
    LowLatency,
}

/// Live connection issued by [`CentralManager::connect`].
///
/// Only the connection lifecycle holds one; it is never handed to callers.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TransportId(pub u64);

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport#{}", self.0)
    }
}
