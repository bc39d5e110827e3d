use crate::api::central::TransportId;
use crate::api::peripheral::PeripheralHandle;
use crate::api::service::Service;

/// GATT status reported for a successful operation.
pub const GATT_SUCCESS: i32 = 0;

/// Events pushed by the radio stack, in the order it observed them.
#[derive(Debug, Clone, PartialEq)]
pub enum CentralEvent {
    DeviceDiscovered {
        peripheral: PeripheralHandle,
        rssi: Option<i16>,
    },
    ScanFailed {
        code: i32,
    },
    DeviceConnected {
        transport: TransportId,
    },
    DeviceDisconnected {
        transport: TransportId,
        status: i32,
    },
    DeviceConnectionFailed {
        transport: TransportId,
        status: i32,
    },
    ServicesDiscovered {
        transport: TransportId,
        status: i32,
        services: Vec<Service>,
    },
    StateUpdate {
        state: CentralState,
    },
}

impl CentralEvent {
    /// Transport the event refers to, if it concerns a connection.
    pub fn transport(&self) -> Option<TransportId> {
        match self {
            CentralEvent::DeviceConnected { transport }
            | CentralEvent::DeviceDisconnected { transport, .. }
            | CentralEvent::DeviceConnectionFailed { transport, .. }
            | CentralEvent::ServicesDiscovered { transport, .. } => Some(*transport),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CentralState {
    Unknown = 0,
    PoweredOn = 1,
    PoweredOff = 2,
}
