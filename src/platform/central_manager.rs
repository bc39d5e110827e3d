use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use btleplug::api::{
    Central as _, CentralEvent as RadioEvent, CentralState as RadioState, CharPropFlags,
    Manager as _, Peripheral as _, ScanFilter as RadioFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use log::{debug, error, info, trace, warn};
use tokio::sync::mpsc::Sender;
use uuid::Uuid;

use crate::api::central::{CentralManager, ScanFilter, TransportId};
use crate::api::central_event::{CentralEvent, CentralState, GATT_SUCCESS};
use crate::api::characteristic::{Characteristic, CharacteristicProperty, CharacteristicWriteType};
use crate::api::peripheral::PeripheralHandle;
use crate::api::service::Service;
use crate::{Error, Result};

/// Status reported when the stack gives no reason for a failure.
const GATT_ERROR: i32 = 133;
/// Status reported when the peripheral drops an established link.
const REMOTE_DISCONNECT: i32 = 0x13;

type Transports = Arc<Mutex<HashMap<TransportId, Peripheral>>>;

/// [`CentralManager`] on the first adapter `btleplug` reports.
///
/// `connect` and `discover_services` return immediately and report through
/// the event channel, like the platform callbacks they stand in for.
pub struct BtleplugCentral {
    adapter: Adapter,
    sender: Sender<CentralEvent>,
    transports: Transports,
    next_transport: AtomicU64,
}

impl BtleplugCentral {
    pub async fn new(sender: Sender<CentralEvent>) -> Result<Self> {
        let manager = Manager::new().await.map_err(Error::transport)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(Error::transport)?
            .into_iter()
            .next()
            .ok_or(Error::ScannerUnavailable)?;
        match adapter.adapter_info().await {
            Ok(info) => info!("Using adapter {}", info),
            Err(e) => debug!("No adapter info: {}", e),
        }

        let transports = Transports::default();
        let mut events = adapter.events().await.map_err(Error::transport)?;
        let pump_adapter = adapter.clone();
        let pump_sender = sender.clone();
        let pump_transports = Arc::clone(&transports);
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let Some(event) = translate(&pump_adapter, &pump_transports, event).await else {
                    continue;
                };
                if pump_sender.send(event).await.is_err() {
                    debug!("Central event receiver dropped");
                    break;
                }
            }
        });

        Ok(BtleplugCentral {
            adapter,
            sender,
            transports,
            next_transport: AtomicU64::new(1),
        })
    }

    fn peripheral(&self, transport: TransportId) -> Result<Peripheral> {
        lock(&self.transports)
            .get(&transport)
            .cloned()
            .ok_or_else(|| Error::transport(format!("unknown {}", transport)))
    }
}

async fn translate(
    adapter: &Adapter,
    transports: &Transports,
    event: RadioEvent,
) -> Option<CentralEvent> {
    trace!("radio event {:?}", event);
    match event {
        RadioEvent::DeviceDiscovered(id) | RadioEvent::DeviceUpdated(id) => {
            let peripheral = adapter.peripheral(&id).await.ok()?;
            let properties = peripheral.properties().await.ok().flatten();
            let (name, rssi) = match properties {
                Some(p) => (p.local_name, p.rssi),
                None => (None, None),
            };
            Some(CentralEvent::DeviceDiscovered {
                peripheral: PeripheralHandle::new(id.to_string(), name.as_deref()),
                rssi,
            })
        }
        RadioEvent::DeviceDisconnected(id) => {
            let transport = lock(transports)
                .iter()
                .find(|(_, p)| p.id() == id)
                .map(|(t, _)| *t)?;
            Some(CentralEvent::DeviceDisconnected {
                transport,
                status: REMOTE_DISCONNECT,
            })
        }
        RadioEvent::StateUpdate(state) => Some(CentralEvent::StateUpdate {
            state: central_state(state),
        }),
        _ => None,
    }
}

fn central_state(state: RadioState) -> CentralState {
    match state {
        RadioState::PoweredOn => CentralState::PoweredOn,
        RadioState::PoweredOff => CentralState::PoweredOff,
        _ => CentralState::Unknown,
    }
}

fn service(service: &btleplug::api::Service) -> Service {
    Service {
        uuid: service.uuid,
        primary: service.primary,
        characteristics: service
            .characteristics
            .iter()
            .map(|c| Characteristic {
                uuid: c.uuid,
                service_uuid: c.service_uuid,
                properties: properties(c.properties),
            })
            .collect(),
    }
}

fn properties(flags: CharPropFlags) -> Vec<CharacteristicProperty> {
    [
        (CharPropFlags::BROADCAST, CharacteristicProperty::Broadcast),
        (CharPropFlags::READ, CharacteristicProperty::Read),
        (
            CharPropFlags::WRITE_WITHOUT_RESPONSE,
            CharacteristicProperty::WriteWithoutResponse,
        ),
        (CharPropFlags::WRITE, CharacteristicProperty::Write),
        (CharPropFlags::NOTIFY, CharacteristicProperty::Notify),
        (CharPropFlags::INDICATE, CharacteristicProperty::Indicate),
        (
            CharPropFlags::AUTHENTICATED_SIGNED_WRITES,
            CharacteristicProperty::AuthenticatedSignedWrites,
        ),
        (
            CharPropFlags::EXTENDED_PROPERTIES,
            CharacteristicProperty::ExtendedProperties,
        ),
    ]
    .into_iter()
    .filter(|(flag, _)| flags.contains(*flag))
    .map(|(_, property)| property)
    .collect()
}

#[async_trait]
impl CentralManager for BtleplugCentral {
    async fn adapter_state(&self) -> Result<CentralState> {
        let state = self
            .adapter
            .adapter_state()
            .await
            .map_err(Error::transport)?;
        Ok(central_state(state))
    }

    async fn start_scan(&self, filter: ScanFilter) -> Result<()> {
        // btleplug has no duty-cycle knob.
        debug!("Scanning ({:?} requested)", filter.mode);
        self.adapter
            .start_scan(RadioFilter {
                services: filter.services,
            })
            .await
            .map_err(Error::transport)
    }

    async fn stop_scan(&self) -> Result<()> {
        self.adapter.stop_scan().await.map_err(Error::transport)
    }

    /// btleplug exposes no bond list; peripherals the adapter already knows
    /// stand in for it.
    async fn bonded_peripherals(&self) -> Result<Vec<PeripheralHandle>> {
        let mut known = Vec::new();
        for peripheral in self.adapter.peripherals().await.map_err(Error::transport)? {
            let name = match peripheral.properties().await {
                Ok(Some(properties)) => properties.local_name,
                _ => None,
            };
            known.push(PeripheralHandle::new(
                peripheral.id().to_string(),
                name.as_deref(),
            ));
        }
        Ok(known)
    }

    async fn connect(&self, handle: &PeripheralHandle) -> Result<TransportId> {
        let peripheral = self
            .adapter
            .peripherals()
            .await
            .map_err(Error::transport)?
            .into_iter()
            .find(|p| p.id().to_string() == handle.id.0)
            .ok_or_else(|| Error::DeviceNotFound(handle.to_string()))?;

        let transport = TransportId(self.next_transport.fetch_add(1, Ordering::SeqCst));
        lock(&self.transports).insert(transport, peripheral.clone());

        let sender = self.sender.clone();
        tokio::spawn(async move {
            let event = match peripheral.connect().await {
                Ok(()) => CentralEvent::DeviceConnected { transport },
                Err(e) => {
                    warn!("Connect on {} failed: {}", transport, e);
                    CentralEvent::DeviceConnectionFailed {
                        transport,
                        status: GATT_ERROR,
                    }
                }
            };
            if sender.send(event).await.is_err() {
                debug!("Central event receiver dropped");
            }
        });
        Ok(transport)
    }

    async fn discover_services(&self, transport: TransportId) -> Result<()> {
        let peripheral = self.peripheral(transport)?;
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let event = match peripheral.discover_services().await {
                Ok(()) => CentralEvent::ServicesDiscovered {
                    transport,
                    status: GATT_SUCCESS,
                    services: peripheral.services().iter().map(service).collect(),
                },
                Err(e) => {
                    warn!("Service discovery on {} failed: {}", transport, e);
                    CentralEvent::ServicesDiscovered {
                        transport,
                        status: GATT_ERROR,
                        services: Vec::new(),
                    }
                }
            };
            if sender.send(event).await.is_err() {
                debug!("Central event receiver dropped");
            }
        });
        Ok(())
    }

    async fn write(
        &self,
        transport: TransportId,
        service: Uuid,
        characteristic: Uuid,
        data: &[u8],
        write_type: CharacteristicWriteType,
    ) -> Result<bool> {
        let peripheral = self.peripheral(transport)?;
        let Some(target) = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.service_uuid == service && c.uuid == characteristic)
        else {
            return Ok(false);
        };
        let write_type = match write_type {
            CharacteristicWriteType::WriteWithResponse => WriteType::WithResponse,
            CharacteristicWriteType::WriteWithoutResponse => WriteType::WithoutResponse,
        };
        peripheral
            .write(&target, data, write_type)
            .await
            .map_err(Error::transport)?;
        Ok(true)
    }

    async fn close(&self, transport: TransportId) -> Result<()> {
        let removed = lock(&self.transports).remove(&transport);
        let Some(peripheral) = removed else {
            return Ok(());
        };
        if let Err(e) = peripheral.disconnect().await {
            error!("Error closing {}: {}", transport, e);
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
