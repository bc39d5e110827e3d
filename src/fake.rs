//! In-memory radio stack.
//!
//! `FakeCentral` answers every [`CentralManager`] call from a script and
//! records what it was asked to do, so tests can assert on call counts
//! (scans started and stopped, transports closed, bytes written).

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::executor;
use tokio::sync::mpsc::Sender;
use tokio::sync::{Notify, Semaphore};
use uuid::Uuid;

use crate::api::central::{CentralManager, PermissionGate, ScanFilter, TransportId};
use crate::api::central_event::{CentralEvent, CentralState, GATT_SUCCESS};
use crate::api::characteristic::CharacteristicWriteType;
use crate::api::peripheral::PeripheralHandle;
use crate::api::service::Service;
use crate::{Error, Result};

/// What happens after `connect` hands out a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectBehavior {
    /// Emit `DeviceConnected`.
    Connect,
    /// Emit `DeviceConnectionFailed` with the status.
    Fail(i32),
    /// Emit `DeviceDisconnected` with the status.
    Disconnect(i32),
    /// Return an error from `connect` itself.
    Error(String),
    /// Emit nothing; the test drives the transport.
    Silent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteBehavior {
    Accept,
    Reject,
    Error(String),
}

#[derive(Debug, Clone)]
pub struct Script {
    pub adapter_state: CentralState,
    /// Advertisements emitted, in order, once a scan starts.
    pub advertisements: Vec<PeripheralHandle>,
    /// Scan-engine error emitted after the advertisements.
    pub scan_failure: Option<i32>,
    pub start_scan_error: bool,
    pub bonded: Vec<PeripheralHandle>,
    pub bonded_error: bool,
    pub connect: ConnectBehavior,
    /// When set, `discover_services` emits `ServicesDiscovered` with this
    /// status and `services`.
    pub discovery_status: Option<i32>,
    pub services: Vec<Service>,
    pub write: WriteBehavior,
    /// Writes wait for [`FakeCentral::release_writes`].
    pub hold_writes: bool,
}

impl Default for Script {
    fn default() -> Self {
        Script {
            adapter_state: CentralState::PoweredOn,
            advertisements: Vec::new(),
            scan_failure: None,
            start_scan_error: false,
            bonded: Vec::new(),
            bonded_error: false,
            connect: ConnectBehavior::Connect,
            discovery_status: Some(GATT_SUCCESS),
            services: Vec::new(),
            write: WriteBehavior::Accept,
            hold_writes: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CallLog {
    pub adapter_queries: usize,
    pub scans_started: usize,
    pub scans_stopped: usize,
    pub last_filter: Option<ScanFilter>,
    pub bonded_queries: usize,
    pub connects: Vec<PeripheralHandle>,
    pub discoveries: Vec<TransportId>,
    pub writes: Vec<WriteCall>,
    pub closes: Vec<TransportId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteCall {
    pub transport: TransportId,
    pub service: Uuid,
    pub characteristic: Uuid,
    pub data: Vec<u8>,
    pub write_type: CharacteristicWriteType,
}

pub struct FakeCentral {
    sender: Sender<CentralEvent>,
    script: Mutex<Script>,
    calls: Mutex<CallLog>,
    next_transport: AtomicU64,
    write_gate: Semaphore,
    write_started: Notify,
}

impl FakeCentral {
    pub fn new(sender: Sender<CentralEvent>, script: Script) -> Self {
        FakeCentral {
            sender,
            script: Mutex::new(script),
            calls: Mutex::new(CallLog::default()),
            next_transport: AtomicU64::new(1),
            write_gate: Semaphore::new(0),
            write_started: Notify::new(),
        }
    }

    pub fn calls(&self) -> CallLog {
        lock(&self.calls).clone()
    }

    pub fn script(&self) -> MutexGuard<'_, Script> {
        lock(&self.script)
    }

    /// Deliver an event as the radio stack would, from outside the runtime's
    /// async context.
    pub fn push(&self, event: CentralEvent) {
        log::trace!("fake central event {:?}", event);
        let sender = self.sender.clone();
        executor::block_on(async {
            if let Err(e) = sender.send(event).await {
                log::error!("Error sending fake central event: {}", e);
            }
        });
    }

    async fn emit(&self, event: CentralEvent) {
        log::trace!("fake central event {:?}", event);
        if let Err(e) = self.sender.send(event).await {
            log::error!("Error sending fake central event: {}", e);
        }
    }

    /// Let `count` held writes complete.
    pub fn release_writes(&self, count: usize) {
        self.write_gate.add_permits(count);
    }

    /// Resolves once a write has reached the fake.
    pub async fn write_started(&self) {
        self.write_started.notified().await;
    }

    /// Transport handed out by the most recent `connect`.
    pub fn last_transport(&self) -> Option<TransportId> {
        match self.next_transport.load(Ordering::SeqCst) {
            1 => None,
            n => Some(TransportId(n - 1)),
        }
    }
}

#[async_trait]
impl CentralManager for FakeCentral {
    async fn adapter_state(&self) -> Result<CentralState> {
        lock(&self.calls).adapter_queries += 1;
        Ok(self.script().adapter_state)
    }

    async fn start_scan(&self, filter: ScanFilter) -> Result<()> {
        {
            let mut calls = lock(&self.calls);
            calls.scans_started += 1;
            calls.last_filter = Some(filter);
        }
        let (fail_start, advertisements, failure) = {
            let script = self.script();
            (
                script.start_scan_error,
                script.advertisements.clone(),
                script.scan_failure,
            )
        };
        if fail_start {
            return Err(Error::transport("scanner not available"));
        }
        for peripheral in advertisements {
            self.emit(CentralEvent::DeviceDiscovered {
                peripheral,
                rssi: Some(-60),
            })
            .await;
        }
        if let Some(code) = failure {
            self.emit(CentralEvent::ScanFailed { code }).await;
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        lock(&self.calls).scans_stopped += 1;
        Ok(())
    }

    async fn bonded_peripherals(&self) -> Result<Vec<PeripheralHandle>> {
        lock(&self.calls).bonded_queries += 1;
        let script = self.script();
        if script.bonded_error {
            return Err(Error::transport("bond list unavailable"));
        }
        Ok(script.bonded.clone())
    }

    async fn connect(&self, peripheral: &PeripheralHandle) -> Result<TransportId> {
        lock(&self.calls).connects.push(peripheral.clone());
        let behavior = self.script().connect.clone();
        if let ConnectBehavior::Error(message) = behavior {
            return Err(Error::TransportError(message));
        }
        let transport = TransportId(self.next_transport.fetch_add(1, Ordering::SeqCst));
        match behavior {
            ConnectBehavior::Connect => {
                self.emit(CentralEvent::DeviceConnected { transport }).await
            }
            ConnectBehavior::Fail(status) => {
                self.emit(CentralEvent::DeviceConnectionFailed { transport, status })
                    .await
            }
            ConnectBehavior::Disconnect(status) => {
                self.emit(CentralEvent::DeviceDisconnected { transport, status })
                    .await
            }
            ConnectBehavior::Error(_) | ConnectBehavior::Silent => {}
        }
        Ok(transport)
    }

    async fn discover_services(&self, transport: TransportId) -> Result<()> {
        lock(&self.calls).discoveries.push(transport);
        let (status, services) = {
            let script = self.script();
            (script.discovery_status, script.services.clone())
        };
        if let Some(status) = status {
            self.emit(CentralEvent::ServicesDiscovered {
                transport,
                status,
                services,
            })
            .await;
        }
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
        lock(&self.calls).writes.push(WriteCall {
            transport,
            service,
            characteristic,
            data: data.to_vec(),
            write_type,
        });
        self.write_started.notify_one();
        let (hold, behavior) = {
            let script = self.script();
            (script.hold_writes, script.write.clone())
        };
        if hold {
            match self.write_gate.acquire().await {
                Ok(permit) => permit.forget(),
                Err(e) => return Err(Error::transport(e)),
            }
        }
        match behavior {
            WriteBehavior::Accept => Ok(true),
            WriteBehavior::Reject => Ok(false),
            WriteBehavior::Error(message) => Err(Error::TransportError(message)),
        }
    }

    async fn close(&self, transport: TransportId) -> Result<()> {
        lock(&self.calls).closes.push(transport);
        Ok(())
    }
}

/// Permission gate with a switch and a check counter.
#[derive(Debug)]
pub struct FakeGate {
    granted: AtomicBool,
    checks: AtomicUsize,
}

impl FakeGate {
    pub fn new(granted: bool) -> Self {
        FakeGate {
            granted: AtomicBool::new(granted),
            checks: AtomicUsize::new(0),
        }
    }

    pub fn set_granted(&self, granted: bool) {
        self.granted.store(granted, Ordering::SeqCst);
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

impl PermissionGate for FakeGate {
    fn permissions_granted(&self) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.granted.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
