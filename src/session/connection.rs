use log::{debug, info, warn};

use crate::api::central::{CentralManager, TransportId};
use crate::api::central_event::{CentralEvent, GATT_SUCCESS};
use crate::api::peripheral::PeripheralHandle;
use crate::api::service::Capabilities;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    DiscoveringCapabilities,
    Ready,
    Disconnecting,
    Failed,
}

/// Inputs to the connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Connect,
    TransportConnected,
    TransportDisconnected,
    ConnectError,
    CapabilitiesResolved,
    CapabilitiesFailed,
    DisconnectRequested,
    Released,
}

impl ConnectionState {
    /// The single transition function. `None` means the input is not valid
    /// in this state and must be ignored.
    pub fn next(self, transition: Transition) -> Option<ConnectionState> {
        use ConnectionState::*;
        use Transition::*;

        match (self, transition) {
            (Disconnected, Connect) => Some(Connecting),
            (Connecting, TransportConnected) => Some(DiscoveringCapabilities),
            (Connecting, TransportDisconnected) => Some(Disconnected),
            (Connecting, ConnectError) => Some(Failed),
            (DiscoveringCapabilities, CapabilitiesResolved) => Some(Ready),
            (DiscoveringCapabilities, CapabilitiesFailed) => Some(Failed),
            // Link loss mid-resolution is a resolution failure.
            (DiscoveringCapabilities, TransportDisconnected) => Some(Failed),
            (Connecting | DiscoveringCapabilities | Ready, DisconnectRequested) => {
                Some(Disconnecting)
            }
            (Ready, TransportDisconnected) => Some(Disconnected),
            (Disconnecting, Released | TransportDisconnected) => Some(Disconnected),
            _ => None,
        }
    }

    /// States in which the connection owns a live transport.
    pub fn holds_transport(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::DiscoveringCapabilities
                | ConnectionState::Ready
                | ConnectionState::Disconnecting
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Failed)
    }
}

/// What a transport event did to the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionOutcome {
    Ready,
    Failed(Error),
    Disconnected { status: i32 },
}

/// One peripheral connection, from connect to teardown.
///
/// The transport id never leaves this type except to the command
/// dispatcher, and it is closed exactly once, on the way into
/// `Disconnected` or `Failed`.
#[derive(Debug)]
pub struct Connection {
    state: ConnectionState,
    peripheral: Option<PeripheralHandle>,
    transport: Option<TransportId>,
    capabilities: Capabilities,
    command_in_flight: bool,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            peripheral: None,
            transport: None,
            capabilities: Capabilities::default(),
            command_in_flight: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn peripheral(&self) -> Option<&PeripheralHandle> {
        self.peripheral.as_ref()
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    pub fn command_in_flight(&self) -> bool {
        self.command_in_flight
    }

    pub(crate) fn transport(&self) -> Option<TransportId> {
        self.transport
    }

    pub(crate) fn set_command_in_flight(&mut self, in_flight: bool) {
        self.command_in_flight = in_flight;
    }

    fn apply(&mut self, transition: Transition) -> bool {
        match self.state.next(transition) {
            Some(next) => {
                debug!("connection {:?} -> {:?} ({:?})", self.state, next, transition);
                self.state = next;
                true
            }
            None => {
                warn!(
                    "Ignoring {:?} while connection is {:?}",
                    transition, self.state
                );
                false
            }
        }
    }

    /// Starts connecting. The result arrives later through
    /// [`handle_event`](Self::handle_event).
    pub async fn connect<C: CentralManager>(
        &mut self,
        central: &C,
        peripheral: PeripheralHandle,
    ) -> Result<()> {
        if self.state != ConnectionState::Disconnected {
            return Err(Error::InvalidState(self.state));
        }
        info!("Connecting to {}", peripheral);
        self.apply(Transition::Connect);
        let result = central.connect(&peripheral).await;
        self.peripheral = Some(peripheral);
        match result {
            Ok(transport) => {
                debug!("{} issued", transport);
                self.transport = Some(transport);
                Ok(())
            }
            Err(e) => {
                warn!("Connect failed: {}", e);
                self.apply(Transition::ConnectError);
                Err(e)
            }
        }
    }

    /// Applies one radio event. Events for any transport other than the one
    /// currently held are stale and ignored.
    pub async fn handle_event<C: CentralManager>(
        &mut self,
        central: &C,
        event: &CentralEvent,
    ) -> Option<ConnectionOutcome> {
        let transport = event.transport()?;
        if self.transport != Some(transport) {
            debug!("Ignoring stale event for {}", transport);
            return None;
        }

        let (transition, status) = match event {
            CentralEvent::DeviceConnected { .. } => (Transition::TransportConnected, GATT_SUCCESS),
            CentralEvent::DeviceConnectionFailed { status, .. } => {
                (Transition::ConnectError, *status)
            }
            CentralEvent::DeviceDisconnected { status, .. } => {
                (Transition::TransportDisconnected, *status)
            }
            CentralEvent::ServicesDiscovered { status, .. } if *status == GATT_SUCCESS => {
                (Transition::CapabilitiesResolved, *status)
            }
            CentralEvent::ServicesDiscovered { status, .. } => {
                (Transition::CapabilitiesFailed, *status)
            }
            _ => return None,
        };
        if !self.apply(transition) {
            return None;
        }

        match self.state {
            ConnectionState::DiscoveringCapabilities => {
                info!("Connected, discovering services");
                if let Err(e) = central.discover_services(transport).await {
                    warn!("Service discovery could not start: {}", e);
                    self.apply(Transition::CapabilitiesFailed);
                    self.release(central).await;
                    return Some(ConnectionOutcome::Failed(e));
                }
                None
            }
            ConnectionState::Ready => {
                if let CentralEvent::ServicesDiscovered { services, .. } = event {
                    self.capabilities = Capabilities::new(services.clone());
                }
                info!(
                    "Ready with {} services",
                    self.capabilities.services().len()
                );
                Some(ConnectionOutcome::Ready)
            }
            ConnectionState::Failed => {
                let reason = match transition {
                    Transition::CapabilitiesFailed => Error::CapabilityDiscoveryFailed(status),
                    _ => Error::ConnectionFailed(status),
                };
                warn!("Connection failed: {}", reason);
                self.release(central).await;
                Some(ConnectionOutcome::Failed(reason))
            }
            ConnectionState::Disconnected => {
                info!("Disconnected (status {})", status);
                self.release(central).await;
                Some(ConnectionOutcome::Disconnected { status })
            }
            ConnectionState::Connecting | ConnectionState::Disconnecting => None,
        }
    }

    /// Tears the connection down from any state. Idempotent.
    pub async fn disconnect<C: CentralManager>(&mut self, central: &C) {
        if self.state.is_terminal() {
            self.release(central).await;
            return;
        }
        info!("Disconnecting from {:?}", self.state);
        self.apply(Transition::DisconnectRequested);
        self.release(central).await;
        self.apply(Transition::Released);
    }

    async fn release<C: CentralManager>(&mut self, central: &C) {
        if let Some(transport) = self.transport.take() {
            debug!("Closing {}", transport);
            if let Err(e) = central.close(transport).await {
                warn!("Failed to close {}: {}", transport, e);
            }
        }
        self.capabilities.clear();
        self.command_in_flight = false;
    }
}
