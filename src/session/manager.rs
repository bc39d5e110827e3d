use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, error, info, trace, warn};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::{oneshot, watch};

use crate::api::central::{CentralManager, PermissionGate, TransportId};
use crate::api::central_event::{CentralEvent, CentralState};
use crate::api::peripheral::PeripheralHandle;
use crate::api::session_event::{SessionEvent, SessionState};
use crate::config::SessionConfig;
use crate::session::connection::{Connection, ConnectionOutcome, ConnectionState};
use crate::session::discovery::{self, DiscoveryStep, DiscoveryStrategy, strategy_for};
use crate::session::dispatcher::{self, Command};
use crate::session::timer::DeadlineTimer;
use crate::{Error, Result};

const COMMAND_QUEUE: usize = 16;

#[derive(Debug)]
pub enum SessionCommand {
    ConnectOnly {
        name: String,
        responder: oneshot::Sender<Result<PeripheralHandle>>,
    },
    ConnectAndSend {
        name: String,
        payload: Vec<u8>,
        responder: oneshot::Sender<Result<()>>,
    },
    Send {
        payload: Vec<u8>,
        responder: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        responder: oneshot::Sender<Result<()>>,
    },
    SetTagToken {
        token: Option<String>,
        responder: oneshot::Sender<Result<()>>,
    },
}

/// The caller waiting on the session that is being set up.
#[derive(Debug)]
enum PendingRequest {
    Connect(oneshot::Sender<Result<PeripheralHandle>>),
    ConnectAndSend {
        payload: Vec<u8>,
        responder: oneshot::Sender<Result<()>>,
    },
}

impl PendingRequest {
    fn fail(self, reason: Error) {
        match self {
            PendingRequest::Connect(responder) => {
                let _ = responder.send(Err(reason));
            }
            PendingRequest::ConnectAndSend { responder, .. } => {
                let _ = responder.send(Err(reason));
            }
        }
    }
}

#[derive(Debug)]
struct Session {
    name: String,
    token: Option<String>,
    request: Option<PendingRequest>,
}

#[derive(Debug)]
struct WriteCompletion {
    transport: TransportId,
    token: Option<String>,
    result: Result<()>,
}

/// Cloneable front of a running [`SessionManager`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: Sender<SessionCommand>,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    /// Finds `name` and connects to it.
    pub async fn connect_only(&self, name: impl Into<String>) -> Result<PeripheralHandle> {
        let name = name.into();
        self.request(|responder| SessionCommand::ConnectOnly { name, responder })
            .await
    }

    /// Finds `name`, connects and writes `payload` as soon as the connection
    /// is ready.
    pub async fn connect_and_send(
        &self,
        name: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Result<()> {
        let name = name.into();
        let payload = payload.into();
        self.request(|responder| SessionCommand::ConnectAndSend {
            name,
            payload,
            responder,
        })
        .await
    }

    /// Writes `payload` on the current, ready connection.
    pub async fn send(&self, payload: impl Into<Vec<u8>>) -> Result<()> {
        let payload = payload.into();
        self.request(|responder| SessionCommand::Send { payload, responder })
            .await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.request(|responder| SessionCommand::Disconnect { responder })
            .await
    }

    /// Token from a proximity tag, attached to the commands of the next session.
    pub async fn set_tag_token(&self, token: Option<String>) -> Result<()> {
        self.request(|responder| SessionCommand::SetTagToken { token, responder })
            .await
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> SessionCommand,
    ) -> Result<T> {
        let (responder, response) = oneshot::channel();
        self.commands
            .send(build(responder))
            .await
            .map_err(|_| Error::SessionClosed)?;
        response.await.map_err(|_| Error::SessionClosed)?
    }
}

/// Single-writer actor that owns the session, its connection and the
/// discovery strategy. Commands, radio events, write completions and the
/// discovery deadline are applied one at a time.
pub struct SessionManager<C: CentralManager, G: PermissionGate> {
    central: Arc<C>,
    gate: G,
    config: SessionConfig,
    commands: Receiver<SessionCommand>,
    events: Receiver<CentralEvent>,
    notifier: Sender<SessionEvent>,
    state: watch::Sender<SessionState>,
    completion_tx: Sender<WriteCompletion>,
    completions: Receiver<WriteCompletion>,
    discovery: Box<dyn DiscoveryStrategy<C>>,
    timer: DeadlineTimer,
    connection: Connection,
    session: Option<Session>,
    tag_token: Option<String>,
    in_flight: HashMap<TransportId, oneshot::Sender<Result<()>>>,
}

impl<C: CentralManager, G: PermissionGate> SessionManager<C, G> {
    /// Starts the manager on the current tokio runtime.
    pub fn spawn(
        central: Arc<C>,
        events: Receiver<CentralEvent>,
        gate: G,
        config: SessionConfig,
        notifier: Sender<SessionEvent>,
    ) -> SessionHandle {
        let (command_tx, commands) = mpsc::channel(COMMAND_QUEUE);
        let (state, state_rx) = watch::channel(SessionState::Idle);
        let (completion_tx, completions) = mpsc::channel(COMMAND_QUEUE);
        let manager = SessionManager {
            discovery: strategy_for(&config),
            central,
            gate,
            config,
            commands,
            events,
            notifier,
            state,
            completion_tx,
            completions,
            timer: DeadlineTimer::new(),
            connection: Connection::new(),
            session: None,
            tag_token: None,
            in_flight: HashMap::new(),
        };
        tokio::spawn(manager.run());
        SessionHandle {
            commands: command_tx,
            state: state_rx,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(event) = self.events.recv() => self.handle_central_event(event).await,
                Some(done) = self.completions.recv() => self.handle_write_completion(done),
                _ = self.timer.expired() => {
                    let step = self.discovery.on_deadline(&*self.central).await;
                    self.handle_discovery_step(step).await;
                }
            }
        }
        debug!("All session handles dropped, shutting down");
        self.timer.cancel();
        self.discovery.cancel(&*self.central).await;
        self.connection.disconnect(&*self.central).await;
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::ConnectOnly { name, responder } => {
                self.start_session(name, PendingRequest::Connect(responder))
                    .await;
            }
            SessionCommand::ConnectAndSend {
                name,
                payload,
                responder,
            } => {
                self.start_session(name, PendingRequest::ConnectAndSend { payload, responder })
                    .await;
            }
            SessionCommand::Send { payload, responder } => {
                self.dispatch(payload, responder);
            }
            SessionCommand::Disconnect { responder } => {
                self.disconnect().await;
                let _ = responder.send(Ok(()));
            }
            SessionCommand::SetTagToken { token, responder } => {
                debug!("Tag token {}", if token.is_some() { "set" } else { "cleared" });
                self.tag_token = token;
                let _ = responder.send(Ok(()));
            }
        }
    }

    async fn start_session(&mut self, name: String, request: PendingRequest) {
        if self.session.is_some() || self.connection.state().holds_transport() {
            warn!("Rejecting session for {}: one is already active", name);
            request.fail(Error::SessionBusy);
            return;
        }
        if !self.gate.permissions_granted() {
            self.reject(request, Error::PermissionDenied);
            return;
        }
        match self.central.adapter_state().await {
            Ok(CentralState::PoweredOn) => {}
            Ok(state) => {
                debug!("Adapter state {:?}", state);
                self.reject(request, Error::RadioDisabled);
                return;
            }
            Err(e) => {
                self.reject(request, e);
                return;
            }
        }

        info!("Starting session for {}", name);
        self.connection = Connection::new();
        self.session = Some(Session {
            name: name.clone(),
            token: self.tag_token.take(),
            request: Some(request),
        });
        self.set_state(SessionState::Discovering { name: name.clone() });

        let step =
            discovery::begin(&*self.central, &mut *self.discovery, &mut self.timer, &name).await;
        self.handle_discovery_step(step).await;
    }

    fn reject(&mut self, request: PendingRequest, reason: Error) {
        warn!("{}", reason);
        self.set_state(SessionState::Failed {
            reason: reason.clone(),
        });
        request.fail(reason);
    }

    async fn handle_discovery_step(&mut self, step: DiscoveryStep) {
        match step {
            DiscoveryStep::Pending => {}
            DiscoveryStep::Found(peripheral) => {
                self.timer.cancel();
                if !self.gate.permissions_granted() {
                    self.fail_session(Error::PermissionDenied);
                    return;
                }
                self.set_state(SessionState::Connecting {
                    peripheral: peripheral.clone(),
                });
                if let Err(e) = self.connection.connect(&*self.central, peripheral).await {
                    self.fail_session(e);
                }
            }
            DiscoveryStep::Failed(reason) => {
                self.timer.cancel();
                self.fail_session(reason);
            }
        }
    }

    async fn handle_central_event(&mut self, event: CentralEvent) {
        trace!("central event {:?}", event);
        if self.discovery.is_active() {
            let step = self.discovery.on_event(&*self.central, &event).await;
            self.handle_discovery_step(step).await;
            return;
        }

        let before = self.connection.state();
        let outcome = self.connection.handle_event(&*self.central, &event).await;
        let peripheral = self.connection.peripheral().cloned();
        match outcome {
            None => {
                if before != ConnectionState::DiscoveringCapabilities
                    && self.connection.state() == ConnectionState::DiscoveringCapabilities
                {
                    if let Some(peripheral) = peripheral {
                        self.set_state(SessionState::DiscoveringCapabilities { peripheral });
                    }
                }
            }
            Some(ConnectionOutcome::Ready) => {
                let Some(peripheral) = peripheral else {
                    return;
                };
                self.set_state(SessionState::Ready {
                    peripheral: peripheral.clone(),
                });
                let request = self.session.as_mut().and_then(|s| s.request.take());
                match request {
                    Some(PendingRequest::Connect(responder)) => {
                        let _ = responder.send(Ok(peripheral));
                    }
                    Some(PendingRequest::ConnectAndSend { payload, responder }) => {
                        self.dispatch(payload, responder);
                    }
                    None => {}
                }
            }
            Some(ConnectionOutcome::Failed(reason)) => self.fail_session(reason),
            Some(ConnectionOutcome::Disconnected { status }) => {
                if let Some(session) = self.session.take() {
                    info!("Session for {} ended by peripheral", session.name);
                    if let Some(request) = session.request {
                        request.fail(Error::ConnectionFailed(status));
                    }
                }
                self.set_state(SessionState::Disconnected);
            }
        }
    }

    fn dispatch(&mut self, payload: Vec<u8>, responder: oneshot::Sender<Result<()>>) {
        let token = self.session.as_ref().and_then(|s| s.token.clone());
        let command = Command::new(payload, self.config.command).with_token(token.clone());
        let write = match dispatcher::prepare(&mut self.connection, command) {
            Ok(write) => write,
            Err(reason) => {
                warn!("Command rejected: {}", reason);
                if reason != Error::CommandInFlight {
                    self.notify(SessionEvent::CommandCompleted {
                        token,
                        result: Err(reason.clone()),
                    });
                }
                let _ = responder.send(Err(reason));
                return;
            }
        };

        if let Some(peripheral) = self.connection.peripheral().cloned() {
            self.set_state(SessionState::Sending { peripheral });
        }
        self.in_flight.insert(write.transport(), responder);

        let central = Arc::clone(&self.central);
        let completions = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = write.execute(&*central).await;
            let done = WriteCompletion {
                transport: write.transport(),
                token: write.command().token.clone(),
                result,
            };
            if completions.send(done).await.is_err() {
                debug!("Session manager gone before write completed");
            }
        });
    }

    fn handle_write_completion(&mut self, done: WriteCompletion) {
        dispatcher::complete(&mut self.connection, done.transport);
        match &done.result {
            Ok(()) => info!("Command sent"),
            Err(e) => warn!("Command failed: {}", e),
        }
        if let Some(responder) = self.in_flight.remove(&done.transport) {
            let _ = responder.send(done.result.clone());
        }
        self.notify(SessionEvent::CommandCompleted {
            token: done.token,
            result: done.result,
        });
        if self.connection.is_ready() && self.connection.transport() == Some(done.transport) {
            if let Some(peripheral) = self.connection.peripheral().cloned() {
                self.set_state(SessionState::Ready { peripheral });
            }
        }
    }

    async fn disconnect(&mut self) {
        self.timer.cancel();
        self.discovery.cancel(&*self.central).await;

        let active = self.session.is_some() || self.connection.state().holds_transport();
        if self.connection.state().holds_transport() {
            self.set_state(SessionState::Disconnecting);
        }
        self.connection.disconnect(&*self.central).await;

        if let Some(session) = self.session.take() {
            info!("Session for {} closed", session.name);
            if let Some(request) = session.request {
                request.fail(Error::Cancelled);
            }
        }
        if active {
            self.set_state(SessionState::Disconnected);
        }
    }

    fn fail_session(&mut self, reason: Error) {
        warn!("Session failed: {}", reason);
        self.timer.cancel();
        if let Some(session) = self.session.take() {
            if let Some(request) = session.request {
                request.fail(reason.clone());
            }
        }
        self.set_state(SessionState::Failed { reason });
    }

    fn set_state(&mut self, state: SessionState) {
        debug!("session -> {:?}", state);
        self.state.send_replace(state.clone());
        self.notify(SessionEvent::StateChanged(state));
    }

    // Presentation updates are fire-and-forget.
    fn notify(&self, event: SessionEvent) {
        match self.notifier.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                error!("Notification channel full, dropping {:?}", event);
            }
            Err(TrySendError::Closed(_)) => {
                trace!("No presentation listener");
            }
        }
    }
}
