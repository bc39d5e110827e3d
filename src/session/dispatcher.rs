use log::{info, warn};

use crate::api::central::{CentralManager, TransportId};
use crate::config::{CommandTarget, UNLOCK_PAYLOAD};
use crate::session::connection::Connection;
use crate::{Error, Result};

/// Payload plus where to write it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub payload: Vec<u8>,
    pub target: CommandTarget,
    /// Tag token handed over before the session started; carried, never
    /// interpreted.
    pub token: Option<String>,
}

impl Command {
    pub fn new(payload: impl Into<Vec<u8>>, target: CommandTarget) -> Self {
        Self {
            payload: payload.into(),
            target,
            token: None,
        }
    }

    pub fn unlock(target: CommandTarget) -> Self {
        Self::new(UNLOCK_PAYLOAD, target)
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }
}

/// A command that passed every precondition and holds the connection's
/// single in-flight slot until [`complete`] is called.
#[derive(Debug)]
#[must_use]
pub struct PendingWrite {
    transport: TransportId,
    command: Command,
}

impl PendingWrite {
    pub fn transport(&self) -> TransportId {
        self.transport
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    /// Initiates the write. `Ok` means the stack accepted the bytes for
    /// transmission; the peripheral never confirms execution.
    pub async fn execute<C: CentralManager>(&self, central: &C) -> Result<()> {
        let target = &self.command.target;
        let result = central
            .write(
                self.transport,
                target.service,
                target.characteristic,
                &self.command.payload,
                target.write_type,
            )
            .await;
        match result {
            Ok(true) => {
                info!(
                    "{} bytes accepted for {}",
                    self.command.payload.len(),
                    target.characteristic
                );
                Ok(())
            }
            Ok(false) => {
                warn!("Write to {} was not initiated", target.characteristic);
                Err(Error::WriteInitiationFailed)
            }
            Err(e) => {
                warn!("Write to {} failed: {}", target.characteristic, e);
                Err(match e {
                    Error::TransportError(message) => Error::TransportError(message),
                    other => Error::transport(other),
                })
            }
        }
    }
}

/// Checks the preconditions of a send and claims the in-flight slot.
pub fn prepare(connection: &mut Connection, command: Command) -> Result<PendingWrite> {
    if !connection.is_ready() {
        return Err(Error::NotReady(connection.state()));
    }
    if connection.command_in_flight() {
        return Err(Error::CommandInFlight);
    }
    let target = command.target;
    let service = connection
        .capabilities()
        .service(&target.service)
        .ok_or(Error::ServiceNotFound(target.service))?;
    service
        .characteristic(&target.characteristic)
        .ok_or(Error::CharacteristicNotFound(target.characteristic))?;
    let transport = connection
        .transport()
        .ok_or(Error::NotReady(connection.state()))?;

    connection.set_command_in_flight(true);
    Ok(PendingWrite { transport, command })
}

/// Frees the in-flight slot, unless the connection has moved on to another
/// transport since the write was prepared.
pub fn complete(connection: &mut Connection, transport: TransportId) {
    if connection.transport() == Some(transport) {
        connection.set_command_in_flight(false);
    }
}

/// Prepare, write and complete in one go.
pub async fn send<C: CentralManager>(
    connection: &mut Connection,
    central: &C,
    command: Command,
) -> Result<()> {
    let write = prepare(connection, command)?;
    let result = write.execute(central).await;
    complete(connection, write.transport());
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::central_event::CentralEvent;
    use crate::api::peripheral::PeripheralHandle;
    use crate::api::service::Service;
    use crate::fake::{FakeCentral, Script, WriteBehavior};
    use crate::session::connection::{ConnectionOutcome, ConnectionState};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn target() -> CommandTarget {
        CommandTarget::esp32()
    }

    async fn ready(script: Script) -> (FakeCentral, Connection) {
        let (tx, mut events) = mpsc::channel::<CentralEvent>(64);
        let central = FakeCentral::new(tx, script);
        let mut connection = Connection::new();
        connection
            .connect(&central, PeripheralHandle::new("AA:02", Some("ESP_SMART_LOCK")))
            .await
            .unwrap();
        let mut outcome = None;
        while outcome.is_none() {
            let event = events.recv().await.unwrap();
            outcome = connection.handle_event(&central, &event).await;
        }
        assert_eq!(outcome, Some(ConnectionOutcome::Ready));
        (central, connection)
    }

    fn lock_services() -> Script {
        let target = target();
        Script {
            services: vec![Service::new(target.service, [target.characteristic])],
            ..Script::default()
        }
    }

    #[tokio::test]
    async fn writes_unlock_payload() {
        let (central, mut connection) = ready(lock_services()).await;

        send(&mut connection, &central, Command::unlock(target()))
            .await
            .unwrap();

        let writes = central.calls().writes;
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].data, b"unlock".to_vec());
        assert_eq!(writes[0].service, target().service);
        assert_eq!(writes[0].characteristic, target().characteristic);
        assert!(!connection.command_in_flight());
    }

    #[tokio::test]
    async fn not_ready_performs_no_write() {
        let (tx, _events) = mpsc::channel(8);
        let central = FakeCentral::new(tx, Script::default());
        let mut connection = Connection::new();

        let err = send(&mut connection, &central, Command::unlock(target()))
            .await
            .unwrap_err();

        assert_eq!(err, Error::NotReady(ConnectionState::Disconnected));
        assert!(central.calls().writes.is_empty());
    }

    #[tokio::test]
    async fn missing_characteristic_fails_fast() {
        let target = target();
        let (central, mut connection) = ready(Script {
            services: vec![Service::new(target.service, [Uuid::from_u128(0xdead)])],
            ..Script::default()
        })
        .await;

        let err = send(&mut connection, &central, Command::unlock(target))
            .await
            .unwrap_err();

        assert_eq!(err, Error::CharacteristicNotFound(target.characteristic));
        assert!(!connection.command_in_flight());
        assert!(central.calls().writes.is_empty());
    }

    #[tokio::test]
    async fn missing_service_fails_fast() {
        let (central, mut connection) = ready(Script::default()).await;

        let err = send(&mut connection, &central, Command::unlock(target()))
            .await
            .unwrap_err();

        assert_eq!(err, Error::ServiceNotFound(target().service));
        assert!(central.calls().writes.is_empty());
    }

    #[tokio::test]
    async fn rejected_and_failed_writes() {
        let (central, mut connection) = ready(lock_services()).await;

        central.script().write = WriteBehavior::Reject;
        let err = send(&mut connection, &central, Command::unlock(target()))
            .await
            .unwrap_err();
        assert_eq!(err, Error::WriteInitiationFailed);
        assert!(!connection.command_in_flight());

        central.script().write = WriteBehavior::Error("GATT busy".into());
        let err = send(&mut connection, &central, Command::unlock(target()))
            .await
            .unwrap_err();
        assert_eq!(err, Error::TransportError("GATT busy".into()));
        assert!(!connection.command_in_flight());
    }

    #[tokio::test]
    async fn second_command_is_rejected_while_first_in_flight() {
        let (central, mut connection) = ready(lock_services()).await;

        let first = prepare(&mut connection, Command::unlock(target())).unwrap();
        let second = prepare(&mut connection, Command::unlock(target()));
        assert_eq!(second.unwrap_err(), Error::CommandInFlight);

        assert_eq!(first.execute(&central).await, Ok(()));
        complete(&mut connection, first.transport());
        assert!(!connection.command_in_flight());
        assert_eq!(central.calls().writes.len(), 1);

        let third = prepare(&mut connection, Command::unlock(target())).unwrap();
        complete(&mut connection, third.transport());
    }

    #[test]
    fn token_is_carried_unmodified() {
        let command = Command::unlock(target()).with_token(Some("tag-42".into()));
        assert_eq!(command.token.as_deref(), Some("tag-42"));
        assert_eq!(command.payload, b"unlock".to_vec());
    }
}
