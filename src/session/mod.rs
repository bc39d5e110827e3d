//! Discovery, connection lifecycle and command dispatch for one peripheral.

pub mod connection;
pub mod discovery;
pub mod dispatcher;
pub mod manager;
pub mod timer;

pub use connection::{Connection, ConnectionState};
pub use dispatcher::Command;
pub use manager::{SessionHandle, SessionManager};
