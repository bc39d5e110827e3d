//! Single-peripheral BLE session core.
//!
//! Finds one named peripheral, connects to it, resolves its services and
//! writes a one-shot command to a configured characteristic. The platform
//! radio stack sits behind [`api::central::CentralManager`]; everything that
//! drives it lives in [`session`].

pub mod api;
pub mod config;
mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod fake;
#[cfg(feature = "btleplug")]
pub mod platform;
pub mod session;
pub mod tag;

pub use error::{Error, Result};
