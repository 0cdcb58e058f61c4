//! host-powerd - Host power controller for x86 server BMCs
//!
//! This crate owns the physical power-up / power-down / reset sequencing of
//! the managed host, exposes control and status on the system message bus,
//! and reflects front-panel button activity onto the same bus.

pub mod config;
pub mod dbus;
pub mod error;
pub mod gpio;
pub mod pch;
pub mod persist;
pub mod power;
pub mod sio;

pub use error::{PowerError, Result};
