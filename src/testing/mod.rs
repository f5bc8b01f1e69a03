//! Testing utilities and mock implementations
//!
//! Mocks for the broker transport and every host capability, so the bridge
//! can be tested without an MQTT broker or a printer host.

pub mod mocks;

pub use mocks::*;
