//! Broker-facing message types and topic handling
//!
//! Topic templates and wildcard matching live in [`topics`]; payload encoding
//! and the Printago envelopes live in [`messages`].

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
