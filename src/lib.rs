//! Printago Connector
//!
//! An MQTT bridge between a 3D-printer control host and the Printago cloud.
//!
//! # Overview
//!
//! The bridge translates host lifecycle and telemetry events into broker
//! messages, and broker-delivered Printago commands into host operations:
//! - Broker connection with last-will notices, resubscription and an
//!   outbound queue that survives disconnects
//! - Topic-filter based inbound dispatch with isolated callbacks
//! - Event classification, temperature throttling, progress and metadata
//! - Command validation and execution with per-command success/error replies
//!
//! The host is reached only through the capability traits in [`host`].
//!
//! # Quick Start
//!
//! ```rust
//! use printago_connector::protocol::{TopicKind, TopicResolver};
//! use printago_connector::BridgeConfig;
//!
//! let config = BridgeConfig::default();
//! let template = TopicResolver::new(&config).resolve(TopicKind::Event).unwrap();
//! assert_eq!(template, "octoPrint/event/{event}");
//! ```

pub mod bridge;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod host;
pub mod observability;
pub mod outbound;
pub mod protocol;
pub mod routing;
pub mod testing;
pub mod transport;

pub use bridge::Bridge;
pub use commands::{Command, CommandError, CommandProcessor, Reply};
pub use config::*;
pub use error::{BridgeError, BridgeResult};
pub use host::{HostServices, TemperatureSink};
pub use outbound::{OutboundGateway, PublishOptions};
pub use protocol::*;
pub use transport::mqtt::{ConnectionManager, ConnectionState};
