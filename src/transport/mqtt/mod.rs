//! MQTT 3.1.1 broker connection
//!
//! Split the same way throughout: pure decision logic lives in
//! [`connection`], [`message_handler`] and [`health_monitor`], while
//! [`client`] owns the network task and applies those decisions.
//!
//! - [`connection`] - connection state, reconnect timing and broker options
//! - [`message_handler`] - classification of network-loop results
//! - [`health_monitor`] - state transitions and reconnect decisions
//! - [`client`] - the [`ConnectionManager`] and its network task

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

pub use client::{ConnectionListener, ConnectionManager, DisconnectOptions, QueuedMessage};
pub use connection::{ConnectionState, MqttError, ReconnectConfig};
pub use health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
pub use message_handler::{EventRoute, InboundMessage, MessageHandler};
