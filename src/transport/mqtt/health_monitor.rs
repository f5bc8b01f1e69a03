//! Pure connection-state transitions and reconnect decisions
//!
//! The network loop reports what happened as a [`ConnectionEvent`]; this
//! module decides the next [`ConnectionState`] and whether, and when, to poll
//! the broker again.

use super::connection::{refusal_reason, ConnectionState, ReconnectConfig};
use tracing::{error, info};

/// Something that happened to the broker link
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// A new network loop was started
    ConnectStarted,
    /// CONNACK with the given return code
    ConnAckReceived(u8),
    /// Disconnect with a return code, 0 meaning we asked for it
    Disconnected(u8),
}

/// What the network loop should do after a transient failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectionDecision {
    Proceed { attempt: u32, delay_ms: u64 },
    AbortShutdownRequested,
}

/// Pure health monitoring and reconnection decision logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Determine the next state after a connection event
    pub fn determine_next_state(event: &ConnectionEvent) -> ConnectionState {
        match event {
            ConnectionEvent::ConnectStarted => ConnectionState::Connecting,
            ConnectionEvent::ConnAckReceived(0) => {
                info!("Connected to mqtt broker");
                ConnectionState::Connected
            }
            ConnectionEvent::ConnAckReceived(code) => {
                error!(return_code = code, "{}", refusal_reason(*code));
                ConnectionState::Disconnected
            }
            ConnectionEvent::Disconnected(0) => {
                info!("Disconnected from mqtt broker");
                ConnectionState::Disconnected
            }
            ConnectionEvent::Disconnected(rc) => {
                error!(
                    "Disconnected from mqtt broker for unknown reasons (network error?), rc = {}",
                    rc
                );
                ConnectionState::Disconnected
            }
        }
    }

    /// Decide whether to keep polling after a transient failure.
    ///
    /// Transient failures are retried indefinitely; only shutdown stops the loop.
    pub fn should_attempt_reconnection(
        current_attempts: u32,
        config: &ReconnectConfig,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        let attempt = current_attempts.saturating_add(1);
        ReconnectionDecision::Proceed {
            attempt,
            delay_ms: config.calculate_backoff_delay(attempt),
        }
    }

    /// Only a connected link accepts publishes directly
    pub fn can_publish(state: ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }
}
