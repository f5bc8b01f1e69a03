//! Crate-level error type
//!
//! Each layer has its own `thiserror` enum; [`BridgeError`] wraps them for the
//! entry points that cross layers (startup, settings changes, the CLI).

use crate::commands::CommandError;
use crate::config::ConfigError;
use crate::outbound::PublishError;
use crate::transport::mqtt::MqttError;
use thiserror::Error;

/// Main error type for bridge operations
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("MQTT error: {0}")]
    Mqtt(#[from] MqttError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_errors_keep_their_message() {
        let error: BridgeError = ConfigError::InvalidBrokerUrl("::".to_string()).into();
        assert_eq!(error.to_string(), "Configuration error: Invalid broker URL: ::");

        let error: BridgeError = CommandError::MissingType.into();
        assert_eq!(
            error.to_string(),
            "Command error: No command type specified in the received message."
        );

        let error: BridgeError = PublishError::NotAMapping("list").into();
        assert!(error.to_string().starts_with("Publish error: Payload must be a mapping"));
    }
}
