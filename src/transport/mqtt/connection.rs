//! Pure connection state management for the broker client
//!
//! This module contains the connection state enum, reconnect timing,
//! broker option construction and the refusal-code table.

use crate::config::{BridgeConfig, BrokerAddress, ProtocolVersion};
use crate::protocol::topics::{TopicKind, TopicResolver};
use rumqttc::{LastWill, MqttOptions, QoS, TlsConfiguration, Transport as RumqttcTransport};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Payload published to the last-will topic once connected
pub const LWT_CONNECTED: &str = "connected";
/// Payload of the last-will message and of the explicit shutdown notice
pub const LWT_DISCONNECTED: &str = "disconnected";

/// Largest packet accepted or sent; snapshots travel as base64 PNG
pub const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

/// Connection state of the broker link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Network loop started, waiting for the broker's acknowledgement
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

/// Delay schedule for re-polling after a transient network error
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delays in milliseconds, one per attempt
    pub backoff_pattern: Vec<u64>,
    /// Delay used once the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from_interval(Duration::from_secs(5))
    }
}

impl ReconnectConfig {
    /// Retry quickly once, then settle on `interval`
    pub fn from_interval(interval: Duration) -> Self {
        let sustained_delay = interval.as_millis() as u64;
        Self {
            backoff_pattern: vec![sustained_delay.min(1000)],
            sustained_delay,
        }
    }

    /// Calculate the delay before the given (1-based) attempt
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

/// Broker transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Publishing failed: {0}")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Disconnect failed: {0}")]
    DisconnectFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("TLS configuration error: {0}")]
    Tls(String),
    #[error("No async runtime available to drive the network loop")]
    NoRuntime,
}

/// Human-readable reason for a non-zero CONNACK return code
pub fn refusal_reason(code: u8) -> &'static str {
    match code {
        1 => "Connection to mqtt broker refused, wrong protocol version",
        2 => "Connection to mqtt broker refused, incorrect client identifier",
        3 => "Connection to mqtt broker refused, server unavailable",
        4 => "Connection to mqtt broker refused, bad username or password",
        5 => "Connection to mqtt broker refused, not authorised",
        _ => "Connection to mqtt broker refused, unknown error",
    }
}

/// Random `printago-<hex>` client id
pub fn generate_client_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("printago-{}", &uuid[..12])
}

/// Configured client id, or `fallback` when none is set
pub fn resolve_client_id(config: &BridgeConfig, fallback: &str) -> String {
    match config.client.client_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => fallback.to_string(),
    }
}

/// Build broker options from a configuration snapshot.
///
/// A fresh set of options is built for every connection attempt so TLS and
/// credential changes never touch a live client.
pub fn configure_mqtt_options(
    config: &BridgeConfig,
    address: &BrokerAddress,
    client_id: &str,
) -> Result<MqttOptions, MqttError> {
    let broker = &config.broker;
    let mut options = MqttOptions::new(client_id, address.host.clone(), address.port);

    options.set_keep_alive(Duration::from_secs(broker.keepalive.max(1)));
    options.set_clean_session(broker.clean_session);
    options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);

    if broker.protocol_version() == ProtocolVersion::V31 {
        tracing::debug!("MQTT 3.1 requested, negotiating MQTT 3.1.1");
    }

    if let Some(username) = broker.username.as_deref() {
        options.set_credentials(username, broker.password.as_deref().unwrap_or_default());
    }

    if broker.tls_active || address.tls_scheme {
        options.set_transport(configure_tls(config)?);
        if broker.tls_insecure {
            warn!("tls_insecure is not supported, server certificates are still verified");
        }
    }

    if let Some(lw_topic) = TopicResolver::new(config).resolve(TopicKind::LastWill) {
        options.set_last_will(LastWill::new(
            lw_topic,
            LWT_DISCONNECTED,
            QoS::AtLeastOnce,
            broker.lw_retain,
        ));
    }

    Ok(options)
}

fn configure_tls(config: &BridgeConfig) -> Result<RumqttcTransport, MqttError> {
    let tls = &config.broker.tls;

    let Some(ca_path) = tls.ca_certs.as_ref() else {
        if tls.certfile.is_some() || tls.keyfile.is_some() {
            return Err(MqttError::Tls(
                "client certificates require ca_certs to be set".to_string(),
            ));
        }
        return Ok(RumqttcTransport::tls_with_default_config());
    };

    let ca = std::fs::read(ca_path)
        .map_err(|e| MqttError::Tls(format!("failed to read {}: {e}", ca_path.display())))?;

    let client_auth = match (tls.certfile.as_ref(), tls.keyfile.as_ref()) {
        (Some(cert_path), Some(key_path)) => {
            let cert = std::fs::read(cert_path).map_err(|e| {
                MqttError::Tls(format!("failed to read {}: {e}", cert_path.display()))
            })?;
            let key = std::fs::read(key_path).map_err(|e| {
                MqttError::Tls(format!("failed to read {}: {e}", key_path.display()))
            })?;
            Some((cert, key))
        }
        (None, None) => None,
        _ => {
            return Err(MqttError::Tls(
                "certfile and keyfile must be set together".to_string(),
            ))
        }
    };

    Ok(RumqttcTransport::tls_with_config(TlsConfiguration::Simple {
        ca,
        alpn: None,
        client_auth,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_url(url: &str) -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.broker.url = Some(url.to_string());
        config
    }

    #[test]
    fn test_reconnect_config_from_interval() {
        let config = ReconnectConfig::from_interval(Duration::from_secs(5));
        assert_eq!(config.calculate_backoff_delay(1), 1000);
        assert_eq!(config.calculate_backoff_delay(2), 5000);
        assert_eq!(config.calculate_backoff_delay(50), 5000);
    }

    #[test]
    fn test_reconnect_config_short_interval() {
        let config = ReconnectConfig::from_interval(Duration::from_millis(200));
        assert_eq!(config.calculate_backoff_delay(1), 200);
        assert_eq!(config.calculate_backoff_delay(2), 200);
    }

    #[test]
    fn test_refusal_reasons() {
        assert_eq!(
            refusal_reason(1),
            "Connection to mqtt broker refused, wrong protocol version"
        );
        assert_eq!(
            refusal_reason(4),
            "Connection to mqtt broker refused, bad username or password"
        );
        assert_eq!(
            refusal_reason(5),
            "Connection to mqtt broker refused, not authorised"
        );
        assert_eq!(
            refusal_reason(42),
            "Connection to mqtt broker refused, unknown error"
        );
    }

    #[test]
    fn test_resolve_client_id() {
        let mut config = BridgeConfig::default();
        let generated = generate_client_id();
        assert!(generated.starts_with("printago-"));
        assert_eq!(generated.len(), "printago-".len() + 12);
        assert_eq!(resolve_client_id(&config, &generated), generated);

        config.client.client_id = Some("octopi".to_string());
        assert_eq!(resolve_client_id(&config, &generated), "octopi");
    }

    #[test]
    fn test_configure_mqtt_options() {
        let mut config = config_with_url("localhost");
        config.broker.username = Some("user".to_string());
        config.broker.password = Some("secret".to_string());
        config.broker.keepalive = 30;

        let address = config.broker.address().unwrap().unwrap();
        let options = configure_mqtt_options(&config, &address, "printago-test").unwrap();

        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
        assert_eq!(options.client_id(), "printago-test");

        let will = options.last_will().unwrap();
        assert_eq!(will.topic, "octoPrint/mqtt");
        assert_eq!(&will.message[..], LWT_DISCONNECTED.as_bytes());
        assert!(will.retain);
    }

    #[test]
    fn test_no_last_will_when_inactive() {
        let mut config = config_with_url("localhost");
        config.publish.lw_active = false;

        let address = config.broker.address().unwrap().unwrap();
        let options = configure_mqtt_options(&config, &address, "printago-test").unwrap();
        assert!(options.last_will().is_none());
    }

    #[test]
    fn test_missing_ca_file_is_a_tls_error() {
        let mut config = config_with_url("localhost");
        config.broker.tls_active = true;
        config.broker.tls.ca_certs = Some("/nonexistent/ca.pem".into());

        let address = config.broker.address().unwrap().unwrap();
        let result = configure_mqtt_options(&config, &address, "printago-test");
        assert!(matches!(result, Err(MqttError::Tls(_))));
    }

    #[test]
    fn test_mqtt_error_display() {
        let errors = vec![
            MqttError::PublishFailed("full".to_string().into()),
            MqttError::SubscriptionFailed("closed".to_string().into()),
            MqttError::InvalidBrokerUrl("bad".to_string()),
            MqttError::Tls("bad".to_string()),
            MqttError::NoRuntime,
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
