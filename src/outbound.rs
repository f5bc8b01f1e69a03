//! Outbound gateway
//!
//! Serializes payloads, resolves the retain flag and hands the result to the
//! [`ConnectionManager`], which either sends it or queues it.

use crate::config::ConfigHandle;
use crate::protocol::messages::Payload;
use crate::transport::mqtt::ConnectionManager;
use rumqttc::QoS;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

/// Per-publish options; defaults are QoS 0, global retain, no queueing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOptions {
    /// Explicit retain flag; `None` falls back to the broker setting
    pub retain: Option<bool>,
    pub qos: QoS,
    /// Queue the message while disconnected instead of dropping it
    pub allow_queueing: bool,
    /// Send the payload as-is instead of serializing it
    pub raw: bool,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            retain: None,
            qos: QoS::AtMostOnce,
            allow_queueing: false,
            raw: false,
        }
    }
}

impl PublishOptions {
    pub fn retain(mut self, retain: bool) -> Self {
        self.retain = Some(retain);
        self
    }

    pub fn qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub fn queued(mut self) -> Self {
        self.allow_queueing = true;
        self
    }

    pub fn raw(mut self) -> Self {
        self.raw = true;
        self
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PublishError {
    #[error("Payload must be a mapping to receive a timestamp, got {0}")]
    NotAMapping(&'static str),
}

/// Entry point for everything the bridge publishes
#[derive(Clone)]
pub struct OutboundGateway {
    manager: Arc<ConnectionManager>,
    config: ConfigHandle,
}

impl OutboundGateway {
    pub fn new(manager: Arc<ConnectionManager>, config: ConfigHandle) -> Self {
        Self { manager, config }
    }

    /// Publish `payload` on `topic`.
    ///
    /// Returns `false` when the message was dropped because the bridge is not
    /// connected and queueing was not allowed.
    pub fn publish(&self, topic: &str, payload: impl Into<Payload>, options: PublishOptions) -> bool {
        let payload = payload.into().encode(options.raw);
        let retain = options
            .retain
            .unwrap_or_else(|| self.config.snapshot().broker.retain);

        trace!(topic = %topic, bytes = payload.len(), retain, "Publishing");
        self.manager
            .dispatch(topic, payload, options.qos, retain, options.allow_queueing)
    }

    /// Publish a JSON mapping with the configured timestamp field injected.
    ///
    /// `Null` is treated as an empty mapping. `timestamp` replays a captured
    /// time; otherwise the current Unix time in seconds is used.
    pub fn publish_with_timestamp(
        &self,
        topic: &str,
        payload: Value,
        options: PublishOptions,
        timestamp: Option<i64>,
    ) -> Result<bool, PublishError> {
        let mut data = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => return Err(PublishError::NotAMapping(json_kind(&other))),
        };

        let fieldname = self.config.snapshot().timestamp_fieldname.clone();
        let timestamp = timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp());
        data.insert(fieldname, Value::from(timestamp));

        let options = PublishOptions {
            raw: false,
            ..options
        };
        Ok(self.publish(topic, Value::Object(data), options))
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::observability::metrics::BridgeMetrics;
    use crate::routing::SubscriptionTable;
    use crate::testing::mocks::MockTransport;
    use serde_json::json;

    fn connected_gateway(config: BridgeConfig) -> (OutboundGateway, Arc<MockTransport>) {
        let handle = ConfigHandle::new(config);
        let manager = Arc::new(ConnectionManager::new(
            handle.clone(),
            Arc::new(SubscriptionTable::new()),
            Arc::new(BridgeMetrics::new()),
        ));
        let transport = Arc::new(MockTransport::new());
        let generation = manager.attach(transport.clone());
        manager.handle_connack(generation, 0);
        transport.clear();
        (OutboundGateway::new(manager, handle), transport)
    }

    #[test]
    fn test_publish_serializes_objects() {
        let (gateway, transport) = connected_gateway(BridgeConfig::default());

        assert!(gateway.publish("a/b", json!({"x": 1}), PublishOptions::default()));

        let sent = transport.published_to("a/b");
        assert_eq!(sent[0].payload, br#"{"x":1}"#.to_vec());
    }

    #[test]
    fn test_retain_resolution() {
        let mut config = BridgeConfig::default();
        config.broker.retain = false;
        let (gateway, transport) = connected_gateway(config);

        gateway.publish("a", "x", PublishOptions::default());
        gateway.publish("b", "x", PublishOptions::default().retain(true));

        assert!(!transport.published_to("a")[0].retain);
        assert!(transport.published_to("b")[0].retain);
    }

    #[test]
    fn test_raw_null_is_empty_payload() {
        let (gateway, transport) = connected_gateway(BridgeConfig::default());

        gateway.publish("meta/key", Payload::Empty, PublishOptions::default().raw());

        assert!(transport.published_to("meta/key")[0].payload.is_empty());
    }

    #[test]
    fn test_publish_with_timestamp_injects_field() {
        let (gateway, transport) = connected_gateway(BridgeConfig::default());

        let sent = gateway
            .publish_with_timestamp("a", json!({"k": "v"}), PublishOptions::default(), Some(1700000000))
            .unwrap();
        assert!(sent);

        let body: Value = serde_json::from_slice(&transport.published_to("a")[0].payload).unwrap();
        assert_eq!(body, json!({"k": "v", "_timestamp": 1700000000}));
    }

    #[test]
    fn test_publish_with_timestamp_custom_fieldname() {
        let mut config = BridgeConfig::default();
        config.timestamp_fieldname = "ts".to_string();
        let (gateway, transport) = connected_gateway(config);

        gateway
            .publish_with_timestamp("a", Value::Null, PublishOptions::default().raw(), None)
            .unwrap();

        let body: Value = serde_json::from_slice(&transport.published_to("a")[0].payload).unwrap();
        assert!(body["ts"].is_i64());
    }

    #[test]
    fn test_publish_with_timestamp_rejects_non_mappings() {
        let (gateway, transport) = connected_gateway(BridgeConfig::default());

        let result = gateway.publish_with_timestamp("a", json!([1, 2]), PublishOptions::default(), None);

        assert_eq!(result, Err(PublishError::NotAMapping("an array")));
        assert!(transport.published().is_empty());
    }
}
