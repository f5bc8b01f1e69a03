//! Broker transport
//!
//! The bridge core talks to the broker only through the [`Transport`] trait.
//! Every method is non-blocking: broker callbacks run on the network task that
//! drains the client's request channel, so awaiting that channel from a
//! callback would deadlock the connection.

use crate::transport::mqtt::MqttError;
use rumqttc::{AsyncClient, QoS, SubscribeFilter};

pub mod mqtt;

/// Non-blocking handle to a broker connection
pub trait Transport: Send + Sync {
    /// Hand one publish to the network task
    fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS, retain: bool)
        -> Result<(), MqttError>;

    /// Subscribe to several topic filters in one request
    fn subscribe_many(&self, topics: &[String], qos: QoS) -> Result<(), MqttError>;

    fn unsubscribe(&self, topic: &str) -> Result<(), MqttError>;

    /// Request a graceful disconnect after pending requests
    fn disconnect(&self) -> Result<(), MqttError>;
}

impl Transport for AsyncClient {
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError> {
        self.try_publish(topic, qos, retain, payload)
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))
    }

    fn subscribe_many(&self, topics: &[String], qos: QoS) -> Result<(), MqttError> {
        if topics.is_empty() {
            return Ok(());
        }
        let filters = topics
            .iter()
            .map(|topic| SubscribeFilter::new(topic.clone(), qos));
        self.try_subscribe_many(filters)
            .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), MqttError> {
        self.try_unsubscribe(topic)
            .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))
    }

    fn disconnect(&self) -> Result<(), MqttError> {
        self.try_disconnect()
            .map_err(|e| MqttError::DisconnectFailed(Box::new(e)))
    }
}
