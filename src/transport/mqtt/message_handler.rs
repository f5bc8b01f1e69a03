//! Pure routing of network-loop results
//!
//! Every `EventLoop::poll` result is classified into an [`EventRoute`] before
//! the client acts on it, which keeps the async loop itself trivial.

use bytes::Bytes;
use rumqttc::{ConnectReturnCode, ConnectionError, Event, Outgoing, Packet, QoS};

/// Message delivered by the broker on a subscribed topic
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub retained: bool,
    pub qos: QoS,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retained: false,
            qos: QoS::AtMostOnce,
        }
    }
}

/// Routing decisions for network-loop results
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// CONNACK with return code 0
    ConnectionAcknowledged,
    /// Broker refused the connection with a non-zero return code
    ConnectionRefused(u8),
    MessageReceived(InboundMessage),
    SubscriptionConfirmed { packet_id: u16 },
    /// Our own DISCONNECT went out; the loop is done
    GracefulDisconnect,
    /// Broker dropped us or the socket failed
    NetworkError(String),
    /// PingResp, PubAck and friends
    InfrastructureEvent(String),
    OutgoingEvent,
}

/// Pure routing decisions for broker events
pub struct MessageHandler;

impl MessageHandler {
    /// Classify one `EventLoop::poll` result
    pub fn route(result: Result<Event, ConnectionError>) -> EventRoute {
        match result {
            Ok(event) => Self::route_mqtt_event(&event),
            Err(ConnectionError::ConnectionRefused(code)) => {
                EventRoute::ConnectionRefused(return_code_number(code))
            }
            Err(error) => EventRoute::NetworkError(error.to_string()),
        }
    }

    /// Classify a successfully polled event
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => match ack.code {
                ConnectReturnCode::Success => EventRoute::ConnectionAcknowledged,
                code => EventRoute::ConnectionRefused(return_code_number(code)),
            },
            Event::Incoming(Packet::Publish(publish)) => {
                EventRoute::MessageReceived(InboundMessage {
                    topic: publish.topic.clone(),
                    payload: publish.payload.clone(),
                    retained: publish.retain,
                    qos: publish.qos,
                })
            }
            Event::Incoming(Packet::SubAck(suback)) => EventRoute::SubscriptionConfirmed {
                packet_id: suback.pkid,
            },
            Event::Incoming(Packet::Disconnect) => {
                EventRoute::NetworkError("broker sent DISCONNECT".to_string())
            }
            Event::Incoming(other) => EventRoute::InfrastructureEvent(format!("{other:?}")),
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::GracefulDisconnect,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }
}

/// Numeric CONNACK return code as defined by MQTT 3.1.1
pub fn return_code_number(code: ConnectReturnCode) -> u8 {
    match code {
        ConnectReturnCode::Success => 0,
        ConnectReturnCode::RefusedProtocolVersion => 1,
        ConnectReturnCode::BadClientId => 2,
        ConnectReturnCode::ServiceUnavailable => 3,
        ConnectReturnCode::BadUserNamePassword => 4,
        ConnectReturnCode::NotAuthorized => 5,
    }
}
