//! Message types exchanged with the broker
//!
//! Covers the outbound payload encoding rules, the Printago response
//! envelope and the loosely-typed inbound command envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Client type stamped on every response envelope
pub const CLIENT_TYPE: &str = "octoprint";

/// Prefix of the topics response envelopes are published to
pub const RESPONSE_TOPIC_PREFIX: &str = "octoprint";

/// Outbound payload before encoding
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Text, always sent verbatim
    Text(String),
    /// Opaque bytes, always sent verbatim
    Bytes(Vec<u8>),
    /// Structured value, JSON-encoded unless sent raw
    Value(Value),
    /// No payload at all. Sent raw this clears a retained message.
    Empty,
}

impl Payload {
    /// Encode the payload for the wire.
    ///
    /// Text and bytes go out unchanged. A structured value is JSON-encoded
    /// unless `raw` is set, in which case strings and numbers are sent as
    /// their plain text and `null` becomes an empty payload.
    pub fn encode(&self, raw: bool) -> Vec<u8> {
        match self {
            Payload::Text(text) => text.as_bytes().to_vec(),
            Payload::Bytes(bytes) => bytes.clone(),
            Payload::Value(Value::String(text)) => text.as_bytes().to_vec(),
            Payload::Value(Value::Null) if raw => Vec::new(),
            Payload::Value(Value::Number(n)) if raw => n.to_string().into_bytes(),
            Payload::Value(Value::Bool(b)) if raw => b.to_string().into_bytes(),
            Payload::Value(value) => value.to_string().into_bytes(),
            Payload::Empty if raw => Vec::new(),
            Payload::Empty => b"null".to_vec(),
        }
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Text(value.to_string())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Text(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload::Bytes(value)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Value(value)
    }
}

impl From<Option<Value>> for Payload {
    fn from(value: Option<Value>) -> Self {
        value.map(Payload::Value).unwrap_or(Payload::Empty)
    }
}

/// Kind of response envelope, also the last topic level it is published to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Status,
    Error,
    Success,
    Response,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Status => "status",
            MessageType::Error => "error",
            MessageType::Success => "success",
            MessageType::Response => "response",
        }
    }

    /// `octoprint/<type>`
    pub fn topic(&self) -> String {
        format!("{RESPONSE_TOPIC_PREFIX}/{}", self.as_str())
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope for every message sent back to Printago
///
/// # Examples
/// ```
/// use printago_connector::protocol::{MessageType, ResponseEnvelope};
/// use serde_json::json;
///
/// let envelope = ResponseEnvelope::new(MessageType::Error, "printer-1", json!({"error": "boom"}));
/// assert_eq!(envelope.topic(), "octoprint/error");
/// assert!(envelope.timestamp.ends_with('Z'));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseEnvelope {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// ISO-8601 UTC with a `Z` suffix
    pub timestamp: String,
    pub printer_id: String,
    pub client_type: String,
    pub data: Value,
}

impl ResponseEnvelope {
    pub fn new(message_type: MessageType, printer_id: &str, data: Value) -> Self {
        Self::at(message_type, printer_id, data, Utc::now())
    }

    /// Build an envelope stamped with a fixed time
    pub fn at(message_type: MessageType, printer_id: &str, data: Value, now: DateTime<Utc>) -> Self {
        Self {
            message_type,
            timestamp: format_timestamp(now),
            printer_id: printer_id.to_string(),
            client_type: CLIENT_TYPE.to_string(),
            data,
        }
    }

    pub fn topic(&self) -> String {
        self.message_type.topic()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// `2024-05-01T12:00:00.123456Z`
pub fn format_timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Inbound command as received, before validation
///
/// Field presence is checked in order by the command processor, so every
/// field stays optional here.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommandEnvelope {
    pub command_type: Option<String>,
    pub action: Option<String>,
    pub parameters: Option<Value>,
}

impl CommandEnvelope {
    /// Parse a raw broker payload. Anything that is not a JSON object is rejected.
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        let map: Map<String, Value> = serde_json::from_slice(payload)?;
        Ok(Self::from_map(map))
    }

    pub fn from_map(mut map: Map<String, Value>) -> Self {
        Self {
            command_type: map.remove("type").map(value_to_text),
            action: map.remove("action").map(value_to_text),
            parameters: map.remove("parameters"),
        }
    }
}

/// Strings lose their quotes; everything else keeps its JSON spelling
fn value_to_text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}
