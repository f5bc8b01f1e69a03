//! Bridge configuration
//!
//! The configuration mirrors the settings surface of the host plugin: broker
//! connection parameters, per-feature publish topics and active flags, the
//! Printago command channel, and a handful of runtime knobs. Every field has a
//! default so a minimal file only needs `[broker] url`.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// Complete bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub publish: PublishSection,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub printago: PrintagoSection,
    #[serde(default)]
    pub health: HealthSection,
    /// Name of the field injected into timestamped payloads
    #[serde(default = "default_timestamp_fieldname")]
    pub timestamp_fieldname: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            broker: BrokerSection::default(),
            publish: PublishSection::default(),
            client: ClientSection::default(),
            printago: PrintagoSection::default(),
            health: HealthSection::default(),
            timestamp_fieldname: default_timestamp_fieldname(),
        }
    }
}

/// Broker connection parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrokerSection {
    /// Broker host name or `mqtt://` / `mqtts://` URL. `None` keeps the bridge inert.
    pub url: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Keep-alive interval in seconds
    pub keepalive: u64,
    pub tls_active: bool,
    pub tls: TlsSection,
    pub tls_insecure: bool,
    /// "MQTTv31" or "MQTTv311"
    pub protocol: String,
    /// Global retain policy for publishes that do not set one explicitly
    pub retain: bool,
    /// Retain flag for the last-will messages
    pub lw_retain: bool,
    pub clean_session: bool,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            url: None,
            port: 1883,
            username: None,
            password: None,
            keepalive: 60,
            tls_active: false,
            tls: TlsSection::default(),
            tls_insecure: false,
            protocol: "MQTTv31".to_string(),
            retain: true,
            lw_retain: true,
            clean_session: true,
        }
    }
}

/// TLS material, all paths optional
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct TlsSection {
    pub ca_certs: Option<PathBuf>,
    pub certfile: Option<PathBuf>,
    pub keyfile: Option<PathBuf>,
}

/// Publish topics, active flags and telemetry tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PublishSection {
    pub base_topic: String,

    pub event_topic: String,
    pub event_active: bool,
    /// Attach the host's full current data to progress messages
    pub printer_data: bool,
    pub events: EventClassFlags,
    /// Events that keep the global retain flag instead of being forced non-retained
    pub retained_events: Vec<String>,

    pub progress_topic: String,
    pub progress_active: bool,

    pub temperature_topic: String,
    pub temperature_active: bool,
    pub temperature_threshold: f64,

    pub metadata_topic: String,
    pub metadata_active: bool,
    /// Comma-separated dotted paths into the per-file metadata
    pub metadata_keys: String,

    pub lw_topic: String,
    pub lw_active: bool,

    /// Optional cap on the offline queue; oldest entries are dropped on overflow
    pub queue_capacity: Option<usize>,
}

impl Default for PublishSection {
    fn default() -> Self {
        Self {
            base_topic: "octoPrint/".to_string(),
            event_topic: "event/{event}".to_string(),
            event_active: true,
            printer_data: false,
            events: EventClassFlags::default(),
            retained_events: vec!["ZChange".to_string(), "FirmwareData".to_string()],
            progress_topic: "progress/{progress}".to_string(),
            progress_active: true,
            temperature_topic: "temperature/{temp}".to_string(),
            temperature_active: true,
            temperature_threshold: 1.0,
            metadata_topic: "metadata/{key}".to_string(),
            metadata_active: false,
            metadata_keys: String::new(),
            lw_topic: "mqtt".to_string(),
            lw_active: true,
            queue_capacity: None,
        }
    }
}

impl PublishSection {
    /// Metadata keys, trimmed, de-duplicated, in configuration order
    pub fn metadata_key_list(&self) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        for key in self.metadata_keys.split(',').map(str::trim) {
            if !key.is_empty() && !keys.iter().any(|k| k == key) {
                keys.push(key.to_string());
            }
        }
        keys
    }
}

/// Per-class lifecycle event switches
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EventClassFlags {
    pub server: bool,
    pub comm: bool,
    pub files: bool,
    pub printjob: bool,
    pub gcode: bool,
    pub position: bool,
    pub timelapse: bool,
    pub slicing: bool,
    pub settings: bool,
    pub unclassified: bool,
}

impl Default for EventClassFlags {
    fn default() -> Self {
        Self {
            server: true,
            comm: true,
            files: true,
            printjob: true,
            gcode: true,
            position: true,
            timelapse: true,
            slicing: true,
            settings: true,
            unclassified: true,
        }
    }
}

/// MQTT client identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ClientSection {
    pub client_id: Option<String>,
}

/// Printago command channel settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PrintagoSection {
    pub printer_id: String,
    pub command_topic: String,
    /// Delay before re-polling the broker after a transient network error, in seconds
    pub reconnect_interval: u64,
    /// Progress poll period in seconds
    pub progress_interval: u64,
    /// Storage folder that Printago-managed files live in
    pub file_prefix: String,
}

impl Default for PrintagoSection {
    fn default() -> Self {
        Self {
            printer_id: String::new(),
            command_topic: "octoprint/commands".to_string(),
            reconnect_interval: 5,
            progress_interval: 5,
            file_prefix: "Printago/".to_string(),
        }
    }
}

/// Optional HTTP health endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct HealthSection {
    pub port: Option<u16>,
}

fn default_timestamp_fieldname() -> String {
    "_timestamp".to_string()
}

/// MQTT protocol level requested by the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    V31,
    V311,
}

impl ProtocolVersion {
    /// Unknown names fall back to 3.1, matching the host plugin
    pub fn parse(s: &str) -> Self {
        match s {
            "MQTTv311" => ProtocolVersion::V311,
            _ => ProtocolVersion::V31,
        }
    }
}

/// Where the broker lives, resolved from `broker.url` and `broker.port`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    /// True when the URL scheme itself asks for TLS (`mqtts://`)
    pub tls_scheme: bool,
}

impl BrokerSection {
    /// Resolve the broker address. Returns `Ok(None)` when no URL is configured.
    pub fn address(&self) -> Result<Option<BrokerAddress>, ConfigError> {
        let Some(raw) = self.url.as_deref().map(str::trim) else {
            return Ok(None);
        };
        if raw.is_empty() {
            return Ok(None);
        }

        if !raw.contains("://") {
            return Ok(Some(BrokerAddress {
                host: raw.to_string(),
                port: self.port,
                tls_scheme: false,
            }));
        }

        let url = Url::parse(raw).map_err(|_| ConfigError::InvalidBrokerUrl(raw.to_string()))?;
        let tls_scheme = match url.scheme() {
            "mqtt" | "tcp" => false,
            "mqtts" | "ssl" => true,
            _ => return Err(ConfigError::InvalidBrokerUrl(raw.to_string())),
        };
        let host = url
            .host_str()
            .ok_or_else(|| ConfigError::InvalidBrokerUrl(raw.to_string()))?
            .to_string();
        let port = url.port().unwrap_or(if tls_scheme { 8883 } else { self.port });

        Ok(Some(BrokerAddress {
            host,
            port,
            tls_scheme,
        }))
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        ProtocolVersion::parse(&self.protocol)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BridgeConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the bridge cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.broker.address()?;

        if self.publish.temperature_threshold < 0.0 {
            return Err(ConfigError::InvalidConfig(
                "publish.temperature_threshold must not be negative".to_string(),
            ));
        }
        if self.printago.reconnect_interval == 0 {
            return Err(ConfigError::InvalidConfig(
                "printago.reconnect_interval must be greater than 0".to_string(),
            ));
        }
        if self.printago.progress_interval == 0 {
            return Err(ConfigError::InvalidConfig(
                "printago.progress_interval must be greater than 0".to_string(),
            ));
        }
        if self.printago.command_topic.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "printago.command_topic must not be empty".to_string(),
            ));
        }
        if self.publish.queue_capacity == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "publish.queue_capacity must be greater than 0 when set".to_string(),
            ));
        }
        if self.timestamp_fieldname.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "timestamp_fieldname must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Whether switching from `old` to `new` requires a fresh broker connection.
    ///
    /// Broker parameters, client identity, and the last-will flag or topic all
    /// end up baked into the connection handle.
    pub fn connection_changed(old: &BridgeConfig, new: &BridgeConfig) -> bool {
        old.broker != new.broker
            || old.client != new.client
            || old.publish.lw_active != new.publish.lw_active
            || old.lw_topic() != new.lw_topic()
    }

    /// Resolved last-will topic, if last-will is active
    pub fn lw_topic(&self) -> Option<String> {
        crate::protocol::topics::TopicResolver::new(self)
            .resolve(crate::protocol::topics::TopicKind::LastWill)
    }
}

/// Shared, swappable configuration.
///
/// Readers take an `Arc` snapshot and never hold the lock while working, so a
/// settings change never blocks the network task.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<BridgeConfig>>>,
}

impl ConfigHandle {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// Current configuration snapshot
    pub fn snapshot(&self) -> Arc<BridgeConfig> {
        self.inner.read().clone()
    }

    /// Swap in a new configuration and return the previous one
    pub fn replace(&self, config: BridgeConfig) -> Arc<BridgeConfig> {
        std::mem::replace(&mut *self.inner.write(), Arc::new(config))
    }
}
