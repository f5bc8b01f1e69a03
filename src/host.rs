//! Capabilities the bridge needs from the printer host
//!
//! The bridge never drives hardware itself. Everything it does to the printer,
//! its file storage or its cameras goes through these traits, which the host
//! application implements. Calls are synchronous because they run inside
//! broker callbacks.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Failure reported by a host capability
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HostError {
    #[error("{0}")]
    Operation(String),
    #[error("Printer is not operational")]
    NotOperational,
    #[error("File not found: {0}")]
    FileNotFound(String),
    #[error("Webcam provider not found: {0}")]
    ProviderNotFound(String),
}

impl HostError {
    pub fn operation(message: impl Into<String>) -> Self {
        Self::Operation(message.into())
    }
}

pub type HostResult<T> = Result<T, HostError>;

/// Where a file lives on the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileDestination {
    Local,
    Sdcard,
}

impl FileDestination {
    pub fn parse(origin: &str) -> Option<Self> {
        match origin {
            "local" => Some(Self::Local),
            "sdcard" => Some(Self::Sdcard),
            _ => None,
        }
    }
}

/// Printer operations reachable from remote commands
pub trait PrinterControl: Send + Sync {
    fn pause_print(&self) -> HostResult<()>;
    fn resume_print(&self) -> HostResult<()>;
    fn cancel_print(&self) -> HostResult<()>;
    fn select_file(&self, path: &str, sd: bool, print_after_select: bool) -> HostResult<()>;
    /// `heater` is `tool0`, `tool1`, ... or `bed`
    fn set_temperature(&self, heater: &str, value: f64) -> HostResult<()>;
    fn jog(
        &self,
        axes: &BTreeMap<String, f64>,
        relative: bool,
        speed: Option<f64>,
        tags: &[String],
    ) -> HostResult<()>;
    fn extrude(&self, amount: f64, speed: Option<f64>, tags: &[String]) -> HostResult<()>;
    fn home(&self, axes: &[String]) -> HostResult<()>;

    fn state_id(&self) -> Option<String>;
    fn state_string(&self) -> Option<String>;
    /// Current job/progress/state data as reported by the host
    fn current_data(&self) -> Option<Value>;
    fn current_temperatures(&self) -> Option<Value>;
    fn current_job(&self) -> Option<Value>;
}

/// Host file storage
pub trait FileStorage: Send + Sync {
    fn file_exists(&self, destination: FileDestination, path: &str) -> bool;
    /// Store `contents` at `path`, returning the stored path
    fn add_file(&self, destination: FileDestination, path: &str, contents: Vec<u8>) -> HostResult<String>;
    /// Per-file metadata map (analysis results and the like)
    fn additional_metadata(&self, destination: FileDestination, path: &str) -> Option<Map<String, Value>>;
}

/// Description of one webcam
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebcamInfo {
    pub name: String,
    pub display_name: String,
    pub can_snapshot: bool,
}

/// A source of webcams, usually one host plugin
pub trait WebcamProvider: Send + Sync {
    fn webcams(&self) -> Vec<WebcamInfo>;
    /// Encoded still image from the named webcam
    fn take_snapshot(&self, webcam_name: &str) -> HostResult<Vec<u8>>;
}

/// All webcam providers known to the host, keyed by id
pub trait WebcamRegistry: Send + Sync {
    fn providers(&self) -> Vec<(String, Arc<dyn WebcamProvider>)>;

    fn provider(&self, id: &str) -> Option<Arc<dyn WebcamProvider>> {
        self.providers()
            .into_iter()
            .find_map(|(provider_id, provider)| (provider_id == id).then_some(provider))
    }
}

/// One sensor reading
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TemperatureReading {
    pub actual: Option<f64>,
    pub target: Option<f64>,
}

impl TemperatureReading {
    pub fn new(actual: Option<f64>, target: Option<f64>) -> Self {
        Self { actual, target }
    }
}

/// A batch of readings as delivered by the host's temperature callback
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TemperatureUpdate {
    /// Host timestamp of the readings, Unix seconds
    pub time: Option<i64>,
    pub sensors: BTreeMap<String, TemperatureReading>,
}

/// Receiver of the host's temperature callback
pub trait TemperatureSink: Send + Sync {
    fn on_temperatures(&self, update: &TemperatureUpdate);
}

/// Everything the bridge needs from the host
#[derive(Clone)]
pub struct HostServices {
    pub printer: Arc<dyn PrinterControl>,
    pub files: Arc<dyn FileStorage>,
    pub webcams: Arc<dyn WebcamRegistry>,
}
