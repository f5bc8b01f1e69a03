//! Remote commands from Printago
//!
//! A command arrives as `{type, action, parameters}`. [`Command::parse`] turns
//! a validated envelope into a typed command; [`processor::CommandProcessor`]
//! executes it against the host and reports the outcome through a
//! [`Responder`].

pub mod camera;
pub mod download;
pub mod processor;

pub use camera::SnapshotError;
pub use download::DownloadError;
pub use processor::CommandProcessor;

use crate::config::ConfigHandle;
use crate::host::HostError;
use crate::outbound::{OutboundGateway, PublishOptions};
use crate::protocol::messages::{MessageType, ResponseEnvelope};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, error};

pub const PRINTER_CONTROL: &str = "printer_control";
pub const TEMPERATURE_CONTROL: &str = "temperature_control";
pub const MOVEMENT_CONTROL: &str = "movement_control";
pub const CAMERA_CONTROL: &str = "camera_control";

/// Everything that can go wrong with a command. The Display text is what
/// Printago receives in the error envelope.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Error processing message {0}")]
    Malformed(String),
    #[error("No command type specified in the received message.")]
    MissingType,
    #[error("No action specified for {command_type} command.")]
    MissingAction { command_type: String },
    #[error("No parameters specified for {action} action.")]
    MissingParameters { action: String },
    #[error("Unknown Printago command type: {0}")]
    UnknownType(String),
    #[error("Unknown action for {command_type}: {action}")]
    UnknownAction { command_type: String, action: String },
    #[error("Invalid parameters for {action}: {reason}")]
    InvalidParameters { action: String, reason: String },

    #[error("No URL provided for downloading file.")]
    MissingUrl,
    #[error("No file name provided for starting print.")]
    MissingFileName,
    #[error("File does not exist: {0}")]
    FileNotFound(String),
    #[error("Target temperature not provided for setting hotend temperature.")]
    MissingHotendTemperature,
    #[error("Target temperature not provided for setting bed temperature.")]
    MissingBedTemperature,
    #[error("Invalid axes data provided for jogging.")]
    InvalidJogAxes,
    #[error("Invalid amount provided for extrusion.")]
    InvalidExtrusionAmount,
    #[error("Invalid axes specified for homing: {0}")]
    InvalidHomeAxes(String),
    #[error("No webcam provider or name specified for webcam snapshot.")]
    MissingSnapshotTarget,

    #[error("{context}: {source}")]
    HostFailure {
        context: &'static str,
        #[source]
        source: HostError,
    },
    #[error("Error downloading file: {0}")]
    Download(#[from] DownloadError),
    #[error("Error capturing webcam snapshot: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("No async runtime available for {0}")]
    NoRuntime(&'static str),
}

impl CommandError {
    pub fn host(context: &'static str) -> impl FnOnce(HostError) -> Self {
        move |source| Self::HostFailure { context, source }
    }
}

/// Outcome of a successful command, one envelope each
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Success(String),
    Response(Value),
    Status(Value),
}

impl Reply {
    pub fn success(message: impl Into<String>) -> Self {
        Self::Success(message.into())
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Reply::Success(_) => MessageType::Success,
            Reply::Response(_) => MessageType::Response,
            Reply::Status(_) => MessageType::Status,
        }
    }

    pub fn data(&self) -> Value {
        match self {
            Reply::Success(message) => Value::String(message.clone()),
            Reply::Response(data) | Reply::Status(data) => data.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PrinterCommand {
    DownloadGcode { url: String },
    Pause,
    Resume,
    Stop,
    GetStatus,
    StartPrint { file_name: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemperatureCommand {
    SetHotend { heater: String, temperature: f64 },
    SetBed { temperature: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum MovementCommand {
    Jog {
        axes: BTreeMap<String, f64>,
        relative: bool,
        speed: Option<f64>,
        tags: Vec<String>,
    },
    Extrude {
        amount: f64,
        speed: Option<f64>,
        tags: Vec<String>,
    },
    Home { axes: Vec<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CameraCommand {
    GetProviders,
    Snapshot {
        provider_id: String,
        camera_name: String,
    },
}

/// A validated command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Printer(PrinterCommand),
    Temperature(TemperatureCommand),
    Movement(MovementCommand),
    Camera(CameraCommand),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DownloadParameters {
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StartPrintParameters {
    file_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HotendParameters {
    temperature: Option<f64>,
    tool: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BedParameters {
    temperature: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct JogParameters {
    axes: Option<BTreeMap<String, f64>>,
    relative: bool,
    speed: Option<f64>,
    tags: Vec<String>,
}

impl Default for JogParameters {
    fn default() -> Self {
        Self {
            axes: None,
            relative: true,
            speed: None,
            tags: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExtrudeParameters {
    amount: Option<f64>,
    speed: Option<f64>,
    tags: Vec<String>,
}

/// Home axes as a list or a comma-separated string
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AxesSpec {
    List(Vec<String>),
    Csv(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HomeParameters {
    axes: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SnapshotParameters {
    camera_provider_id: Option<String>,
    camera_name: Option<String>,
}

fn parameters<T: DeserializeOwned>(action: &str, parameters: &Value) -> Result<T, CommandError> {
    let value = match parameters {
        Value::Null => Value::Object(Map::new()),
        other => other.clone(),
    };
    serde_json::from_value(value).map_err(|e| CommandError::InvalidParameters {
        action: action.to_string(),
        reason: e.to_string(),
    })
}

/// `tool0` for 0, `tool1` for "1", and so on
fn heater_name(tool: Option<&Value>) -> String {
    match tool {
        None | Some(Value::Null) => "tool0".to_string(),
        Some(Value::String(s)) => format!("tool{s}"),
        Some(other) => format!("tool{other}"),
    }
}

/// Lowercased, trimmed, non-empty axis names
pub fn normalize_axes(axes: &Value) -> Option<Vec<String>> {
    let parsed: AxesSpec = serde_json::from_value(axes.clone()).ok()?;
    let raw = match parsed {
        AxesSpec::List(list) => list,
        AxesSpec::Csv(csv) => csv.split(',').map(str::to_string).collect(),
    };
    let axes: Vec<String> = raw
        .iter()
        .map(|axis| axis.trim().to_lowercase())
        .filter(|axis| !axis.is_empty())
        .collect();
    (!axes.is_empty()).then_some(axes)
}

impl Command {
    /// Route `(type, action, parameters)` to a typed command
    pub fn parse(command_type: &str, action: &str, params: &Value) -> Result<Self, CommandError> {
        let unknown_action = || CommandError::UnknownAction {
            command_type: command_type.to_string(),
            action: action.to_string(),
        };

        match command_type {
            PRINTER_CONTROL => {
                let command = match action {
                    "download_gcode" => {
                        let p: DownloadParameters = parameters(action, params)?;
                        PrinterCommand::DownloadGcode {
                            url: p.url.filter(|u| !u.is_empty()).ok_or(CommandError::MissingUrl)?,
                        }
                    }
                    "pause_print" => PrinterCommand::Pause,
                    "resume_print" => PrinterCommand::Resume,
                    "stop_print" => PrinterCommand::Stop,
                    "get_status" => PrinterCommand::GetStatus,
                    "start_print" => {
                        let p: StartPrintParameters = parameters(action, params)?;
                        PrinterCommand::StartPrint {
                            file_name: p
                                .file_name
                                .filter(|f| !f.is_empty())
                                .ok_or(CommandError::MissingFileName)?,
                        }
                    }
                    _ => return Err(unknown_action()),
                };
                Ok(Command::Printer(command))
            }
            TEMPERATURE_CONTROL => {
                let command = match action {
                    "set_hotend" => {
                        let p: HotendParameters = parameters(action, params)?;
                        TemperatureCommand::SetHotend {
                            heater: heater_name(p.tool.as_ref()),
                            temperature: p
                                .temperature
                                .ok_or(CommandError::MissingHotendTemperature)?,
                        }
                    }
                    "set_bed" => {
                        let p: BedParameters = parameters(action, params)?;
                        TemperatureCommand::SetBed {
                            temperature: p.temperature.ok_or(CommandError::MissingBedTemperature)?,
                        }
                    }
                    _ => return Err(unknown_action()),
                };
                Ok(Command::Temperature(command))
            }
            MOVEMENT_CONTROL => {
                let command = match action {
                    "jog" => {
                        let p: JogParameters = parameters(action, params)?;
                        let axes = p
                            .axes
                            .filter(|axes| !axes.is_empty())
                            .ok_or(CommandError::InvalidJogAxes)?;
                        MovementCommand::Jog {
                            axes,
                            relative: p.relative,
                            speed: p.speed,
                            tags: p.tags,
                        }
                    }
                    "extrude" => {
                        let p: ExtrudeParameters = parameters(action, params)?;
                        MovementCommand::Extrude {
                            amount: p.amount.ok_or(CommandError::InvalidExtrusionAmount)?,
                            speed: p.speed,
                            tags: p.tags,
                        }
                    }
                    "home" => {
                        let p: HomeParameters = parameters(action, params)?;
                        let raw = p.axes.unwrap_or(Value::Null);
                        let axes = normalize_axes(&raw)
                            .ok_or_else(|| CommandError::InvalidHomeAxes(raw.to_string()))?;
                        MovementCommand::Home { axes }
                    }
                    _ => return Err(unknown_action()),
                };
                Ok(Command::Movement(command))
            }
            CAMERA_CONTROL => {
                let command = match action {
                    "get_providers" => CameraCommand::GetProviders,
                    "snapshot" => {
                        let p: SnapshotParameters = parameters(action, params)?;
                        match (p.camera_provider_id, p.camera_name) {
                            (Some(provider_id), Some(camera_name)) => CameraCommand::Snapshot {
                                provider_id,
                                camera_name,
                            },
                            _ => return Err(CommandError::MissingSnapshotTarget),
                        }
                    }
                    _ => return Err(unknown_action()),
                };
                Ok(Command::Camera(command))
            }
            other => Err(CommandError::UnknownType(other.to_string())),
        }
    }
}

/// Publishes response envelopes to `octoprint/<type>`
#[derive(Clone)]
pub struct Responder {
    gateway: OutboundGateway,
    config: ConfigHandle,
}

impl Responder {
    pub fn new(gateway: OutboundGateway, config: ConfigHandle) -> Self {
        Self { gateway, config }
    }

    pub fn send(&self, message_type: MessageType, data: Value) -> bool {
        let printer_id = self.config.snapshot().printago.printer_id.clone();
        let envelope = ResponseEnvelope::new(message_type, &printer_id, data);

        match envelope.to_json() {
            Ok(json) => {
                debug!(topic = %envelope.topic(), "Sending {} envelope", message_type);
                self.gateway
                    .publish(&envelope.topic(), json, PublishOptions::default())
            }
            Err(e) => {
                error!(error = %e, "Failed to serialize response envelope");
                false
            }
        }
    }

    pub fn reply(&self, reply: &Reply) -> bool {
        self.send(reply.message_type(), reply.data())
    }

    pub fn error(&self, error: &CommandError) -> bool {
        self.send(MessageType::Error, json!({ "error": error.to_string() }))
    }
}
