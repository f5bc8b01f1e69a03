//! Command execution
//!
//! One inbound message is one command. The processor validates the envelope
//! fields in order, parses the typed [`Command`], runs it against the host
//! and publishes exactly one outcome per host operation. Nothing here ever
//! propagates a failure back into the network task.

use super::camera;
use super::download::{self, DownloadError};
use super::{
    CameraCommand, Command, CommandError, MovementCommand, PrinterCommand, Reply, Responder,
    TemperatureCommand,
};
use crate::command_span;
use crate::config::ConfigHandle;
use crate::host::{FileDestination, HostServices};
use crate::observability::metrics::BridgeMetrics;
use crate::protocol::messages::CommandEnvelope;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{error, info, warn};

/// Result of running a command
#[derive(Debug, PartialEq)]
pub enum Execution {
    /// Finished; these replies go out in order
    Completed(Vec<Reply>),
    /// Handed to a background task that reports on its own
    Spawned,
}

pub struct CommandProcessor {
    responder: Responder,
    host: HostServices,
    config: ConfigHandle,
    metrics: Arc<BridgeMetrics>,
    runtime: Option<Handle>,
    http: reqwest::Client,
}

impl CommandProcessor {
    /// Captures the current Tokio runtime, if any, for background downloads
    pub fn new(
        responder: Responder,
        host: HostServices,
        config: ConfigHandle,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        Self {
            responder,
            host,
            config,
            metrics,
            runtime: Handle::try_current().ok(),
            http: reqwest::Client::new(),
        }
    }

    /// Handle one raw broker payload and publish the outcome.
    ///
    /// Returns whether the command succeeded (or was accepted for
    /// background execution).
    pub fn process(&self, payload: &[u8]) -> bool {
        let span = command_span!(bytes = payload.len());
        let _enter = span.enter();

        match self.handle(payload) {
            Ok(Execution::Completed(replies)) => {
                for reply in &replies {
                    self.responder.reply(reply);
                }
                self.metrics.command_processed(true);
                true
            }
            Ok(Execution::Spawned) => true,
            Err(e) => {
                error!(error = %e, "Printago command failed");
                self.responder.error(&e);
                self.metrics.command_processed(false);
                false
            }
        }
    }

    /// Validate, parse and execute without publishing anything
    pub fn handle(&self, payload: &[u8]) -> Result<Execution, CommandError> {
        let envelope =
            CommandEnvelope::parse(payload).map_err(|e| CommandError::Malformed(e.to_string()))?;
        let command = Self::validate(envelope)?;
        self.execute(command)
    }

    /// Field presence checks, in order, then typed parsing
    pub fn validate(envelope: CommandEnvelope) -> Result<Command, CommandError> {
        let command_type = envelope.command_type.ok_or(CommandError::MissingType)?;
        let action = envelope.action.ok_or_else(|| CommandError::MissingAction {
            command_type: command_type.clone(),
        })?;
        let parameters = envelope
            .parameters
            .ok_or_else(|| CommandError::MissingParameters {
                action: action.clone(),
            })?;

        info!(command_type = %command_type, action = %action, "Processing Printago command");
        Command::parse(&command_type, &action, &parameters)
    }

    pub fn execute(&self, command: Command) -> Result<Execution, CommandError> {
        match command {
            Command::Printer(command) => self.printer_control(command),
            Command::Temperature(command) => self.temperature_control(command).map(completed),
            Command::Movement(command) => self.movement_control(command).map(completed),
            Command::Camera(command) => self.camera_control(command).map(Execution::Completed),
        }
    }

    fn printer_control(&self, command: PrinterCommand) -> Result<Execution, CommandError> {
        let printer = &self.host.printer;
        let reply = match command {
            PrinterCommand::DownloadGcode { url } => return self.spawn_download(url),
            PrinterCommand::Pause => {
                printer
                    .pause_print()
                    .map_err(CommandError::host("Error pausing print"))?;
                Reply::success("Print paused command issued successfully.")
            }
            PrinterCommand::Resume => {
                printer
                    .resume_print()
                    .map_err(CommandError::host("Error resuming print"))?;
                Reply::success("Print resumed command issued successfully.")
            }
            PrinterCommand::Stop => {
                printer
                    .cancel_print()
                    .map_err(CommandError::host("Error stopping print"))?;
                Reply::success("Print stop command issued successfully.")
            }
            PrinterCommand::GetStatus => Reply::Status(self.printer_status()),
            PrinterCommand::StartPrint { file_name } => {
                let prefix = self.config.snapshot().printago.file_prefix.clone();
                let path = if file_name.starts_with(&prefix) {
                    file_name
                } else {
                    format!("{prefix}{file_name}")
                };

                if !self.host.files.file_exists(FileDestination::Local, &path) {
                    info!(path = %path, "Requested print file does not exist");
                    return Err(CommandError::FileNotFound(path));
                }
                printer
                    .select_file(&path, false, true)
                    .map_err(CommandError::host("Error starting print"))?;
                Reply::success("Print start command issued successfully.")
            }
        };
        Ok(completed(reply))
    }

    fn temperature_control(&self, command: TemperatureCommand) -> Result<Reply, CommandError> {
        match command {
            TemperatureCommand::SetHotend {
                heater,
                temperature,
            } => {
                self.host
                    .printer
                    .set_temperature(&heater, temperature)
                    .map_err(CommandError::host("Error setting hotend temperature"))?;
                Ok(Reply::success("Hotend temperature command issued successfully."))
            }
            TemperatureCommand::SetBed { temperature } => {
                self.host
                    .printer
                    .set_temperature("bed", temperature)
                    .map_err(CommandError::host("Error setting bed temperature"))?;
                Ok(Reply::success("Bed temperature command issued successfully."))
            }
        }
    }

    fn movement_control(&self, command: MovementCommand) -> Result<Reply, CommandError> {
        let printer = &self.host.printer;
        match command {
            MovementCommand::Jog {
                axes,
                relative,
                speed,
                tags,
            } => {
                printer
                    .jog(&axes, relative, speed, &tags)
                    .map_err(CommandError::host("Error jogging axes"))?;
                Ok(Reply::success("Jogging axes command issued successfully."))
            }
            MovementCommand::Extrude {
                amount,
                speed,
                tags,
            } => {
                printer
                    .extrude(amount, speed, &tags)
                    .map_err(CommandError::host("Error extruding"))?;
                Ok(Reply::success("Extruding filament command issued successfully."))
            }
            MovementCommand::Home { axes } => {
                printer
                    .home(&axes)
                    .map_err(CommandError::host("Error homing axes"))?;
                Ok(Reply::success("Homing axes command issued successfully."))
            }
        }
    }

    fn camera_control(&self, command: CameraCommand) -> Result<Vec<Reply>, CommandError> {
        match command {
            CameraCommand::GetProviders => Ok(vec![Reply::Response(camera::provider_listing(
                self.host.webcams.as_ref(),
            ))]),
            CameraCommand::Snapshot {
                provider_id,
                camera_name,
            } => {
                let data =
                    camera::capture_snapshot(self.host.webcams.as_ref(), &provider_id, &camera_name)?;
                Ok(vec![
                    Reply::Response(data),
                    Reply::success("Webcam snapshot command issued successfully."),
                ])
            }
        }
    }

    /// Current printer state, absent values omitted
    pub fn printer_status(&self) -> Value {
        let printer = &self.host.printer;
        let mut data = Map::new();
        let fields = [
            ("printer_state_id", printer.state_id().map(Value::from)),
            ("printer_state_string", printer.state_string().map(Value::from)),
            ("current_state_data", printer.current_data()),
            ("temperatures", printer.current_temperatures()),
            ("current_job", printer.current_job()),
        ];
        for (key, value) in fields {
            if let Some(value) = value.filter(|v| !v.is_null()) {
                data.insert(key.to_string(), value);
            }
        }
        Value::Object(data)
    }

    fn spawn_download(&self, url: String) -> Result<Execution, CommandError> {
        let runtime = self
            .runtime
            .clone()
            .ok_or(CommandError::NoRuntime("download_gcode"))?;

        let http = self.http.clone();
        let files = self.host.files.clone();
        let responder = self.responder.clone();
        let metrics = self.metrics.clone();
        let prefix = self.config.snapshot().printago.file_prefix.clone();

        runtime.spawn(async move {
            let result: Result<String, DownloadError> =
                download::download_gcode(&http, &url, &files, &prefix).await;
            match result {
                Ok(path) => {
                    info!(url = %url, path = %path, "G-code download complete");
                    responder.reply(&Reply::success("G-code file downloaded successfully."));
                    metrics.command_processed(true);
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "G-code download failed");
                    responder.error(&CommandError::Download(e));
                    metrics.command_processed(false);
                }
            }
        });

        Ok(Execution::Spawned)
    }
}

fn completed(reply: Reply) -> Execution {
    Execution::Completed(vec![reply])
}
