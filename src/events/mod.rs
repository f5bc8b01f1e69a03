//! Host lifecycle events
//!
//! Every host event name maps to one [`EventClass`]; a per-class flag in the
//! configuration decides whether events of that class are published.

pub mod metadata;
pub mod telemetry;

pub use metadata::MetadataPublisher;
pub use telemetry::{JobProgress, ProgressPoller, ProgressTracker, ProgressUpdate, TemperatureThrottle};

use crate::config::{BridgeConfig, ConfigHandle, EventClassFlags};
use crate::outbound::{OutboundGateway, PublishOptions};
use crate::protocol::topics::{TopicKind, TopicResolver};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Synthetic event published when the firmware waits for the user
pub const PAUSED_FOR_USER: &str = "PausedForUser";

/// Key injected into every event payload
pub const EVENT_FIELD: &str = "_event";

/// Host event names the bridge reacts to beyond publishing them
pub mod names {
    pub const PRINT_STARTED: &str = "PrintStarted";
    pub const PRINT_DONE: &str = "PrintDone";
    pub const PRINT_FAILED: &str = "PrintFailed";
    pub const PRINT_CANCELLED: &str = "PrintCancelled";
    pub const FILE_SELECTED: &str = "FileSelected";
    pub const FILE_DESELECTED: &str = "FileDeselected";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventClass {
    Server,
    Comm,
    Files,
    Printjob,
    Gcode,
    Position,
    Timelapse,
    Slicing,
    Settings,
    Unclassified,
}

impl EventClass {
    /// Whether events of this class are enabled
    pub fn is_active(&self, flags: &EventClassFlags) -> bool {
        match self {
            EventClass::Server => flags.server,
            EventClass::Comm => flags.comm,
            EventClass::Files => flags.files,
            EventClass::Printjob => flags.printjob,
            EventClass::Gcode => flags.gcode,
            EventClass::Position => flags.position,
            EventClass::Timelapse => flags.timelapse,
            EventClass::Slicing => flags.slicing,
            EventClass::Settings => flags.settings,
            EventClass::Unclassified => flags.unclassified,
        }
    }
}

/// Class of a host event name
pub fn classify(event: &str) -> EventClass {
    match event {
        "Startup" | "Shutdown" | "ClientOpened" | "ClientClosed" | "ConnectivityChanged" => {
            EventClass::Server
        }
        "Connecting" | "Connected" | "Disconnecting" | "Disconnected" | "Error"
        | "PrinterStateChanged" => EventClass::Comm,
        "Upload" | "FileAdded" | "FileRemoved" | "FolderAdded" | "FolderRemoved"
        | "UpdatedFiles" | "MetadataAnalysisStarted" | "MetadataAnalysisFinished"
        | "FileSelected" | "FileDeselected" | "TransferStarted" | "TransferFailed"
        | "TransferDone" => EventClass::Files,
        "PrintStarted" | "PrintFailed" | "PrintDone" | "PrintCancelled" | "PrintPaused"
        | "PrintResumed" => EventClass::Printjob,
        "PowerOn" | "PowerOff" | "Home" | "Dwell" | "Waiting" | "Cooling" | "Alert"
        | "Conveyor" | "Eject" | "EStop" | "ToolChange" => EventClass::Gcode,
        "ZChange" | "PositionUpdate" => EventClass::Position,
        "CaptureStart" | "CaptureFailed" | "CaptureDone" | "MovieRendering" | "MovieFailed"
        | "MovieDone" => EventClass::Timelapse,
        "SlicingStarted" | "SlicingDone" | "SlicingCancelled" | "SlicingFailed"
        | "SlicingProfileAdded" | "SlicingProfileDeleted" | "SlicingProfileModified" => {
            EventClass::Slicing
        }
        "SettingsUpdated" => EventClass::Settings,
        _ => EventClass::Unclassified,
    }
}

/// Retain flag for an event: only allowlisted events, and only when retain
/// is enabled globally
pub fn event_retain(config: &BridgeConfig, event: &str) -> bool {
    config.broker.retain && config.publish.retained_events.iter().any(|e| e == event)
}

/// Publishes host lifecycle events
#[derive(Clone)]
pub struct EventClassifier {
    gateway: OutboundGateway,
    config: ConfigHandle,
}

impl EventClassifier {
    pub fn new(gateway: OutboundGateway, config: ConfigHandle) -> Self {
        Self { gateway, config }
    }

    /// Publish `event` if its class is active.
    ///
    /// Returns whether a publish was handed to the gateway and accepted.
    pub fn publish_event(&self, event: &str, payload: Option<&Value>) -> bool {
        let config = self.config.snapshot();

        let Some(topic) = TopicResolver::new(&config).resolve_filled(TopicKind::Event, event) else {
            return false;
        };

        let class = classify(event);
        if !class.is_active(&config.publish.events) {
            debug!(event, class = ?class, "Event class inactive, not publishing");
            return false;
        }

        let mut data = match payload {
            Some(Value::Object(map)) => map.clone(),
            None | Some(Value::Null) => Map::new(),
            Some(other) => {
                warn!(event, payload = %other, "Event payload is not a mapping, publishing without it");
                Map::new()
            }
        };
        data.insert(EVENT_FIELD.to_string(), Value::from(event));

        let options = PublishOptions::default().retain(event_retain(&config, event));
        self.gateway
            .publish_with_timestamp(&topic, Value::Object(data), options, None)
            .unwrap_or(false)
    }

    /// Publish the synthetic paused-for-user event
    pub fn publish_paused_for_user(&self) -> bool {
        let config = self.config.snapshot();
        let Some(topic) = TopicResolver::new(&config).resolve_filled(TopicKind::Event, PAUSED_FOR_USER)
        else {
            return false;
        };

        let mut data = Map::new();
        data.insert(EVENT_FIELD.to_string(), Value::from(PAUSED_FOR_USER));
        self.gateway
            .publish_with_timestamp(&topic, Value::Object(data), PublishOptions::default(), None)
            .unwrap_or(false)
    }
}
