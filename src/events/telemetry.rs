//! Temperature and progress telemetry
//!
//! Both streams are throttled: temperatures are published per sensor only when
//! they moved far enough, and print progress only when the percentage or the
//! file changed.

use crate::config::ConfigHandle;
use crate::host::{PrinterControl, TemperatureReading, TemperatureUpdate};
use crate::outbound::{OutboundGateway, PublishOptions};
use crate::protocol::topics::{TopicKind, TopicResolver};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Minimum target change that counts as a new setpoint
pub const TARGET_EPSILON: f64 = 0.1;

/// Pseudo sensor carrying the sample time in raw host data
const TIME_KEY: &str = "time";

/// Whether a sensor reading differs enough from the last published one
pub fn should_publish_temperature(
    last: Option<&TemperatureReading>,
    reading: &TemperatureReading,
    threshold: f64,
) -> bool {
    let actual = reading.actual.unwrap_or(0.0);
    let target = reading.target.unwrap_or(0.0);
    if actual == 0.0 && target == 0.0 {
        return false;
    }

    let (last_actual, last_target) = last
        .map(|l| (l.actual.unwrap_or(0.0), l.target.unwrap_or(0.0)))
        .unwrap_or((0.0, 0.0));

    last_actual == 0.0
        || (actual - last_actual).abs() >= threshold
        || (target - last_target).abs() >= TARGET_EPSILON
}

/// Publishes sensor readings that moved past the configured threshold
pub struct TemperatureThrottle {
    gateway: OutboundGateway,
    config: ConfigHandle,
    last: Mutex<HashMap<String, TemperatureReading>>,
}

impl TemperatureThrottle {
    pub fn new(gateway: OutboundGateway, config: ConfigHandle) -> Self {
        Self {
            gateway,
            config,
            last: Mutex::new(HashMap::new()),
        }
    }

    /// Decide for one sensor and remember the reading if it is published
    pub fn record_if_changed(&self, sensor: &str, reading: &TemperatureReading, threshold: f64) -> bool {
        let mut last = self.last.lock();
        if should_publish_temperature(last.get(sensor), reading, threshold) {
            last.insert(sensor.to_string(), *reading);
            true
        } else {
            false
        }
    }

    /// Handle one batch of readings from the host.
    ///
    /// Returns the sensors that were published.
    pub fn on_temperatures(&self, update: &TemperatureUpdate) -> Vec<String> {
        let config = self.config.snapshot();
        let resolver = TopicResolver::new(&config);
        if resolver.resolve(TopicKind::Temperature).is_none() {
            return Vec::new();
        }
        let threshold = config.publish.temperature_threshold;

        let mut published = Vec::new();
        for (sensor, reading) in &update.sensors {
            if sensor == TIME_KEY || !self.record_if_changed(sensor, reading, threshold) {
                continue;
            }

            let Some(topic) = resolver.resolve_filled(TopicKind::Temperature, sensor) else {
                continue;
            };
            let payload = serde_json::json!({
                "actual": reading.actual,
                "target": reading.target,
            });

            trace!(sensor = %sensor, actual = ?reading.actual, target = ?reading.target, "Temperature changed");
            let options = PublishOptions::default().queued();
            if let Ok(true) = self.gateway.publish_with_timestamp(&topic, payload, options, update.time) {
                published.push(sensor.clone());
            }
        }
        published
    }
}

/// Progress block of the host's current data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobProgress {
    /// Percent complete as reported by the host
    pub completion: Option<f64>,
    pub print_time: Option<f64>,
    pub print_time_left: Option<f64>,
    pub print_time_left_origin: Option<String>,
}

impl JobProgress {
    /// Origin of a remaining-time estimate trusted over the completion fraction
    pub const TRUSTED_ORIGIN: &'static str = "genius";

    /// Extract `progress` from the host's current data
    pub fn from_current_data(data: &Value) -> Self {
        data.get("progress")
            .cloned()
            .and_then(|progress| serde_json::from_value(progress).ok())
            .unwrap_or_default()
    }

    /// Whole-number percentage, 0 when unknown
    pub fn compute_progress(&self) -> i64 {
        let mut progress = self.completion.map(|c| c.round() as i64).unwrap_or(0);

        if self.print_time_left_origin.as_deref() == Some(Self::TRUSTED_ORIGIN) {
            if let Some(left) = self.print_time_left {
                let elapsed = self.print_time.unwrap_or(0.0);
                let total = elapsed + left;
                if total > 0.0 {
                    progress = (elapsed / total * 100.0).round() as i64;
                }
            }
        }

        progress
    }

    /// No more progress will be reported for this job
    pub fn is_finished(&self) -> bool {
        self.completion.map_or(true, |c| c >= 100.0)
    }
}

/// One published progress sample
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub location: String,
    pub path: String,
    pub progress: i64,
}

/// Remembers the last published progress sample
#[derive(Debug)]
pub struct ProgressTracker {
    last: Mutex<ProgressUpdate>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self {
            last: Mutex::new(ProgressUpdate {
                location: String::new(),
                path: String::new(),
                progress: -1,
            }),
        }
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `update` if its path or percentage differs from the last one
    pub fn record_if_changed(&self, update: &ProgressUpdate) -> bool {
        let mut last = self.last.lock();
        if last.progress != update.progress || last.path != update.path {
            *last = update.clone();
            true
        } else {
            false
        }
    }

    pub fn last(&self) -> ProgressUpdate {
        self.last.lock().clone()
    }
}

/// Slicer progress as reported by the host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlicingProgress {
    pub slicer: String,
    pub source_location: String,
    pub source_path: String,
    pub destination_location: String,
    pub destination_path: String,
    pub progress: f64,
}

/// Publishes print and slicing progress
pub struct ProgressReporter {
    gateway: OutboundGateway,
    config: ConfigHandle,
    printer: Arc<dyn PrinterControl>,
    tracker: ProgressTracker,
}

impl ProgressReporter {
    pub fn new(gateway: OutboundGateway, config: ConfigHandle, printer: Arc<dyn PrinterControl>) -> Self {
        Self {
            gateway,
            config,
            printer,
            tracker: ProgressTracker::new(),
        }
    }

    /// Publish print progress if it changed.
    ///
    /// Returns whether polling should continue.
    pub fn update_progress(&self, location: &str, path: &str) -> bool {
        let config = self.config.snapshot();
        let Some(topic) = TopicResolver::new(&config).resolve_filled(TopicKind::Progress, "printing") else {
            return false;
        };

        let printer_data = self.printer.current_data().unwrap_or(Value::Null);
        let job = JobProgress::from_current_data(&printer_data);
        let update = ProgressUpdate {
            location: location.to_string(),
            path: path.to_string(),
            progress: job.compute_progress(),
        };

        if self.tracker.record_if_changed(&update) {
            let mut payload = serde_json::to_value(&update).unwrap_or(Value::Null);
            if config.publish.printer_data {
                if let Value::Object(map) = &mut payload {
                    map.insert("printer_data".to_string(), printer_data);
                }
            }

            debug!(path = %update.path, progress = update.progress, "Publishing progress");
            let options = PublishOptions::default().retain(true);
            let _ = self.gateway.publish_with_timestamp(&topic, payload, options, None);
        }

        !job.is_finished()
    }

    /// Publish slicer progress; not deduplicated
    pub fn publish_slicing_progress(&self, progress: &SlicingProgress) -> bool {
        let config = self.config.snapshot();
        let Some(topic) = TopicResolver::new(&config).resolve_filled(TopicKind::Progress, "slicing") else {
            return false;
        };

        let payload = serde_json::to_value(progress).unwrap_or(Value::Null);
        self.gateway
            .publish_with_timestamp(&topic, payload, PublishOptions::default(), None)
            .unwrap_or(false)
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }
}

/// Repeating timer driving progress updates while a job is active
#[derive(Default)]
pub struct ProgressPoller {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ProgressPoller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Start ticking every `period` unless already running.
    ///
    /// `tick` returns `false` to stop the poll. Returns whether a new poll
    /// was started.
    pub fn start<F>(&self, runtime: &Handle, period: Duration, tick: F) -> bool
    where
        F: Fn() -> bool + Send + 'static,
    {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return false;
        }

        *task = Some(runtime.spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            loop {
                interval.tick().await;
                if !tick() {
                    debug!("Progress poll finished");
                    break;
                }
            }
        }));
        true
    }

    /// Stop future ticks
    pub fn cancel(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for ProgressPoller {
    fn drop(&mut self) {
        self.cancel();
    }
}
