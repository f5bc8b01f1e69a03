//! The bridge instance
//!
//! [`Bridge`] owns one broker connection and every component that publishes
//! through it or reacts to it. The host drives it through a handful of entry
//! points: lifecycle events, temperature readings, slicing progress, received
//! G-code lines and settings changes.

use crate::commands::{CommandProcessor, Responder};
use crate::config::{BridgeConfig, ConfigHandle};
use crate::error::BridgeResult;
use crate::events::telemetry::{ProgressReporter, SlicingProgress};
use crate::events::{names, EventClassifier, MetadataPublisher, ProgressPoller, TemperatureThrottle};
use crate::host::{HostServices, TemperatureSink, TemperatureUpdate};
use crate::observability::health::HealthProbe;
use crate::observability::metrics::{BridgeMetrics, MetricsSnapshot};
use crate::outbound::{OutboundGateway, PublishError, PublishOptions};
use crate::protocol::messages::Payload;
use crate::routing::{InboundRouter, SubscriptionCallback, SubscriptionTable};
use crate::transport::mqtt::{
    ConnectionListener, ConnectionManager, ConnectionState, DisconnectOptions,
};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

/// Firmware line announcing that the printer waits for the user
pub const PAUSED_FOR_USER_LINE: &str = "echo:busy: paused for user";

pub struct Bridge {
    config: ConfigHandle,
    metrics: Arc<BridgeMetrics>,
    manager: Arc<ConnectionManager>,
    gateway: OutboundGateway,
    router: InboundRouter,
    events: EventClassifier,
    temperatures: TemperatureThrottle,
    progress: ProgressReporter,
    metadata: MetadataPublisher,
    processor: CommandProcessor,
    poller: ProgressPoller,
    /// Callback registered on the command topic, kept to move it on topic changes
    command_callback: Mutex<Option<(String, SubscriptionCallback)>>,
    runtime: Option<Handle>,
}

impl Bridge {
    /// Validate `config` and wire up every component.
    ///
    /// Background work (network task, progress poll, downloads) runs on the
    /// Tokio runtime current at construction time.
    pub fn new(config: BridgeConfig, host: HostServices) -> BridgeResult<Arc<Self>> {
        config.validate()?;

        let config = ConfigHandle::new(config);
        let metrics = Arc::new(BridgeMetrics::new());
        let table = Arc::new(SubscriptionTable::new());
        let manager = Arc::new(ConnectionManager::new(
            config.clone(),
            table.clone(),
            metrics.clone(),
        ));
        let gateway = OutboundGateway::new(manager.clone(), config.clone());

        let bridge = Arc::new_cyclic(|weak: &Weak<Bridge>| {
            let listener: Weak<dyn ConnectionListener> = weak.clone();
            manager.set_listener(listener);

            Bridge {
                router: InboundRouter::new(manager.clone(), table),
                events: EventClassifier::new(gateway.clone(), config.clone()),
                temperatures: TemperatureThrottle::new(gateway.clone(), config.clone()),
                progress: ProgressReporter::new(gateway.clone(), config.clone(), host.printer.clone()),
                metadata: MetadataPublisher::new(gateway.clone(), config.clone(), host.files.clone()),
                processor: CommandProcessor::new(
                    Responder::new(gateway.clone(), config.clone()),
                    host,
                    config.clone(),
                    metrics.clone(),
                ),
                poller: ProgressPoller::new(),
                command_callback: Mutex::new(None),
                runtime: Handle::try_current().ok(),
                config,
                metrics,
                manager,
                gateway,
            }
        });

        Ok(bridge)
    }

    /// Subscribe to the command topic and connect to the broker.
    ///
    /// Connection failures are logged; the bridge keeps running without a
    /// broker until settings change.
    pub fn start(self: &Arc<Self>) {
        self.subscribe_commands();
        self.connect_logged();
    }

    fn connect_logged(self: &Arc<Self>) {
        if let Err(e) = self.manager.connect() {
            error!(error = %e, "Failed to start mqtt connection");
        }
    }

    /// Cancel the progress poll and disconnect, announcing "disconnected"
    pub async fn shutdown(&self) {
        info!("Shutting down Printago bridge");
        self.poller.cancel();
        self.manager.disconnect(DisconnectOptions::shutdown()).await;
    }

    fn subscribe_commands(self: &Arc<Self>) {
        let topic = self.config.snapshot().printago.command_topic.clone();
        let weak = Arc::downgrade(self);
        let callback: SubscriptionCallback = Arc::new(move |message, _args, _kwargs| {
            if let Some(bridge) = weak.upgrade() {
                bridge.processor.process(&message.payload);
            }
            Ok(())
        });

        info!(topic = %topic, "Subscribing to Printago commands");
        self.router
            .subscribe(topic.clone(), callback.clone(), Vec::new(), Map::new());
        *self.command_callback.lock() = Some((topic, callback));
    }

    /// React to a host lifecycle event.
    ///
    /// Starts the progress poll for job and file-selection events, publishes
    /// or clears metadata for job events, then publishes the event itself.
    /// Returns whether the event was published.
    pub fn on_event(self: &Arc<Self>, event: &str, payload: Option<&Value>) -> bool {
        let (origin, path) = origin_and_path(payload);

        if matches!(
            event,
            names::PRINT_STARTED | names::PRINT_DONE | names::FILE_SELECTED | names::FILE_DESELECTED
        ) {
            self.start_progress_poll(origin.clone(), path.clone());
        }

        if matches!(
            event,
            names::PRINT_STARTED | names::PRINT_DONE | names::PRINT_FAILED | names::PRINT_CANCELLED
        ) {
            self.metadata.on_job_event(&origin, &path, event);
        }

        self.events.publish_event(event, payload)
    }

    fn start_progress_poll(self: &Arc<Self>, origin: String, path: String) {
        let Some(runtime) = self.runtime.as_ref() else {
            warn!("No async runtime available, progress will not be polled");
            return;
        };

        let period = Duration::from_secs(self.config.snapshot().printago.progress_interval);
        let weak = Arc::downgrade(self);
        let started = self.poller.start(runtime, period, move || match weak.upgrade() {
            Some(bridge) => bridge.progress.update_progress(&origin, &path),
            None => false,
        });
        if started {
            debug!(period_secs = period.as_secs(), "Progress poll started");
        }
    }

    pub fn on_slicing_progress(&self, progress: &SlicingProgress) -> bool {
        self.progress.publish_slicing_progress(progress)
    }

    /// G-code receive hook. The line is passed through unchanged.
    pub fn on_gcode_received<'a>(&self, line: &'a str) -> &'a str {
        if line.starts_with(PAUSED_FOR_USER_LINE) {
            self.events.publish_paused_for_user();
        }
        line
    }

    /// Store new settings, reconnecting when the connection depends on them
    pub async fn apply_settings(self: &Arc<Self>, new: BridgeConfig) -> BridgeResult<()> {
        new.validate()?;

        let old = self.config.replace(new);
        let current = self.config.snapshot();
        self.manager.arm_reset();

        if old.printago.command_topic != current.printago.command_topic {
            let previous = self.command_callback.lock().take();
            if let Some((topic, callback)) = previous {
                self.router.unsubscribe(&callback, Some(&topic));
            }
            self.subscribe_commands();
        }

        if BridgeConfig::connection_changed(&old, &current) {
            info!("Connection settings changed, reconnecting");
            self.manager
                .disconnect(DisconnectOptions {
                    force: true,
                    include_last_will: old.publish.lw_active,
                    last_will_topic: old.lw_topic(),
                })
                .await;
            self.connect_logged();
        }

        Ok(())
    }

    // Helpers for other host components sharing the connection

    pub fn publish(&self, topic: &str, payload: impl Into<Payload>, options: PublishOptions) -> bool {
        self.gateway.publish(topic, payload, options)
    }

    pub fn publish_with_timestamp(
        &self,
        topic: &str,
        payload: Value,
        options: PublishOptions,
        timestamp: Option<i64>,
    ) -> Result<bool, PublishError> {
        self.gateway
            .publish_with_timestamp(topic, payload, options, timestamp)
    }

    pub fn subscribe(
        &self,
        topic: impl Into<String>,
        callback: SubscriptionCallback,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) {
        self.router.subscribe(topic, callback, args, kwargs);
    }

    pub fn unsubscribe(&self, callback: &SubscriptionCallback, topic: Option<&str>) -> Vec<String> {
        self.router.unsubscribe(callback, topic)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn queue_len(&self) -> usize {
        self.manager.queue_len()
    }

    pub fn metrics(&self) -> &Arc<BridgeMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> Arc<BridgeConfig> {
        self.config.snapshot()
    }

    /// The underlying connection, for driving it directly
    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn is_polling_progress(&self) -> bool {
        self.poller.is_running()
    }
}

impl TemperatureSink for Bridge {
    fn on_temperatures(&self, update: &TemperatureUpdate) {
        self.temperatures.on_temperatures(update);
    }
}

impl ConnectionListener for Bridge {
    fn on_baseline_reset(&self) {
        debug!("Publishing baseline progress");
        self.progress.update_progress("", "");
        self.progress
            .publish_slicing_progress(&SlicingProgress::default());
    }
}

impl HealthProbe for Bridge {
    fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    fn queue_depth(&self) -> usize {
        self.manager.queue_len()
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

fn origin_and_path(payload: Option<&Value>) -> (String, String) {
    let field = |key: &str| {
        payload
            .and_then(|p| p.get(key))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    (field("origin"), field("path"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::{MockFileStorage, MockPrinter, MockTransport, MockWebcamRegistry};
    use serde_json::json;

    fn host() -> HostServices {
        HostServices {
            printer: Arc::new(MockPrinter::new()),
            files: Arc::new(MockFileStorage::new()),
            webcams: Arc::new(MockWebcamRegistry::new()),
        }
    }

    fn connected(bridge: &Arc<Bridge>) -> Arc<MockTransport> {
        let transport = Arc::new(MockTransport::new());
        let generation = bridge.connection().attach(transport.clone());
        bridge.connection().handle_connack(generation, 0);
        transport
    }

    #[test]
    fn test_origin_and_path() {
        let payload = json!({"origin": "local", "path": "Printago/a.gcode", "size": 12});
        assert_eq!(
            origin_and_path(Some(&payload)),
            ("local".to_string(), "Printago/a.gcode".to_string())
        );
        assert_eq!(origin_and_path(None), (String::new(), String::new()));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = BridgeConfig::default();
        config.printago.command_topic = " ".to_string();

        assert!(Bridge::new(config, host()).is_err());
    }

    #[test]
    fn test_first_connect_publishes_baseline_progress() {
        let bridge = Bridge::new(BridgeConfig::default(), host()).unwrap();

        let transport = connected(&bridge);

        let progress: Vec<String> = transport
            .published()
            .into_iter()
            .map(|m| m.topic)
            .filter(|t| t.starts_with("octoPrint/progress/"))
            .collect();
        assert_eq!(progress, vec!["octoPrint/progress/printing", "octoPrint/progress/slicing"]);
    }

    #[test]
    fn test_gcode_hook_passes_line_through() {
        let bridge = Bridge::new(BridgeConfig::default(), host()).unwrap();
        let transport = connected(&bridge);
        transport.clear();

        assert_eq!(bridge.on_gcode_received("ok T:200"), "ok T:200");
        assert!(transport.published().is_empty());

        let line = "echo:busy: paused for user";
        assert_eq!(bridge.on_gcode_received(line), line);
        assert_eq!(transport.published_to("octoPrint/event/PausedForUser").len(), 1);
    }
}
