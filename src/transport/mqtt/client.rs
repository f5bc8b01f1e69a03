//! Impure I/O side of the broker connection
//!
//! [`ConnectionManager`] owns the client handle, the background network task,
//! the outbound queue and the connection state. Everything the network task
//! reacts to goes through the pure helpers in [`super::message_handler`] and
//! [`super::health_monitor`]; this module only applies their decisions.

use super::connection::{
    configure_mqtt_options, generate_client_id, resolve_client_id, ConnectionState, MqttError,
    ReconnectConfig, LWT_CONNECTED, LWT_DISCONNECTED,
};
use super::health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
use super::message_handler::{EventRoute, InboundMessage, MessageHandler};
use crate::config::ConfigHandle;
use crate::observability::metrics::BridgeMetrics;
use crate::routing::SubscriptionTable;
use crate::transport::Transport;
use parking_lot::{Mutex, RwLock};
use rumqttc::{AsyncClient, EventLoop, QoS};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Capacity of the client's request channel
const REQUEST_CHANNEL_CAPACITY: usize = 256;

/// Return code recorded when the link drops without a DISCONNECT from us
const RC_CONNECTION_LOST: u8 = 7;

/// How long a forced disconnect waits for the network task
const FORCED_STOP_GRACE: Duration = Duration::from_secs(1);
/// How long a regular disconnect waits for the network task
const GRACEFUL_STOP_GRACE: Duration = Duration::from_secs(3);

/// A publish accepted while the link was down
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

/// Receives connection lifecycle notifications from the network task
pub trait ConnectionListener: Send + Sync {
    /// First successful connect since start or since the last settings change
    fn on_baseline_reset(&self);
}

/// How to tear the connection down
#[derive(Debug, Clone, Default)]
pub struct DisconnectOptions {
    /// Stop the network task after a short grace period
    pub force: bool,
    pub include_last_will: bool,
    /// Publish the notice here instead of the configured topic
    pub last_will_topic: Option<String>,
}

impl DisconnectOptions {
    /// Forced stop that still announces "disconnected"
    pub fn shutdown() -> Self {
        Self {
            force: true,
            include_last_will: true,
            last_will_topic: None,
        }
    }
}

/// State guarded by the link mutex. Queue-or-send decisions and the connect
/// flush both run under it, so a publish racing a connect is never lost.
struct Link {
    state: ConnectionState,
    transport: Option<Arc<dyn Transport>>,
    /// Bumped whenever the handle is replaced; events from older handles are stale
    generation: u64,
    queue: VecDeque<QueuedMessage>,
}

struct LoopHandle {
    task: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Owns the broker link and the outbound queue
pub struct ConnectionManager {
    config: ConfigHandle,
    subscriptions: Arc<SubscriptionTable>,
    metrics: Arc<BridgeMetrics>,
    link: Mutex<Link>,
    network_loop: Mutex<Option<LoopHandle>>,
    listener: RwLock<Option<Weak<dyn ConnectionListener>>>,
    reset_pending: AtomicBool,
    generated_client_id: String,
    runtime: Option<Handle>,
}

impl ConnectionManager {
    /// Create a manager bound to the current tokio runtime, if any
    pub fn new(
        config: ConfigHandle,
        subscriptions: Arc<SubscriptionTable>,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        Self {
            config,
            subscriptions,
            metrics,
            link: Mutex::new(Link {
                state: ConnectionState::Disconnected,
                transport: None,
                generation: 0,
                queue: VecDeque::new(),
            }),
            network_loop: Mutex::new(None),
            listener: RwLock::new(None),
            reset_pending: AtomicBool::new(true),
            generated_client_id: generate_client_id(),
            runtime: Handle::try_current().ok(),
        }
    }

    pub fn set_listener(&self, listener: Weak<dyn ConnectionListener>) {
        *self.listener.write() = Some(listener);
    }

    /// Re-arm the one-shot baseline reset for the next successful connect
    pub fn arm_reset(&self) {
        self.reset_pending.store(true, Ordering::SeqCst);
    }

    pub fn state(&self) -> ConnectionState {
        self.link.lock().state
    }

    pub fn queue_len(&self) -> usize {
        self.link.lock().queue.len()
    }

    /// Client id used for the next connection attempt
    pub fn client_id(&self) -> String {
        resolve_client_id(&self.config.snapshot(), &self.generated_client_id)
    }

    /// Start a fresh connection from the current configuration snapshot.
    ///
    /// Without a broker URL the bridge stays inert and this returns `Ok`.
    pub fn connect(self: &Arc<Self>) -> Result<(), MqttError> {
        let config = self.config.snapshot();

        let address = match config.broker.address() {
            Ok(Some(address)) => address,
            Ok(None) => {
                warn!("No broker URL defined, MQTT bridge won't connect");
                return Ok(());
            }
            Err(e) => return Err(MqttError::InvalidBrokerUrl(e.to_string())),
        };

        let runtime = self.runtime.clone().ok_or(MqttError::NoRuntime)?;

        self.stop_network_loop();

        let client_id = self.client_id();
        let options = configure_mqtt_options(&config, &address, &client_id)?;
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        let generation = self.attach(Arc::new(client));
        self.metrics.connection_attempt();

        info!(
            host = %address.host,
            port = address.port,
            client_id = %client_id,
            "Connecting to mqtt broker"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reconnect =
            ReconnectConfig::from_interval(Duration::from_secs(config.printago.reconnect_interval));
        let task = runtime.spawn(
            run_network_loop(
                Arc::downgrade(self),
                generation,
                eventloop,
                shutdown_rx,
                reconnect,
            )
            .instrument(crate::mqtt_span!(client_id = %client_id, generation)),
        );

        *self.network_loop.lock() = Some(LoopHandle { task, shutdown_tx });
        Ok(())
    }

    /// Install a new client handle and return its generation.
    ///
    /// Events carrying an older generation are ignored from here on.
    pub fn attach(&self, transport: Arc<dyn Transport>) -> u64 {
        let mut link = self.link.lock();
        link.generation += 1;
        link.transport = Some(transport);
        link.state = HealthMonitor::determine_next_state(&ConnectionEvent::ConnectStarted);
        link.generation
    }

    /// React to a CONNACK from the handle with `generation`
    pub fn handle_connack(&self, generation: u64, code: u8) {
        let config = self.config.snapshot();

        {
            let mut link = self.link.lock();
            if link.generation != generation {
                debug!(generation, current = link.generation, "Ignoring CONNACK from stale client");
                return;
            }

            if code != 0 {
                link.state =
                    HealthMonitor::determine_next_state(&ConnectionEvent::ConnAckReceived(code));
                drop(link);
                self.metrics.connection_refused();
                return;
            }

            let Some(transport) = link.transport.clone() else {
                return;
            };

            if let Some(lw_topic) = config.lw_topic() {
                if let Err(e) = transport.publish(
                    &lw_topic,
                    LWT_CONNECTED.as_bytes().to_vec(),
                    QoS::AtLeastOnce,
                    config.broker.lw_retain,
                ) {
                    warn!(topic = %lw_topic, error = %e, "Failed to publish connected notice");
                }
            }

            let flushed = Self::flush_queue(&mut link, transport.as_ref(), config.broker.retain);
            if flushed > 0 {
                info!(count = flushed, "Flushed queued messages");
                self.metrics.messages_flushed(flushed as u64);
            }

            let topics = self.subscriptions.topics();
            if !topics.is_empty() {
                debug!(count = topics.len(), "Subscribing to registered topics");
                if let Err(e) = transport.subscribe_many(&topics, QoS::AtMostOnce) {
                    error!(error = %e, "Failed to subscribe to registered topics");
                }
            }

            link.state =
                HealthMonitor::determine_next_state(&ConnectionEvent::ConnAckReceived(code));
        }

        self.metrics.connection_established();

        if self.reset_pending.swap(false, Ordering::SeqCst) {
            let listener = self.listener.read().as_ref().and_then(Weak::upgrade);
            if let Some(listener) = listener {
                listener.on_baseline_reset();
            }
        }
    }

    /// React to the link going down; `code` 0 means we asked for it
    pub fn handle_disconnect(&self, generation: u64, code: u8) {
        let was_connected = {
            let mut link = self.link.lock();
            if link.generation != generation {
                debug!(generation, current = link.generation, "Ignoring disconnect from stale client");
                return;
            }
            let was_connected = link.state == ConnectionState::Connected;
            link.state = HealthMonitor::determine_next_state(&ConnectionEvent::Disconnected(code));
            was_connected
        };

        if code != 0 && was_connected {
            self.metrics.connection_lost();
        } else {
            self.metrics.connection_closed();
        }
    }

    /// Deliver a broker message to every matching subscription
    pub fn handle_message(&self, generation: u64, message: &InboundMessage) {
        if self.link.lock().generation != generation {
            return;
        }

        debug!(topic = %message.topic, bytes = message.payload.len(), "Received mqtt message");
        self.metrics.message_received();
        self.subscriptions.dispatch(message, &self.metrics);
    }

    /// Send now, or queue while disconnected when the caller allows it.
    ///
    /// Returns `false` only when the message was dropped.
    pub fn dispatch(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
        allow_queueing: bool,
    ) -> bool {
        let mut link = self.link.lock();

        if HealthMonitor::can_publish(link.state) {
            // Keep FIFO order while a backlog is still draining
            if !link.queue.is_empty() {
                self.enqueue(&mut link, topic, payload, qos);
                return true;
            }

            if let Some(transport) = link.transport.clone() {
                return match transport.publish(topic, payload.clone(), qos, retain) {
                    Ok(()) => {
                        debug!(topic = %topic, retain, "Published message");
                        self.metrics.message_published();
                        true
                    }
                    Err(e) if allow_queueing => {
                        debug!(topic = %topic, error = %e, "Request channel full, queueing message");
                        self.enqueue(&mut link, topic, payload, qos);
                        true
                    }
                    Err(e) => {
                        error!(topic = %topic, error = %e, "Failed to publish message");
                        self.metrics.publish_failed();
                        false
                    }
                };
            }
        }

        if allow_queueing {
            self.enqueue(&mut link, topic, payload, qos);
            true
        } else {
            debug!(topic = %topic, "Not connected, dropping message");
            self.metrics.message_dropped();
            false
        }
    }

    /// Run `f` with the live transport (or `None` when not connected) while
    /// holding the link lock, so it cannot interleave with the connect flush.
    pub fn with_connected_transport<R>(&self, f: impl FnOnce(Option<&dyn Transport>) -> R) -> R {
        let link = self.link.lock();
        let transport = if HealthMonitor::can_publish(link.state) {
            link.transport.as_deref()
        } else {
            None
        };
        f(transport)
    }

    /// Retry sending a backlog left by a full request channel
    pub fn pump_queue(&self, generation: u64) {
        let retain = self.config.snapshot().broker.retain;
        let mut link = self.link.lock();
        if link.generation != generation
            || link.queue.is_empty()
            || !HealthMonitor::can_publish(link.state)
        {
            return;
        }
        let Some(transport) = link.transport.clone() else {
            return;
        };

        let flushed = Self::flush_queue(&mut link, transport.as_ref(), retain);
        if flushed > 0 {
            self.metrics.messages_flushed(flushed as u64);
        }
    }

    /// Close the connection, optionally announcing it on the last-will topic
    pub async fn disconnect(&self, options: DisconnectOptions) {
        let (transport, was_connected) = {
            let link = self.link.lock();
            (link.transport.clone(), link.state == ConnectionState::Connected)
        };

        let Some(transport) = transport else {
            debug!("No broker connection to close");
            return;
        };

        let config = self.config.snapshot();
        if options.include_last_will {
            if let Some(topic) = options.last_will_topic.clone().or_else(|| config.lw_topic()) {
                if let Err(e) = transport.publish(
                    &topic,
                    LWT_DISCONNECTED.as_bytes().to_vec(),
                    QoS::AtLeastOnce,
                    config.broker.lw_retain,
                ) {
                    warn!(topic = %topic, error = %e, "Failed to publish disconnected notice");
                }
            }
        }

        if let Err(e) = transport.disconnect() {
            warn!(error = %e, "Failed to request disconnect");
        }

        let handle = self.network_loop.lock().take();
        if let Some(mut handle) = handle {
            if !was_connected {
                // Nobody is draining the request channel while reconnecting
                let _ = handle.shutdown_tx.send(true);
            }

            let grace = if options.force {
                FORCED_STOP_GRACE
            } else {
                GRACEFUL_STOP_GRACE
            };

            match tokio::time::timeout(grace, &mut handle.task).await {
                Ok(Ok(())) => debug!("Network loop stopped"),
                Ok(Err(e)) if !e.is_cancelled() => warn!(error = %e, "Network loop ended with error"),
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!("Network loop did not stop in time, aborting it");
                    let _ = handle.shutdown_tx.send(true);
                    handle.task.abort();
                }
            }
        }

        {
            let mut link = self.link.lock();
            link.generation += 1;
            link.transport = None;
            link.state = ConnectionState::Disconnected;
        }
        self.metrics.connection_closed();
        info!("MQTT connection closed");
    }

    /// Mark a new attempt after a transient failure
    fn mark_connecting(&self, generation: u64) {
        let mut link = self.link.lock();
        if link.generation == generation {
            link.state = HealthMonitor::determine_next_state(&ConnectionEvent::ConnectStarted);
            drop(link);
            self.metrics.connection_attempt();
        }
    }

    fn enqueue(&self, link: &mut Link, topic: &str, payload: Vec<u8>, qos: QoS) {
        let capacity = self.config.snapshot().publish.queue_capacity;
        if let Some(capacity) = capacity {
            while link.queue.len() >= capacity {
                if let Some(evicted) = link.queue.pop_front() {
                    warn!(topic = %evicted.topic, capacity, "Outbound queue full, dropping oldest message");
                    self.metrics.message_dropped();
                }
            }
        }

        link.queue.push_back(QueuedMessage {
            topic: topic.to_string(),
            payload,
            qos,
        });
        self.metrics.message_queued();
        debug!(topic = %topic, depth = link.queue.len(), "Queued message");
    }

    /// Send queued messages in order until the queue is empty or the
    /// transport pushes back. Returns how many were handed off.
    fn flush_queue(link: &mut Link, transport: &dyn Transport, retain: bool) -> usize {
        let mut flushed = 0;
        while let Some(message) = link.queue.pop_front() {
            match transport.publish(&message.topic, message.payload.clone(), message.qos, retain) {
                Ok(()) => flushed += 1,
                Err(e) => {
                    debug!(error = %e, remaining = link.queue.len() + 1, "Pausing queue flush");
                    link.queue.push_front(message);
                    break;
                }
            }
        }
        flushed
    }

    fn stop_network_loop(&self) {
        if let Some(handle) = self.network_loop.lock().take() {
            let _ = handle.shutdown_tx.send(true);
            handle.task.abort();
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.stop_network_loop();
    }
}

/// Drive one client handle until shutdown, refusal or a graceful disconnect
async fn run_network_loop(
    manager: Weak<ConnectionManager>,
    generation: u64,
    mut eventloop: EventLoop,
    mut shutdown_rx: watch::Receiver<bool>,
    reconnect: ReconnectConfig,
) {
    let mut reconnect_attempts = 0u32;

    loop {
        let result = tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("Shutdown signal received, stopping network loop");
                    break;
                }
                continue;
            }
            result = eventloop.poll() => result,
        };

        let Some(current) = manager.upgrade() else {
            break;
        };

        match MessageHandler::route(result) {
            EventRoute::ConnectionAcknowledged => {
                reconnect_attempts = 0;
                current.handle_connack(generation, 0);
            }
            EventRoute::ConnectionRefused(code) => {
                current.handle_connack(generation, code);
                break;
            }
            EventRoute::MessageReceived(message) => current.handle_message(generation, &message),
            EventRoute::SubscriptionConfirmed { packet_id } => {
                debug!(packet_id, "Subscription confirmed");
            }
            EventRoute::GracefulDisconnect => {
                current.handle_disconnect(generation, 0);
                break;
            }
            EventRoute::NetworkError(reason) => {
                warn!(error = %reason, "MQTT network error");
                current.handle_disconnect(generation, RC_CONNECTION_LOST);
                drop(current);

                let shutdown_requested = *shutdown_rx.borrow();
                match HealthMonitor::should_attempt_reconnection(
                    reconnect_attempts,
                    &reconnect,
                    shutdown_requested,
                ) {
                    ReconnectionDecision::Proceed { attempt, delay_ms } => {
                        reconnect_attempts = attempt;
                        info!(attempt, delay_ms, "Reconnecting to mqtt broker");
                        if !interruptible_sleep(shutdown_rx.clone(), delay_ms).await {
                            break;
                        }
                        match manager.upgrade() {
                            Some(current) => current.mark_connecting(generation),
                            None => break,
                        }
                    }
                    ReconnectionDecision::AbortShutdownRequested => break,
                }
                continue;
            }
            EventRoute::InfrastructureEvent(event) => {
                debug!(event = %event, "MQTT event");
            }
            EventRoute::OutgoingEvent => {}
        }

        current.pump_queue(generation);
    }

    debug!(generation, "Network loop finished");
}

/// Sleep unless shutdown is requested first.
///
/// Returns `true` if the sleep completed.
async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
    tokio::select! {
        _ = shutdown_rx.changed() => {
            if *shutdown_rx.borrow() {
                info!("Shutdown signal received during reconnection delay, stopping");
                return false;
            }
            true
        }
        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::routing::{Subscription, SubscriptionCallback};
    use crate::testing::mocks::MockTransport;
    use serde_json::{Map, Value};
    use std::sync::atomic::AtomicUsize;

    fn manager_with(config: BridgeConfig) -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager::new(
            ConfigHandle::new(config),
            Arc::new(SubscriptionTable::new()),
            Arc::new(BridgeMetrics::new()),
        ))
    }

    fn manager() -> Arc<ConnectionManager> {
        manager_with(BridgeConfig::default())
    }

    struct CountingListener(AtomicUsize);

    impl ConnectionListener for CountingListener {
        fn on_baseline_reset(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_initial_state_is_disconnected() {
        let manager = manager();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.queue_len(), 0);
    }

    #[test]
    fn test_queued_messages_flush_in_order_on_connect() {
        // Arrange
        let manager = manager();
        for topic in ["t/1", "t/2", "t/3"] {
            assert!(manager.dispatch(topic, topic.as_bytes().to_vec(), QoS::AtMostOnce, false, true));
        }
        assert_eq!(manager.queue_len(), 3);

        // Act
        let transport = Arc::new(MockTransport::new());
        let generation = manager.attach(transport.clone());
        manager.handle_connack(generation, 0);
        manager.dispatch("t/4", b"t/4".to_vec(), QoS::AtMostOnce, false, false);

        // Assert
        let topics: Vec<String> = transport.published().into_iter().map(|m| m.topic).collect();
        assert_eq!(topics, vec!["octoPrint/mqtt", "t/1", "t/2", "t/3", "t/4"]);
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(manager.queue_len(), 0);
    }

    #[test]
    fn test_flush_uses_current_retain_policy() {
        let mut config = BridgeConfig::default();
        config.broker.retain = false;
        let manager = manager_with(config);

        manager.dispatch("t/1", b"x".to_vec(), QoS::AtMostOnce, true, true);

        let transport = Arc::new(MockTransport::new());
        let generation = manager.attach(transport.clone());
        manager.handle_connack(generation, 0);

        let flushed = transport.published_to("t/1");
        assert_eq!(flushed.len(), 1);
        assert!(!flushed[0].retain);
    }

    #[test]
    fn test_publish_without_queueing_is_dropped_while_disconnected() {
        let manager = manager();

        assert!(!manager.dispatch("t/1", b"x".to_vec(), QoS::AtMostOnce, false, false));
        assert_eq!(manager.queue_len(), 0);

        let transport = Arc::new(MockTransport::new());
        let generation = manager.attach(transport.clone());
        manager.handle_connack(generation, 0);

        assert!(transport.published_to("t/1").is_empty());
    }

    #[test]
    fn test_connecting_state_still_queues() {
        let manager = manager();
        let transport = Arc::new(MockTransport::new());
        manager.attach(transport.clone());
        assert_eq!(manager.state(), ConnectionState::Connecting);

        assert!(manager.dispatch("t/1", b"x".to_vec(), QoS::AtMostOnce, false, true));
        assert!(transport.published().is_empty());
        assert_eq!(manager.queue_len(), 1);
    }

    #[test]
    fn test_stale_connack_is_ignored() {
        let manager = manager();
        let old = Arc::new(MockTransport::new());
        let stale_generation = manager.attach(old.clone());
        let fresh = Arc::new(MockTransport::new());
        let generation = manager.attach(fresh.clone());

        manager.handle_connack(stale_generation, 0);
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert!(old.published().is_empty());

        manager.handle_connack(generation, 0);
        assert_eq!(manager.state(), ConnectionState::Connected);

        manager.handle_disconnect(stale_generation, 7);
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_refused_connack_stays_disconnected() {
        let manager = manager();
        let transport = Arc::new(MockTransport::new());
        let generation = manager.attach(transport.clone());

        manager.handle_connack(generation, 5);

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(transport.published().is_empty());
    }

    #[test]
    fn test_connect_resubscribes_distinct_topics() {
        let manager = manager();
        let callback: SubscriptionCallback =
            Arc::new(|_: &InboundMessage, _: &[Value], _: &Map<String, Value>| Ok(()));
        for topic in ["octoprint/commands", "a/#", "octoprint/commands"] {
            manager.subscriptions.push(Subscription {
                topic: topic.to_string(),
                callback: callback.clone(),
                args: Vec::new(),
                kwargs: Map::new(),
            });
        }

        let transport = Arc::new(MockTransport::new());
        let generation = manager.attach(transport.clone());
        manager.handle_connack(generation, 0);

        assert_eq!(
            transport.subscriptions(),
            vec!["octoprint/commands".to_string(), "a/#".to_string()]
        );
    }

    #[test]
    fn test_baseline_reset_fires_once_until_rearmed() {
        let manager = manager();
        let listener = Arc::new(CountingListener(AtomicUsize::new(0)));
        let weak: Weak<dyn ConnectionListener> = Arc::downgrade(&listener) as Weak<dyn ConnectionListener>;
        manager.set_listener(weak);

        let transport = Arc::new(MockTransport::new());
        let generation = manager.attach(transport.clone());
        manager.handle_connack(generation, 0);
        manager.handle_disconnect(generation, 7);
        manager.handle_connack(generation, 0);
        assert_eq!(listener.0.load(Ordering::SeqCst), 1);

        manager.arm_reset();
        manager.handle_connack(generation, 0);
        assert_eq!(listener.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_queue_capacity_drops_oldest() {
        let mut config = BridgeConfig::default();
        config.publish.queue_capacity = Some(2);
        let manager = manager_with(config);

        for topic in ["t/1", "t/2", "t/3"] {
            manager.dispatch(topic, Vec::new(), QoS::AtMostOnce, false, true);
        }
        assert_eq!(manager.queue_len(), 2);

        let transport = Arc::new(MockTransport::new());
        let generation = manager.attach(transport.clone());
        manager.handle_connack(generation, 0);

        assert!(transport.published_to("t/1").is_empty());
        assert_eq!(transport.published_to("t/2").len(), 1);
        assert_eq!(transport.published_to("t/3").len(), 1);
        assert_eq!(manager.metrics.snapshot().outbound.dropped, 1);
    }

    #[test]
    fn test_backpressure_keeps_order() {
        // Arrange: the transport accepts the connected notice and one message
        let manager = manager();
        for topic in ["t/1", "t/2", "t/3"] {
            manager.dispatch(topic, Vec::new(), QoS::AtMostOnce, false, true);
        }
        let transport = Arc::new(MockTransport::new());
        transport.set_publish_budget(Some(2));

        // Act
        let generation = manager.attach(transport.clone());
        manager.handle_connack(generation, 0);
        assert_eq!(manager.queue_len(), 2);
        assert!(manager.dispatch("t/4", Vec::new(), QoS::AtMostOnce, false, false));

        transport.set_publish_budget(None);
        manager.pump_queue(generation);

        // Assert
        let topics: Vec<String> = transport.published().into_iter().map(|m| m.topic).collect();
        assert_eq!(topics, vec!["octoPrint/mqtt", "t/1", "t/2", "t/3", "t/4"]);
        assert_eq!(manager.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_publishes_last_will() {
        let manager = manager();
        let transport = Arc::new(MockTransport::new());
        let generation = manager.attach(transport.clone());
        manager.handle_connack(generation, 0);

        manager.disconnect(DisconnectOptions::shutdown()).await;

        let notices = transport.published_to("octoPrint/mqtt");
        assert_eq!(notices.len(), 2);
        assert_eq!(notices[1].payload, b"disconnected".to_vec());
        assert_eq!(notices[1].qos, QoS::AtLeastOnce);
        assert_eq!(transport.disconnect_count(), 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_uses_last_will_override() {
        let manager = manager();
        let transport = Arc::new(MockTransport::new());
        let generation = manager.attach(transport.clone());
        manager.handle_connack(generation, 0);

        manager
            .disconnect(DisconnectOptions {
                force: true,
                include_last_will: true,
                last_will_topic: Some("old/lw".to_string()),
            })
            .await;

        assert_eq!(transport.published_to("old/lw").len(), 1);
    }

    #[test]
    fn test_connect_without_url_is_inert() {
        let manager = manager();
        assert!(manager.connect().is_ok());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_connect_without_runtime_fails() {
        let mut config = BridgeConfig::default();
        config.broker.url = Some("localhost".to_string());
        let manager = manager_with(config);

        assert!(matches!(manager.connect(), Err(MqttError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_interruptible_sleep_stops_on_shutdown() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sleeper = tokio::spawn(interruptible_sleep(shutdown_rx, 10_000));

        shutdown_tx.send(true).unwrap();

        assert!(!sleeper.await.unwrap());
    }

    #[tokio::test]
    async fn test_network_loop_stops_during_reconnect_delay() {
        // Arrange: nothing listens on the discard port, so every poll fails
        let manager = manager();
        let (_client, eventloop) =
            AsyncClient::new(rumqttc::MqttOptions::new("loop-test", "127.0.0.1", 9), 10);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reconnect = ReconnectConfig {
            backoff_pattern: Vec::new(),
            sustained_delay: 60_000,
        };
        let task = tokio::spawn(run_network_loop(
            Arc::downgrade(&manager),
            0,
            eventloop,
            shutdown_rx,
            reconnect,
        ));
        tokio::time::sleep(Duration::from_millis(300)).await;

        // Act
        let _ = shutdown_tx.send(true);

        // Assert: the loop exits long before the reconnect delay elapses
        let finished = tokio::time::timeout(Duration::from_secs(5), task).await;
        assert!(finished.is_ok());
    }
}
