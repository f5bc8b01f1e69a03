//! Subscription table and inbound dispatch
//!
//! Each subscription pairs an MQTT topic filter with a callback and the extra
//! positional and keyword arguments it was registered with. Incoming messages
//! are matched against every filter; each matching callback runs independently
//! and a failing callback never affects the others or the connection.

use crate::observability::metrics::BridgeMetrics;
use crate::protocol::topics::topic_matches_filter;
use crate::transport::mqtt::client::ConnectionManager;
use crate::transport::mqtt::message_handler::InboundMessage;
use parking_lot::RwLock;
use rumqttc::QoS;
use serde_json::{Map, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error};

/// Error a subscription callback may report
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Callback invoked with the message plus the registered args and kwargs
pub type SubscriptionCallback =
    Arc<dyn Fn(&InboundMessage, &[Value], &Map<String, Value>) -> Result<(), CallbackError> + Send + Sync>;

/// One registered subscription
#[derive(Clone)]
pub struct Subscription {
    pub topic: String,
    pub callback: SubscriptionCallback,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("args", &self.args)
            .field("kwargs", &self.kwargs)
            .finish_non_exhaustive()
    }
}

/// Append-only list of subscriptions, shrunk only by explicit unsubscribe
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    entries: RwLock<Vec<Subscription>>,
}

impl SubscriptionTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, subscription: Subscription) {
        debug!(topic = %subscription.topic, "Registering subscription");
        self.entries.write().push(subscription);
    }

    /// Remove entries registered with `callback` (and `topic`, if given).
    ///
    /// Returns the distinct topic filters that were removed.
    pub fn remove(&self, callback: &SubscriptionCallback, topic: Option<&str>) -> Vec<String> {
        let mut removed = Vec::new();
        self.entries.write().retain(|entry| {
            let matches = Arc::ptr_eq(&entry.callback, callback)
                && topic.map_or(true, |t| t == entry.topic);
            if matches && !removed.contains(&entry.topic) {
                removed.push(entry.topic.clone());
            }
            !matches
        });
        removed
    }

    /// Distinct topic filters in registration order
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = Vec::new();
        for entry in self.entries.read().iter() {
            if !topics.contains(&entry.topic) {
                topics.push(entry.topic.clone());
            }
        }
        topics
    }

    /// Subscriptions whose filter matches `topic`
    pub fn matching(&self, topic: &str) -> Vec<Subscription> {
        self.entries
            .read()
            .iter()
            .filter(|entry| topic_matches_filter(&entry.topic, topic))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Invoke every matching callback, isolating failures and panics.
    ///
    /// The table lock is released before any callback runs, so callbacks may
    /// subscribe or unsubscribe. Returns the number of callbacks invoked.
    pub fn dispatch(&self, message: &InboundMessage, metrics: &BridgeMetrics) -> usize {
        let matching = self.matching(&message.topic);

        for subscription in &matching {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                (subscription.callback)(message, &subscription.args, &subscription.kwargs)
            }));

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    metrics.callback_failed();
                    error!(
                        topic = %message.topic,
                        filter = %subscription.topic,
                        error = %e,
                        "Error while calling mqtt callback"
                    );
                }
                Err(_) => {
                    metrics.callback_failed();
                    error!(
                        topic = %message.topic,
                        filter = %subscription.topic,
                        "mqtt callback panicked"
                    );
                }
            }
        }

        matching.len()
    }
}

/// Public subscribe/unsubscribe surface over the shared table
#[derive(Clone)]
pub struct InboundRouter {
    manager: Arc<ConnectionManager>,
    table: Arc<SubscriptionTable>,
}

impl InboundRouter {
    pub fn new(manager: Arc<ConnectionManager>, table: Arc<SubscriptionTable>) -> Self {
        Self { manager, table }
    }

    /// Register a callback for `topic`. Subscribes at the broker right away
    /// when connected, otherwise on the next connect.
    pub fn subscribe(
        &self,
        topic: impl Into<String>,
        callback: SubscriptionCallback,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) {
        let subscription = Subscription {
            topic: topic.into(),
            callback,
            args,
            kwargs,
        };

        self.manager.with_connected_transport(|transport| {
            let topic = subscription.topic.clone();
            self.table.push(subscription);
            if let Some(transport) = transport {
                if let Err(e) = transport.subscribe_many(std::slice::from_ref(&topic), QoS::AtMostOnce) {
                    error!(topic = %topic, error = %e, "Failed to subscribe");
                }
            }
        });
    }

    /// Remove the callback's subscriptions (only for `topic`, if given).
    ///
    /// Returns the topic filters that were removed. A filter still held by
    /// another callback stays subscribed at the broker.
    pub fn unsubscribe(&self, callback: &SubscriptionCallback, topic: Option<&str>) -> Vec<String> {
        self.manager.with_connected_transport(|transport| {
            let removed = self.table.remove(callback, topic);
            if let Some(transport) = transport {
                let remaining = self.table.topics();
                for topic in removed.iter().filter(|t| !remaining.contains(t)) {
                    if let Err(e) = transport.unsubscribe(topic) {
                        error!(topic = %topic, error = %e, "Failed to unsubscribe");
                    }
                }
            }
            removed
        })
    }

    pub fn table(&self) -> &Arc<SubscriptionTable> {
        &self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recording_callback(log: Arc<Mutex<Vec<String>>>) -> SubscriptionCallback {
        Arc::new(move |message: &InboundMessage, _args: &[Value], _kwargs: &Map<String, Value>| {
            log.lock().push(message.topic.clone());
            Ok(())
        })
    }

    fn subscription(topic: &str, callback: &SubscriptionCallback) -> Subscription {
        Subscription {
            topic: topic.to_string(),
            callback: callback.clone(),
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    #[test]
    fn test_dispatch_to_all_matching() {
        let table = SubscriptionTable::new();
        let metrics = BridgeMetrics::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let callback = recording_callback(log.clone());

        table.push(subscription("octoprint/+/status", &callback));
        table.push(subscription("octoprint/#", &callback));
        table.push(subscription("other/topic", &callback));

        let invoked = table.dispatch(
            &InboundMessage::new("octoprint/printer1/status", "{}"),
            &metrics,
        );

        assert_eq!(invoked, 2);
        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    fn test_failing_callback_is_isolated() {
        let table = SubscriptionTable::new();
        let metrics = BridgeMetrics::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let failing: SubscriptionCallback =
            Arc::new(|_: &InboundMessage, _: &[Value], _: &Map<String, Value>| Err("boom".into()));
        let panicking: SubscriptionCallback =
            Arc::new(|_: &InboundMessage, _: &[Value], _: &Map<String, Value>| panic!("kaboom"));
        let recording = recording_callback(log.clone());

        table.push(subscription("a/b", &failing));
        table.push(subscription("a/b", &panicking));
        table.push(subscription("a/b", &recording));

        let invoked = table.dispatch(&InboundMessage::new("a/b", "x"), &metrics);

        assert_eq!(invoked, 3);
        assert_eq!(log.lock().as_slice(), ["a/b".to_string()]);
        assert_eq!(metrics.snapshot().inbound.callback_failures, 2);
    }

    #[test]
    fn test_args_and_kwargs_are_passed_through() {
        let table = SubscriptionTable::new();
        let metrics = BridgeMetrics::new();
        let seen = Arc::new(Mutex::new(None));

        let seen_clone = seen.clone();
        let callback: SubscriptionCallback = Arc::new(
            move |message: &InboundMessage, args: &[Value], kwargs: &Map<String, Value>| {
                *seen_clone.lock() = Some((message.retained, args.to_vec(), kwargs.clone()));
                Ok(())
            },
        );

        let mut kwargs = Map::new();
        kwargs.insert("source".to_string(), Value::from("test"));
        table.push(Subscription {
            topic: "x/y".to_string(),
            callback,
            args: vec![Value::from(1)],
            kwargs,
        });

        let mut message = InboundMessage::new("x/y", "payload");
        message.retained = true;
        table.dispatch(&message, &metrics);

        let (retained, args, kwargs) = seen.lock().clone().unwrap();
        assert!(retained);
        assert_eq!(args, vec![Value::from(1)]);
        assert_eq!(kwargs["source"], "test");
    }

    #[test]
    fn test_remove_by_callback_and_topic() {
        let table = SubscriptionTable::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = recording_callback(log.clone());
        let second = recording_callback(log);

        table.push(subscription("a", &first));
        table.push(subscription("b", &first));
        table.push(subscription("a", &second));

        assert_eq!(table.remove(&first, Some("a")), vec!["a".to_string()]);
        assert_eq!(table.len(), 2);

        assert_eq!(table.remove(&first, None), vec!["b".to_string()]);
        assert_eq!(table.topics(), vec!["a".to_string()]);
    }

    #[test]
    fn test_topics_are_deduplicated_in_order() {
        let table = SubscriptionTable::new();
        let callback = recording_callback(Arc::new(Mutex::new(Vec::new())));

        table.push(subscription("b", &callback));
        table.push(subscription("a", &callback));
        table.push(subscription("b", &callback));

        assert_eq!(table.topics(), vec!["b".to_string(), "a".to_string()]);
    }
}
