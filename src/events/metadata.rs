//! Per-file metadata published around a print job
//!
//! When a job starts, one retained message is published per configured key.
//! When it ends, every key is cleared with an empty retained message so stale
//! values do not outlive the job.

use super::names;
use crate::config::ConfigHandle;
use crate::host::{FileDestination, FileStorage};
use crate::outbound::{OutboundGateway, PublishOptions};
use crate::protocol::messages::Payload;
use crate::protocol::topics::{TopicKind, TopicResolver};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Look up a dotted key, descending only through objects
pub fn lookup_metadata<'a>(metadata: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    let mut parts = key.split('.');
    let first = parts.next()?;
    let mut value = metadata.get(first)?;
    for part in parts {
        value = value.as_object()?.get(part)?;
    }
    Some(value)
}

/// Wire form of a metadata value; composites become JSON text
pub fn metadata_payload(value: Option<&Value>) -> Payload {
    match value {
        None | Some(Value::Null) => Payload::Empty,
        Some(Value::String(s)) => Payload::Text(s.clone()),
        Some(composite @ (Value::Object(_) | Value::Array(_))) => {
            Payload::Text(composite.to_string())
        }
        Some(scalar) => Payload::Value(scalar.clone()),
    }
}

pub struct MetadataPublisher {
    gateway: OutboundGateway,
    config: ConfigHandle,
    files: Arc<dyn FileStorage>,
}

impl MetadataPublisher {
    pub fn new(gateway: OutboundGateway, config: ConfigHandle, files: Arc<dyn FileStorage>) -> Self {
        Self {
            gateway,
            config,
            files,
        }
    }

    /// Publish or clear metadata for a job event.
    ///
    /// Returns the keys that were handled.
    pub fn on_job_event(&self, origin: &str, path: &str, event: &str) -> Vec<String> {
        let config = self.config.snapshot();
        if !config.publish.metadata_active {
            return Vec::new();
        }

        let keys = config.publish.metadata_key_list();
        if keys.is_empty() {
            warn!("No metadata keys defined, can't publish metadata");
            return Vec::new();
        }

        let resolver = TopicResolver::new(&config);
        if resolver.resolve(TopicKind::Metadata).is_none() {
            warn!("No metadata topic defined, can't publish metadata");
            return Vec::new();
        }

        match event {
            names::PRINT_STARTED => {
                let destination = FileDestination::parse(origin).unwrap_or(FileDestination::Local);
                let metadata = self
                    .files
                    .additional_metadata(destination, path)
                    .unwrap_or_default();

                let mut published = Vec::new();
                for key in keys {
                    let Some(topic) = resolver.resolve_filled(TopicKind::Metadata, &key) else {
                        continue;
                    };
                    let payload = metadata_payload(lookup_metadata(&metadata, &key));
                    debug!(key = %key, path = %path, "Publishing metadata");
                    self.gateway.publish(&topic, payload, PublishOptions::default().raw());
                    published.push(key);
                }
                published
            }
            names::PRINT_DONE | names::PRINT_FAILED | names::PRINT_CANCELLED => {
                let mut cleared = Vec::new();
                for key in keys {
                    let Some(topic) = resolver.resolve_filled(TopicKind::Metadata, &key) else {
                        continue;
                    };
                    debug!(key = %key, "Clearing metadata");
                    self.gateway
                        .publish(&topic, Payload::Empty, PublishOptions::default().raw());
                    cleared.push(key);
                }
                cleared
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata() -> Map<String, Value> {
        json!({
            "analysis": {"estimatedPrintTime": 3600.5, "filament": {"tool0": {"length": 1200}}},
            "author": "printago",
            "tags": ["pla", "fast"],
            "empty": null
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn test_lookup_top_level_and_nested() {
        let metadata = metadata();

        assert_eq!(lookup_metadata(&metadata, "author"), Some(&json!("printago")));
        assert_eq!(
            lookup_metadata(&metadata, "analysis.filament.tool0.length"),
            Some(&json!(1200))
        );
        assert_eq!(lookup_metadata(&metadata, "analysis.missing"), None);
        assert_eq!(lookup_metadata(&metadata, "author.length"), None);
        assert_eq!(lookup_metadata(&metadata, "nope"), None);
    }

    #[test]
    fn test_metadata_payload_encoding() {
        let metadata = metadata();

        assert_eq!(
            metadata_payload(lookup_metadata(&metadata, "author")).encode(true),
            b"printago".to_vec()
        );
        assert_eq!(
            metadata_payload(lookup_metadata(&metadata, "analysis.estimatedPrintTime")).encode(true),
            b"3600.5".to_vec()
        );
        assert_eq!(
            metadata_payload(lookup_metadata(&metadata, "tags")).encode(true),
            br#"["pla","fast"]"#.to_vec()
        );
        assert!(metadata_payload(lookup_metadata(&metadata, "empty"))
            .encode(true)
            .is_empty());
        assert!(metadata_payload(None).encode(true).is_empty());
    }
}
