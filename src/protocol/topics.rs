//! Topic resolution and MQTT topic-filter matching
//!
//! Outbound topics are `base_topic + template`, where the template may carry a
//! single placeholder (`{event}`, `{progress}`, `{temp}`, `{key}`) that the
//! caller fills with [`fill_topic`]. A kind whose active flag is off, or whose
//! template is empty, resolves to nothing.

use crate::config::{BridgeConfig, PublishSection};

/// Kinds of outbound topic derived from the publish configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    Event,
    Progress,
    Temperature,
    Metadata,
    LastWill,
}

impl TopicKind {
    /// Placeholder name the template for this kind expects, if any
    pub fn placeholder(&self) -> Option<&'static str> {
        match self {
            TopicKind::Event => Some("event"),
            TopicKind::Progress => Some("progress"),
            TopicKind::Temperature => Some("temp"),
            TopicKind::Metadata => Some("key"),
            TopicKind::LastWill => None,
        }
    }
}

/// Pure view over the publish section that computes topic templates
#[derive(Debug, Clone, Copy)]
pub struct TopicResolver<'a> {
    publish: &'a PublishSection,
}

impl<'a> TopicResolver<'a> {
    pub fn new(config: &'a BridgeConfig) -> Self {
        Self {
            publish: &config.publish,
        }
    }

    pub fn from_publish(publish: &'a PublishSection) -> Self {
        Self { publish }
    }

    /// Resolve the topic template for `kind`, or `None` when it is inactive or empty
    pub fn resolve(&self, kind: TopicKind) -> Option<String> {
        let (template, active) = match kind {
            TopicKind::Event => (&self.publish.event_topic, self.publish.event_active),
            TopicKind::Progress => (&self.publish.progress_topic, self.publish.progress_active),
            TopicKind::Temperature => (
                &self.publish.temperature_topic,
                self.publish.temperature_active,
            ),
            TopicKind::Metadata => (&self.publish.metadata_topic, self.publish.metadata_active),
            TopicKind::LastWill => (&self.publish.lw_topic, self.publish.lw_active),
        };

        if !active || template.is_empty() {
            return None;
        }

        Some(format!("{}{}", self.publish.base_topic, template))
    }

    /// Resolve and fill in one step
    pub fn resolve_filled(&self, kind: TopicKind, value: &str) -> Option<String> {
        let template = self.resolve(kind)?;
        Some(match kind.placeholder() {
            Some(name) => fill_topic(&template, name, value),
            None => template,
        })
    }
}

/// Replace every `{placeholder}` in `template` with `value`
pub fn fill_topic(template: &str, placeholder: &str, value: &str) -> String {
    template.replace(&format!("{{{placeholder}}}"), value)
}

/// Check whether a concrete topic matches a subscription filter.
///
/// `+` matches exactly one level and `#` matches the remaining levels
/// (including none). Topics starting with `$` are never matched by a
/// wildcard in the first level.
pub fn topic_matches_filter(filter: &str, topic: &str) -> bool {
    let topic_levels: Vec<&str> = topic.split('/').collect();
    let filter_levels: Vec<&str> = filter.split('/').collect();

    let topic_starts_with_dollar = topic_levels.first().is_some_and(|l| l.starts_with('$'));
    let filter_starts_with_wildcard = filter_levels
        .first()
        .is_some_and(|l| *l == "#" || *l == "+");

    if topic_starts_with_dollar && filter_starts_with_wildcard {
        return false;
    }

    let mut ti = 0;
    let mut fi = 0;

    while fi < filter_levels.len() {
        let filter_level = filter_levels[fi];

        if filter_level == "#" {
            return true;
        }

        if ti >= topic_levels.len() {
            return false;
        }

        if filter_level == "+" || filter_level == topic_levels[ti] {
            ti += 1;
            fi += 1;
        } else {
            return false;
        }
    }

    ti == topic_levels.len()
}
