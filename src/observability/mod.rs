//! Observability for the bridge
//!
//! Structured logging, per-bridge counters and the optional HTTP health
//! endpoints.

pub mod health;
pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use health::{HealthProbe, HealthServer};
pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{BridgeMetrics, MetricsSnapshot};

// Span macros for structured logging
pub use crate::{command_span, mqtt_span};
