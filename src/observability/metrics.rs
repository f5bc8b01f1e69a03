//! Thread-safe bridge counters
//!
//! Atomic counters for the broker connection, the outbound gateway, inbound
//! dispatch and command processing. One collector is owned by each bridge
//! instance and shared by `Arc` with the components that update it.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Atomic counters for one bridge instance
#[derive(Debug)]
pub struct BridgeMetrics {
    // Connection
    connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connections_refused: AtomicU64,
    connections_lost: AtomicU64,
    connection_start_time: AtomicU64,

    // Outbound
    messages_published: AtomicU64,
    publish_failures: AtomicU64,
    messages_queued: AtomicU64,
    messages_dropped: AtomicU64,
    messages_flushed: AtomicU64,

    // Inbound
    messages_received: AtomicU64,
    callback_failures: AtomicU64,

    // Commands
    commands_processed: AtomicU64,
    command_errors: AtomicU64,

    started_at: AtomicU64,
}

impl BridgeMetrics {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connections_refused: AtomicU64::new(0),
            connections_lost: AtomicU64::new(0),
            connection_start_time: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            messages_queued: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            messages_flushed: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            callback_failures: AtomicU64::new(0),
            commands_processed: AtomicU64::new(0),
            command_errors: AtomicU64::new(0),
            started_at: AtomicU64::new(current_timestamp()),
        }
    }

    // Connection
    pub fn connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.connected.store(true, Ordering::Relaxed);
        self.connection_start_time
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn connection_refused(&self) {
        self.connections_refused.fetch_add(1, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn connection_lost(&self) {
        self.connections_lost.fetch_add(1, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    /// Orderly disconnect, not counted as a loss
    pub fn connection_closed(&self) {
        self.connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    // Outbound
    pub fn message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_queued(&self) {
        self.messages_queued.fetch_add(1, Ordering::Relaxed);
    }

    /// A publish refused while disconnected, or a queue entry evicted on overflow
    pub fn message_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn messages_flushed(&self, count: u64) {
        self.messages_flushed.fetch_add(count, Ordering::Relaxed);
    }

    // Inbound
    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn callback_failed(&self) {
        self.callback_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Commands
    pub fn command_processed(&self, success: bool) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.command_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let connection_start = self.connection_start_time.load(Ordering::Relaxed);
        let connection_duration_seconds = if connection_start > 0 {
            now.saturating_sub(connection_start)
        } else {
            0
        };

        MetricsSnapshot {
            connection: ConnectionMetrics {
                connected: self.connected.load(Ordering::Relaxed),
                attempts: self.connection_attempts.load(Ordering::Relaxed),
                established: self.connections_established.load(Ordering::Relaxed),
                refused: self.connections_refused.load(Ordering::Relaxed),
                lost: self.connections_lost.load(Ordering::Relaxed),
                connection_duration_seconds,
            },
            outbound: OutboundMetrics {
                published: self.messages_published.load(Ordering::Relaxed),
                publish_failures: self.publish_failures.load(Ordering::Relaxed),
                queued: self.messages_queued.load(Ordering::Relaxed),
                dropped: self.messages_dropped.load(Ordering::Relaxed),
                flushed: self.messages_flushed.load(Ordering::Relaxed),
            },
            inbound: InboundMetrics {
                received: self.messages_received.load(Ordering::Relaxed),
                callback_failures: self.callback_failures.load(Ordering::Relaxed),
                commands_processed: self.commands_processed.load(Ordering::Relaxed),
                command_errors: self.command_errors.load(Ordering::Relaxed),
            },
            uptime_seconds: now.saturating_sub(self.started_at.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }
}

impl Default for BridgeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub connection: ConnectionMetrics,
    pub outbound: OutboundMetrics,
    pub inbound: InboundMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionMetrics {
    pub connected: bool,
    pub attempts: u64,
    pub established: u64,
    pub refused: u64,
    pub lost: u64,
    pub connection_duration_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundMetrics {
    pub published: u64,
    pub publish_failures: u64,
    pub queued: u64,
    pub dropped: u64,
    pub flushed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct InboundMetrics {
    pub received: u64,
    pub callback_failures: u64,
    pub commands_processed: u64,
    pub command_errors: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
