//! Health check HTTP server
//!
//! Provides HTTP endpoints for monitoring the bridge, for both human
//! operators and container orchestration platforms.

use crate::observability::metrics::MetricsSnapshot;
use crate::transport::mqtt::ConnectionState;
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use warp::http::StatusCode;
use warp::Filter;

/// Live view of the bridge the health endpoints report on
pub trait HealthProbe: Send + Sync {
    fn connection_state(&self) -> ConnectionState;
    fn queue_depth(&self) -> usize;
    fn metrics(&self) -> MetricsSnapshot;
}

/// HTTP health check server
pub struct HealthServer {
    printer_id: String,
    port: u16,
    probe: Arc<dyn HealthProbe>,
}

impl HealthServer {
    pub fn new(printer_id: String, port: u16, probe: Arc<dyn HealthProbe>) -> Self {
        Self {
            printer_id,
            port,
            probe,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// All endpoints as one warp filter
    pub fn routes(
        self: &Arc<Self>,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
        let health_server = self.clone();
        let metrics_server = self.clone();
        let ready_server = self.clone();

        // GET /health - connection state, queue depth and counters
        let health_route = warp::path("health")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move || {
                let server = health_server.clone();
                async move {
                    let status = server.health_status();
                    let code = if status.status == "healthy" {
                        StatusCode::OK
                    } else {
                        StatusCode::SERVICE_UNAVAILABLE
                    };
                    Ok::<_, Infallible>(warp::reply::with_status(warp::reply::json(&status), code))
                }
            });

        // GET /metrics
        let metrics_route = warp::path("metrics")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move || {
                let server = metrics_server.clone();
                async move { Ok::<_, Infallible>(warp::reply::json(&server.probe.metrics())) }
            });

        // GET /ready - readiness probe, ready only while connected
        let ready_route = warp::path("ready")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move || {
                let server = ready_server.clone();
                async move {
                    let ready = server.probe.connection_state() == ConnectionState::Connected;
                    let response = ReadinessResponse {
                        ready,
                        timestamp: current_timestamp(),
                    };
                    let code = if ready {
                        StatusCode::OK
                    } else {
                        StatusCode::SERVICE_UNAVAILABLE
                    };
                    Ok::<_, Infallible>(warp::reply::with_status(warp::reply::json(&response), code))
                }
            });

        // GET /live - liveness probe
        let live_route = warp::path("live")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| {
                warp::reply::json(&LivenessResponse {
                    alive: true,
                    timestamp: current_timestamp(),
                })
            });

        // GET / - endpoint listing
        let root_route = warp::path::end().and(warp::get()).map(|| {
            let endpoints: HashMap<&str, &str> = [
                ("/health", "Connection state, queue depth and counters"),
                ("/metrics", "Bridge counters"),
                ("/ready", "Readiness probe, 200 while connected to the broker"),
                ("/live", "Liveness probe"),
            ]
            .into_iter()
            .collect();
            warp::reply::json(&endpoints)
        });

        health_route
            .or(metrics_route)
            .or(ready_route)
            .or(live_route)
            .or(root_route)
    }

    /// Serve until the task is dropped
    pub async fn start(self: Arc<Self>) {
        let routes = self.routes();
        tracing::info!("Starting health server on port {}", self.port);
        warp::serve(routes).run(([0, 0, 0, 0], self.port)).await;
    }

    fn health_status(&self) -> HealthStatus {
        let state = self.probe.connection_state();
        let status = match state {
            ConnectionState::Connected => "healthy",
            ConnectionState::Connecting => "degraded",
            ConnectionState::Disconnected => "unhealthy",
        };

        HealthStatus {
            status: status.to_string(),
            timestamp: current_timestamp(),
            printer_id: self.printer_id.clone(),
            connection_state: state.as_str().to_string(),
            queue_depth: self.probe.queue_depth(),
            metrics: self.probe.metrics(),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: String,
    timestamp: u64,
    printer_id: String,
    connection_state: String,
    queue_depth: usize,
    metrics: MetricsSnapshot,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
