//! `/health` endpoint body.

use std::time::Instant;

use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while the hub runs, `"degraded"` otherwise.
    pub status: &'static str,
    /// Seconds since the server was built.
    pub uptime_secs: u64,
    /// Registered sessions.
    pub connections: usize,
    /// Whether the coordinator is running.
    pub hub_running: bool,
}

/// Build a health response from live values.
pub fn health_check(start_time: Instant, connections: usize, hub_running: bool) -> HealthResponse {
    HealthResponse {
        status: if hub_running { "ok" } else { "degraded" },
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        hub_running,
    }
}
