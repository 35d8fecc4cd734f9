//! Prometheus metrics recorder and metric names.
//!
//! The hub records through the `metrics` facade only. Whoever boots the
//! process installs the recorder and hands the handle to the HTTP server.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus recorder as the global `metrics` recorder.
///
/// Call once at startup, before anything is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants.

/// Sessions registered total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Sessions unregistered total (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Registered sessions (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Sessions evicted because their outbound queue was full (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Session lifetime in seconds (histogram).
pub const WS_SESSION_DURATION_SECONDS: &str = "ws_session_duration_seconds";
/// Handshakes rejected before upgrade (counter, labels: code).
pub const WS_HANDSHAKE_REJECTIONS_TOTAL: &str = "ws_handshake_rejections_total";
/// Events accepted for broadcast (counter, labels: event_type).
pub const EVENTS_BROADCAST_TOTAL: &str = "events_broadcast_total";
/// Event deliveries queued to sessions (counter).
pub const EVENTS_DELIVERED_TOTAL: &str = "events_delivered_total";
/// Permission-check failures (counter).
pub const PERMISSION_CHECK_ERRORS_TOTAL: &str = "permission_check_errors_total";
