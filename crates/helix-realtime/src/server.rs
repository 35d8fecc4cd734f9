//! `RealtimeServer`: axum router and listener for the hub.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::auth::TokenValidator;
use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::hub::Hub;
use crate::metrics;
use crate::publisher::Publisher;
use crate::shutdown::ShutdownCoordinator;
use crate::stats::StatsResponse;
use crate::websocket::gateway::ws_handler;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The coordinator handle.
    pub hub: Hub,
    /// Handshake token validator.
    pub validator: Arc<dyn TokenValidator>,
    /// Prometheus handle for `/metrics`, if a recorder was installed.
    pub metrics: Option<PrometheusHandle>,
    /// When the server was built.
    pub start_time: Instant,
}

/// HTTP surface of the realtime hub.
pub struct RealtimeServer {
    config: ServerConfig,
    hub: Hub,
    validator: Arc<dyn TokenValidator>,
    metrics: Option<PrometheusHandle>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl RealtimeServer {
    /// Create a server around an existing hub.
    pub fn new(config: ServerConfig, hub: Hub, validator: Arc<dyn TokenValidator>) -> Self {
        Self {
            config,
            hub,
            validator,
            metrics: None,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the router.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: self.hub.clone(),
            validator: Arc::clone(&self.validator),
            metrics: self.metrics.clone(),
            start_time: self.start_time,
        };
        let path = self.hub.config().path.clone();
        let stats_path = format!("{}/stats", path.trim_end_matches('/'));

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route(&path, get(ws_handler))
            .route(&stats_path, get(stats_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind and serve in the background. Returns the bound address and the
    /// serving task, which ends once the shutdown token is cancelled.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener =
            tokio::net::TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        let app = self.router();
        let token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "server stopped with error");
            }
        });
        info!(%addr, path = %self.hub.config().path, "realtime server listening");
        Ok((addr, handle))
    }

    /// The hub this server fronts.
    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Publisher bound to this server's hub.
    pub fn publisher(&self) -> Publisher {
        Publisher::for_hub(&self.hub)
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Listener configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.hub.stats().active_connections;
    Json(health::health_check(
        state.start_time,
        connections,
        state.hub.is_running(),
    ))
}

/// GET {path}/stats
async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::from(state.hub.stats()))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
