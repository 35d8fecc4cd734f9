//! # helix-hubd
//!
//! Realtime event hub daemon: loads settings, starts the hub and serves the
//! WebSocket upgrade path alongside `/health` and `/metrics`.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use helix_realtime::{
    Hub, HubConfig, JwtTokenValidator, RealtimeServer, ServerConfig, TokenValidator,
    UnconfiguredValidator,
};
use helix_settings::HelixSettings;

/// Realtime event hub.
#[derive(Parser, Debug)]
#[command(name = "helix-hubd", about = "Realtime event hub")]
struct Cli {
    /// Settings file (JSON). Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Log filter when `RUST_LOG` is unset (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Log one JSON object per line.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    /// Command-line flags win over the settings file and environment.
    fn apply_overrides(&self, settings: &mut HelixSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.log_json {
            settings.logging.json = true;
        }
    }
}

fn token_validator(settings: &HelixSettings) -> Arc<dyn TokenValidator> {
    match settings.auth.jwt_secret.as_deref().filter(|s| !s.is_empty()) {
        Some(secret) => Arc::new(JwtTokenValidator::new(secret)),
        None => {
            if settings.realtime.require_auth {
                tracing::warn!("no JWT secret configured; every authenticated handshake will fail");
            }
            Arc::new(UnconfiguredValidator)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = helix_settings::load_settings(cli.config.as_deref())
        .context("Failed to load settings")?;
    cli.apply_overrides(&mut settings);

    helix_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);

    let metrics_handle =
        helix_realtime::metrics::install_recorder().context("Failed to install metrics recorder")?;

    let hub = Hub::new(HubConfig::from(&settings.realtime));
    if hub.config().enabled {
        hub.start().context("Failed to start hub")?;
    } else {
        tracing::info!("realtime events disabled; upgrade path will answer 503");
    }

    let server = RealtimeServer::new(
        ServerConfig::from(&settings.server),
        hub,
        token_validator(&settings),
    )
    .with_metrics(metrics_handle);
    let (addr, handle) = server
        .listen()
        .await
        .context("Failed to bind listener")?;
    tracing::info!(%addr, "helix-hubd ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let drained = server
        .shutdown()
        .graceful_shutdown(server.hub(), vec![handle])
        .await;
    if !drained {
        tracing::warn!("server tasks did not finish within the drain timeout");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
