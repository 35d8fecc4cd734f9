//! Graceful shutdown: stop accepting, close sessions, then wait for the
//! listener to drain.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::hub::Hub;

/// Default bound on waiting for server tasks.
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Sequences shutdown of the listener and the hub.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    drain_timeout: Duration,
}

impl ShutdownCoordinator {
    /// Coordinator with the default drain timeout.
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_DRAIN_TIMEOUT)
    }

    /// Coordinator that waits at most `drain_timeout` for server tasks.
    pub fn with_timeout(drain_timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            drain_timeout,
        }
    }

    /// Token the listener watches to stop accepting connections.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Signal the listener to stop accepting.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has started.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stop accepting, stop the hub (closing every session), then wait for
    /// `handles`. Returns `false` if the wait timed out.
    pub async fn graceful_shutdown(&self, hub: &Hub, handles: Vec<JoinHandle<()>>) -> bool {
        self.trigger();
        hub.stop().await;
        info!(
            task_count = handles.len(),
            timeout_secs = self.drain_timeout.as_secs(),
            "waiting for server tasks"
        );

        match tokio::time::timeout(self.drain_timeout, futures::future::join_all(handles)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        warn!(error = %e, "server task failed during shutdown");
                    }
                }
                true
            }
            Err(_) => {
                warn!(timeout = ?self.drain_timeout, "shutdown timed out; some tasks may still be running");
                false
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
