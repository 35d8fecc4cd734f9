//! # helix-realtime
//!
//! Real-time event broadcast hub for the tracker.
//!
//! - [`Hub`]: the coordinator task that owns the session registry and fans
//!   events out to matching, permitted sessions
//! - [`Session`]: per-connection state, bounded outbound queue, lifecycle
//! - [`websocket`]: handshake gateway and the read/write loops
//! - [`Publisher`]: the publish-side API used by entity handlers
//! - [`RealtimeServer`]: axum router with `/health`, `{path}/stats` and
//!   `/metrics`

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod errors;
pub mod health;
pub mod hub;
pub mod metrics;
pub mod permission;
pub mod publisher;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod stats;
pub mod websocket;

pub use auth::{Identity, IdentityClaims, JwtTokenValidator, TokenValidator, UnconfiguredValidator};
pub use config::{HubConfig, ServerConfig};
pub use errors::{AuthError, HubError, PermissionCheckError};
pub use hub::Hub;
pub use permission::{PermissionChecker, PermissionFilter, Verdict};
pub use publisher::Publisher;
pub use server::{AppState, RealtimeServer};
pub use session::{CloseReason, Session, SessionState};
pub use shutdown::ShutdownCoordinator;
pub use stats::{HubStats, StatsResponse};
