//! Error types for the hub, authentication and permission checks.

use thiserror::Error;

/// Failures reported by [`Hub`](crate::hub::Hub) operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HubError {
    /// The coordinator is not running.
    #[error("hub is not running")]
    NotRunning,
    /// `start` was called on a running hub.
    #[error("hub is already running")]
    AlreadyRunning,
    /// Registration would exceed the connection limit.
    #[error("maximum number of clients reached ({max})")]
    CapacityReached {
        /// Configured limit.
        max: usize,
    },
    /// Hand-off to the coordinator did not complete in time.
    #[error("timed out waiting for hub to {operation}")]
    Timeout {
        /// Operation that timed out.
        operation: &'static str,
    },
}

/// Failures resolving a session identity from a token.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// No token was presented.
    #[error("authentication token is required")]
    MissingToken,
    /// The token failed validation.
    #[error("invalid token: {0}")]
    InvalidToken(String),
    /// The token's expiry has passed.
    #[error("token has expired")]
    Expired,
    /// Validation did not complete before the handshake deadline.
    #[error("token validation timed out")]
    Timeout,
    /// No validator is configured.
    #[error("token validation is not configured")]
    NotConfigured,
}

/// The external permission service failed to answer.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("permission check failed: {0}")]
pub struct PermissionCheckError(pub String);
