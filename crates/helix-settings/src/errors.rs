//! Why a settings file or the merged settings were refused.

use std::path::PathBuf;

use thiserror::Error;

/// Settings could not be loaded or describe a hub that cannot run.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File that was opened.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
    /// The file is not JSON or does not fit the settings shape.
    #[error("malformed settings in {}: {source}", path.display())]
    Malformed {
        /// File that was parsed.
        path: PathBuf,
        /// Underlying parse failure.
        source: serde_json::Error,
    },
    /// Pings would never arrive before the read deadline passes.
    #[error("realtime.pingPeriodMs ({ping_ms}) must be less than realtime.pongWaitMs ({pong_ms})")]
    PingNotBeforePong {
        /// Configured ping interval.
        ping_ms: u64,
        /// Configured read deadline.
        pong_ms: u64,
    },
    /// A permission check could outlast the coordinator hand-off wait.
    #[error(
        "realtime.permissionCheckTimeoutMs ({check_ms}) must be less than realtime.registerTimeoutMs ({register_ms})"
    )]
    CheckOutlastsHandOff {
        /// Configured permission check deadline.
        check_ms: u64,
        /// Configured hand-off wait.
        register_ms: u64,
    },
    /// A limit that must admit at least one item is zero.
    #[error("realtime.{0} must be greater than 0")]
    ZeroLimit(&'static str),
    /// The upgrade path is not absolute.
    #[error("realtime.path must start with '/': {0}")]
    RelativePath(String),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
