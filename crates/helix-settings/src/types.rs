//! Settings types.
//!
//! Every struct is `#[serde(default)]`, so a settings file only needs the
//! keys it changes. Field names are camelCase on disk.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HelixSettings {
    /// HTTP listener.
    pub server: ServerSettings,
    /// Realtime hub tuning.
    pub realtime: RealtimeSettings,
    /// Token validation.
    pub auth: AuthSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl HelixSettings {
    /// Reject combinations the hub cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.realtime.validate()
    }
}

/// HTTP listener settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port; `0` picks an ephemeral port.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Realtime hub settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RealtimeSettings {
    /// Serve the upgrade endpoint at all.
    pub enabled: bool,
    /// Upgrade path.
    pub path: String,
    /// Transport read buffer in bytes.
    pub read_buffer_size: usize,
    /// Transport write buffer in bytes.
    pub write_buffer_size: usize,
    /// Largest accepted inbound message in bytes.
    pub max_message_size: usize,
    /// Deadline for flushing one outbound batch.
    pub write_wait_ms: u64,
    /// Silence tolerated before a session is considered gone.
    pub pong_wait_ms: u64,
    /// Interval between keepalive pings; must be below `pong_wait_ms`.
    pub ping_period_ms: u64,
    /// Deadline for resolving identity during the handshake.
    pub handshake_timeout_ms: u64,
    /// Maximum concurrent sessions.
    pub max_clients: usize,
    /// Reject handshakes without a valid token.
    pub require_auth: bool,
    /// Allowed `Origin` values; empty or `*` allows all.
    pub allow_origins: Vec<String>,
    /// Request permessage-deflate.
    pub enable_compression: bool,
    /// Outbound queue bound per session.
    pub send_queue_capacity: usize,
    /// Bounded wait for register/unregister/broadcast hand-off.
    pub register_timeout_ms: u64,
    /// Stale-session sweep interval.
    pub sweep_interval_ms: u64,
    /// Deadline for one external permission check.
    pub permission_check_timeout_ms: u64,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/ws".to_string(),
            read_buffer_size: 1024,
            write_buffer_size: 1024,
            max_message_size: 512 * 1024,
            write_wait_ms: 10_000,
            pong_wait_ms: 60_000,
            ping_period_ms: 54_000,
            handshake_timeout_ms: 10_000,
            max_clients: 1000,
            require_auth: true,
            allow_origins: vec!["*".to_string()],
            enable_compression: true,
            send_queue_capacity: 256,
            register_timeout_ms: 5000,
            sweep_interval_ms: 10_000,
            permission_check_timeout_ms: 2000,
        }
    }
}

impl RealtimeSettings {
    /// Reject combinations the hub cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.ping_period_ms >= self.pong_wait_ms {
            return Err(SettingsError::PingNotBeforePong {
                ping_ms: self.ping_period_ms,
                pong_ms: self.pong_wait_ms,
            });
        }
        if self.permission_check_timeout_ms >= self.register_timeout_ms {
            return Err(SettingsError::CheckOutlastsHandOff {
                check_ms: self.permission_check_timeout_ms,
                register_ms: self.register_timeout_ms,
            });
        }
        if self.max_clients == 0 {
            return Err(SettingsError::ZeroLimit("maxClients"));
        }
        if self.send_queue_capacity == 0 {
            return Err(SettingsError::ZeroLimit("sendQueueCapacity"));
        }
        if !self.path.starts_with('/') {
            return Err(SettingsError::RelativePath(self.path.clone()));
        }
        Ok(())
    }
}

/// Token validation settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// HS256 shared secret. Without one no token validates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// One JSON object per line instead of the compact format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
