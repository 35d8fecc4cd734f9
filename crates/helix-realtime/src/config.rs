//! Runtime configuration for the hub and its HTTP listener.
//!
//! The settings crate stores durations as milliseconds; these structs hold
//! the converted [`Duration`]s the hub and gateway actually use.

use std::time::Duration;

use helix_settings::{RealtimeSettings, ServerSettings};

/// Hub and gateway tuning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HubConfig {
    /// Serve the upgrade endpoint at all.
    pub enabled: bool,
    /// Upgrade path, e.g. `/ws`.
    pub path: String,
    /// Transport read buffer in bytes.
    pub read_buffer_size: usize,
    /// Transport write buffer in bytes.
    pub write_buffer_size: usize,
    /// Largest accepted inbound message in bytes.
    pub max_message_size: usize,
    /// Deadline for flushing one outbound batch.
    pub write_wait: Duration,
    /// Silence tolerated before the read side gives up.
    pub pong_wait: Duration,
    /// Interval between keepalive pings.
    pub ping_period: Duration,
    /// Deadline for resolving identity during the handshake.
    pub handshake_timeout: Duration,
    /// Maximum concurrent sessions.
    pub max_clients: usize,
    /// Reject handshakes without a token.
    pub require_auth: bool,
    /// Allowed `Origin` values; empty or `*` allows all.
    pub allow_origins: Vec<String>,
    /// Requested permessage-deflate. Logged, never negotiated.
    pub enable_compression: bool,
    /// Outbound queue bound per session.
    pub send_queue_capacity: usize,
    /// Bounded wait for hand-off to the coordinator.
    pub register_timeout: Duration,
    /// Stale-session sweep interval.
    pub sweep_interval: Duration,
    /// Deadline for one external permission check.
    pub permission_check_timeout: Duration,
}

impl HubConfig {
    /// Keepalive age after which the sweep evicts a session.
    pub fn stale_after(&self) -> Duration {
        self.pong_wait * 2
    }

    /// Whether a handshake from `origin` is acceptable.
    ///
    /// A missing `Origin` header is only accepted when every origin is.
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        if self.allow_origins.is_empty() || self.allow_origins.iter().any(|o| o == "*") {
            return true;
        }
        origin.is_some_and(|origin| self.allow_origins.iter().any(|o| o == origin))
    }
}

impl From<&RealtimeSettings> for HubConfig {
    fn from(s: &RealtimeSettings) -> Self {
        Self {
            enabled: s.enabled,
            path: s.path.clone(),
            read_buffer_size: s.read_buffer_size,
            write_buffer_size: s.write_buffer_size,
            max_message_size: s.max_message_size,
            write_wait: Duration::from_millis(s.write_wait_ms),
            pong_wait: Duration::from_millis(s.pong_wait_ms),
            ping_period: Duration::from_millis(s.ping_period_ms),
            handshake_timeout: Duration::from_millis(s.handshake_timeout_ms),
            max_clients: s.max_clients,
            require_auth: s.require_auth,
            allow_origins: s.allow_origins.clone(),
            enable_compression: s.enable_compression,
            send_queue_capacity: s.send_queue_capacity,
            register_timeout: Duration::from_millis(s.register_timeout_ms),
            sweep_interval: Duration::from_millis(s.sweep_interval_ms),
            permission_check_timeout: Duration::from_millis(s.permission_check_timeout_ms),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::from(&RealtimeSettings::default())
    }
}

/// HTTP listener configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind; `0` picks an ephemeral port.
    pub port: u16,
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&ServerSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_path() {
        assert_eq!(HubConfig::default().path, "/ws");
    }

    #[test]
    fn default_timings() {
        let cfg = HubConfig::default();
        assert_eq!(cfg.write_wait, Duration::from_secs(10));
        assert_eq!(cfg.pong_wait, Duration::from_secs(60));
        assert_eq!(cfg.ping_period, Duration::from_secs(54));
        assert_eq!(cfg.handshake_timeout, Duration::from_secs(10));
    }

    #[test]
    fn default_limits() {
        let cfg = HubConfig::default();
        assert_eq!(cfg.max_clients, 1000);
        assert_eq!(cfg.max_message_size, 512 * 1024);
        assert_eq!(cfg.send_queue_capacity, 256);
    }

    #[test]
    fn default_requires_auth() {
        assert!(HubConfig::default().require_auth);
    }

    #[test]
    fn stale_after_is_twice_pong_wait() {
        let cfg = HubConfig {
            pong_wait: Duration::from_millis(300),
            ..HubConfig::default()
        };
        assert_eq!(cfg.stale_after(), Duration::from_millis(600));
    }

    #[test]
    fn wildcard_allows_any_origin() {
        let cfg = HubConfig::default();
        assert!(cfg.origin_allowed(Some("https://evil.example")));
        assert!(cfg.origin_allowed(None));
    }

    #[test]
    fn empty_list_allows_any_origin() {
        let cfg = HubConfig {
            allow_origins: vec![],
            ..HubConfig::default()
        };
        assert!(cfg.origin_allowed(Some("https://a.example")));
    }

    #[test]
    fn explicit_list_filters_origins() {
        let cfg = HubConfig {
            allow_origins: vec!["https://app.example".into()],
            ..HubConfig::default()
        };
        assert!(cfg.origin_allowed(Some("https://app.example")));
        assert!(!cfg.origin_allowed(Some("https://other.example")));
        assert!(!cfg.origin_allowed(None));
    }

    #[test]
    fn converts_milliseconds() {
        let settings = RealtimeSettings {
            pong_wait_ms: 1500,
            register_timeout_ms: 250,
            ..RealtimeSettings::default()
        };
        let cfg = HubConfig::from(&settings);
        assert_eq!(cfg.pong_wait, Duration::from_millis(1500));
        assert_eq!(cfg.register_timeout, Duration::from_millis(250));
    }

    #[test]
    fn server_defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 8080);
    }
}
