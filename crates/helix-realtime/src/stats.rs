//! Hub counters.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// Point-in-time copy of the hub counters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStats {
    /// Sessions ever registered.
    pub total_connections: u64,
    /// Sessions currently registered.
    pub active_connections: usize,
    /// Distinct usernames currently registered.
    pub active_users: usize,
    /// Events accepted for broadcast.
    pub total_events: u64,
    /// Overflow evictions, permission-check failures and dropped broadcasts.
    pub total_errors: u64,
    /// When the hub last started.
    pub start_time: DateTime<Utc>,
    /// When the last event was accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_time: Option<DateTime<Utc>>,
}

impl HubStats {
    fn new() -> Self {
        Self {
            total_connections: 0,
            active_connections: 0,
            active_users: 0,
            total_events: 0,
            total_errors: 0,
            start_time: Utc::now(),
            last_event_time: None,
        }
    }
}

/// Stats body served over HTTP.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    /// Counters.
    #[serde(flatten)]
    pub stats: HubStats,
    /// Seconds since `start_time`.
    pub uptime_secs: i64,
}

impl From<HubStats> for StatsResponse {
    fn from(stats: HubStats) -> Self {
        let uptime_secs = (Utc::now() - stats.start_time).num_seconds().max(0);
        Self { stats, uptime_secs }
    }
}

/// Shared, lock-protected counters. Written by the coordinator, read by
/// anyone.
#[derive(Debug)]
pub struct StatsCell {
    inner: RwLock<HubStats>,
}

impl StatsCell {
    /// Zeroed counters.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HubStats::new()),
        }
    }

    /// Copy the current counters.
    pub fn snapshot(&self) -> HubStats {
        self.inner.read().clone()
    }

    /// Live session count.
    pub fn active_connections(&self) -> usize {
        self.inner.read().active_connections
    }

    pub(crate) fn record_start(&self) {
        self.inner.write().start_time = Utc::now();
    }

    pub(crate) fn record_registered(&self, active: usize, users: usize) {
        let mut s = self.inner.write();
        s.total_connections += 1;
        s.active_connections = active;
        s.active_users = users;
    }

    pub(crate) fn record_unregistered(&self, active: usize, users: usize) {
        let mut s = self.inner.write();
        s.active_connections = active;
        s.active_users = users;
    }

    pub(crate) fn record_event(&self) {
        let mut s = self.inner.write();
        s.total_events += 1;
        s.last_event_time = Some(Utc::now());
    }

    pub(crate) fn record_error(&self) {
        self.inner.write().total_errors += 1;
    }
}

impl Default for StatsCell {
    fn default() -> Self {
        Self::new()
    }
}
