//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`HelixSettings::default()`]
//! 2. If a settings file is given and exists, deep-merge its values over defaults
//! 3. Apply `HELIX_*` environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::Path;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::HelixSettings;

/// Load settings from an optional file with env var overrides, then validate.
pub fn load_settings(path: Option<&Path>) -> Result<HelixSettings> {
    let mut settings = match path {
        Some(path) => load_file(path)?,
        None => HelixSettings::default(),
    };
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// A missing file yields defaults.
fn load_file(path: &Path) -> Result<HelixSettings> {
    if !path.exists() {
        debug!(?path, "settings file not found, using defaults");
        return Ok(HelixSettings::default());
    }
    debug!(?path, "loading settings from file");
    let malformed = |source| SettingsError::Malformed {
        path: path.to_path_buf(),
        source,
    };
    let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let user: Value = serde_json::from_str(&content).map_err(malformed)?;
    let defaults = serde_json::to_value(HelixSettings::default()).map_err(malformed)?;
    serde_json::from_value(deep_merge(defaults, user)).map_err(malformed)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `HELIX_*` environment variable overrides.
///
/// Invalid values are ignored with a warning.
pub fn apply_env_overrides(settings: &mut HelixSettings) {
    apply_overrides_with(settings, &|name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable lookup.
pub fn apply_overrides_with(settings: &mut HelixSettings, lookup: &dyn Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("HELIX_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.ranged("HELIX_PORT", 0_u16, u16::MAX) {
        settings.server.port = v;
    }

    // ── Realtime ────────────────────────────────────────────────────
    if let Some(v) = env.bool("HELIX_WS_ENABLED") {
        settings.realtime.enabled = v;
    }
    if let Some(v) = env.string("HELIX_WS_PATH") {
        settings.realtime.path = v;
    }
    if let Some(v) = env.ranged("HELIX_WS_MAX_CLIENTS", 1_usize, 1_000_000) {
        settings.realtime.max_clients = v;
    }
    if let Some(v) = env.bool("HELIX_WS_REQUIRE_AUTH") {
        settings.realtime.require_auth = v;
    }
    if let Some(v) = env.ranged("HELIX_WS_PING_PERIOD_MS", 100_u64, 3_600_000) {
        settings.realtime.ping_period_ms = v;
    }
    if let Some(v) = env.ranged("HELIX_WS_PONG_WAIT_MS", 100_u64, 3_600_000) {
        settings.realtime.pong_wait_ms = v;
    }

    // ── Auth / logging ──────────────────────────────────────────────
    if let Some(v) = env.string("HELIX_JWT_SECRET") {
        settings.auth.jwt_secret = Some(v);
    }
    if let Some(v) = env.string("HELIX_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a number within an inclusive range.
pub fn parse_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers ─────────────────────────────────────────────────────────

struct EnvReader<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl EnvReader<'_> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn ranged<T>(&self, name: &str, min: T, max: T) -> Option<T>
    where
        T: std::str::FromStr + PartialOrd,
    {
        let val = (self.lookup)(name)?;
        let result = parse_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid numeric env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
