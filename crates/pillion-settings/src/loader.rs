//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`PillionSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `PILLION_*` environment overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::PillionSettings;

/// Resolve the default settings path (`~/.pillion/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".pillion").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<PillionSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<PillionSettings> {
    let mut settings = read_file_layer(path)?;
    apply_overrides(&mut settings, |name| std::env::var(name).ok());
    validate(&settings)?;
    Ok(settings)
}

fn read_file_layer(path: &Path) -> Result<PillionSettings> {
    let defaults = serde_json::to_value(PillionSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
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

/// Apply `PILLION_*` overrides read through `lookup`.
///
/// Invalid values are ignored with a warning.
pub fn apply_overrides(settings: &mut PillionSettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    // ── Broker ──────────────────────────────────────────────────────
    if let Some(v) = read("PILLION_BROKER_URLS") {
        let urls: Vec<String> = v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        if urls.is_empty() {
            warn!(key = "PILLION_BROKER_URLS", value = %v, "no usable URLs, ignoring");
        } else {
            settings.broker.endpoints = urls;
        }
    }
    if let Some(v) = read_ranged(&read, "PILLION_CONNECT_TIMEOUT_MS", 1000, 300_000) {
        settings.broker.connect_timeout_ms = v;
    }
    if let Some(v) = read_ranged(&read, "PILLION_HEARTBEAT_INTERVAL_MS", 1000, 600_000) {
        settings.broker.heartbeat_interval_ms = v;
    }

    // ── API / cache ─────────────────────────────────────────────────
    if let Some(v) = read("PILLION_API_URL") {
        settings.api.base_url = v;
    }
    if let Some(v) = read("PILLION_CACHE_PATH") {
        settings.cache.path = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read("PILLION_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("PILLION_LOG_JSON") {
        match parse_bool(&v) {
            Some(b) => settings.logging.json = b,
            None => warn!(key = "PILLION_LOG_JSON", value = %v, "invalid boolean env var, ignoring"),
        }
    }
}

fn read_ranged(
    read: &impl Fn(&str) -> Option<String>,
    name: &str,
    min: u64,
    max: u64,
) -> Option<u64> {
    let val = read(name)?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

/// Reject settings the coordination layer cannot run with.
pub fn validate(settings: &PillionSettings) -> Result<()> {
    if settings.broker.endpoints.is_empty() {
        return Err(SettingsError::InvalidValue(
            "broker.endpoints must not be empty".into(),
        ));
    }
    if settings.broker.heartbeat_interval_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "broker.heartbeatIntervalMs must be positive".into(),
        ));
    }
    if settings.offers.tick_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "offers.tickMs must be positive".into(),
        ));
    }
    Ok(())
}

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
