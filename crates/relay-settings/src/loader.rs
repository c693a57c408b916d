//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{RelaySettings, StoreBackend};

/// `~/.relay`, falling back to `/tmp/.relay` when `HOME` is unset.
pub fn relay_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".relay")
}

pub fn settings_path() -> PathBuf {
    relay_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides, then validate.
///
/// A missing file yields defaults; unreadable or invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    let mut settings = merge_file(path)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    settings.validate()?;
    Ok(settings)
}

fn merge_file(path: &Path) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

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
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `RELAY_*` overrides read through `lookup`.
///
/// Unparseable values are ignored with a warning and the file/default value stays.
pub fn apply_env_overrides<F>(settings: &mut RelaySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(v) = read("RELAY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("RELAY_PORT") {
        if let Some(port) = parse_or_warn("RELAY_PORT", &v, |s| s.parse::<u16>().ok()) {
            settings.server.port = port;
        }
    }
    if let Some(v) = read("RELAY_MAX_SEND_QUEUE") {
        if let Some(n) = parse_or_warn("RELAY_MAX_SEND_QUEUE", &v, |s| {
            parse_usize_range(s, 1, 1_000_000)
        }) {
            settings.server.max_send_queue = n;
        }
    }
    if let Some(v) = read("RELAY_TOPICS") {
        settings.topics = v
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect();
    }
    if let Some(v) = read("RELAY_STORE_BACKEND") {
        if let Some(backend) = parse_or_warn("RELAY_STORE_BACKEND", &v, parse_backend) {
            settings.store.backend = backend;
        }
    }
    if let Some(v) = read("RELAY_DB_PATH") {
        settings.store.path = PathBuf::from(v);
    }
    if let Some(v) = read("RELAY_PRODUCER_ENABLED") {
        if let Some(b) = parse_or_warn("RELAY_PRODUCER_ENABLED", &v, parse_bool) {
            settings.producer.enabled = b;
        }
    }
    if let Some(v) = read("RELAY_PRODUCER_INTERVAL_MS") {
        if let Some(ms) = parse_or_warn("RELAY_PRODUCER_INTERVAL_MS", &v, |s| {
            parse_u64_range(s, 10, 3_600_000)
        }) {
            settings.producer.interval_ms = ms;
        }
    }
    if let Some(v) = read("RELAY_LOG_LEVEL") {
        if let Some(level) = parse_or_warn("RELAY_LOG_LEVEL", &v, parse_log_level) {
            settings.logging.level = level;
        }
    }
}

fn parse_or_warn<T>(key: &str, val: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
    let result = parse(val.trim());
    if result.is_none() {
        tracing::warn!(key, value = %val, "invalid env var, ignoring");
    }
    result
}

/// Accepts (case-insensitive) `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Normalizes a tracing level name (`trace` through `error`, any case).
pub fn parse_log_level(val: &str) -> Option<String> {
    let level = val.trim().to_lowercase();
    matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error").then_some(level)
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

fn parse_backend(val: &str) -> Option<StoreBackend> {
    match val.to_lowercase().as_str() {
        "sqlite" => Some(StoreBackend::Sqlite),
        "memory" => Some(StoreBackend::Memory),
        _ => None,
    }
}
