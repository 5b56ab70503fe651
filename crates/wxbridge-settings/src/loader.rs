//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`BridgeSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::BridgeSettings;

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

/// Resolve the path to the settings file (`~/.wxbridge/settings.json`).
pub fn settings_path() -> PathBuf {
    home_dir().join(".wxbridge").join("settings.json")
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        home_dir()
    } else if let Some(rest) = path.strip_prefix("~/") {
        home_dir().join(rest)
    } else {
        PathBuf::from(path)
    }
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<BridgeSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<BridgeSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<BridgeSettings> {
    let defaults = serde_json::to_value(BridgeSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value =
            serde_json::from_str(&content).map_err(|source| SettingsError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;
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

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut BridgeSettings) {
    apply_overrides(settings, |key| std::env::var(key).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid values are ignored with a warning (fall back to file/default).
pub fn apply_overrides<F>(settings: &mut BridgeSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read_string = |name: &str| lookup(name).filter(|v| !v.is_empty());

    // ── Gateway ─────────────────────────────────────────────────────
    if let Some(v) = read_string("WXBRIDGE_GATEWAY_URL") {
        settings.gateway.url = v;
    }
    if let Some(v) = read_string("WECHAT_AUTH_TOKEN") {
        settings.gateway.auth_token = v;
    }
    if let Some(v) = read_string("WXBRIDGE_BACKEND_NAME") {
        settings.gateway.backend_name = v;
    }
    if let Some(raw) = read_string("WXBRIDGE_RECONNECT_DELAY_MS") {
        match parse_u64_range(&raw, 100, 600_000) {
            Some(v) => settings.gateway.reconnect_delay_ms = v,
            None => warn!(key = "WXBRIDGE_RECONNECT_DELAY_MS", value = %raw, "invalid u64 env var, ignoring"),
        }
    }

    // ── Media ───────────────────────────────────────────────────────
    if let Some(raw) = read_string("WXBRIDGE_MEDIA_ENABLED") {
        match parse_bool(&raw) {
            Some(v) => settings.media.enabled = v,
            None => warn!(key = "WXBRIDGE_MEDIA_ENABLED", value = %raw, "invalid boolean env var, ignoring"),
        }
    }
    if let Some(v) = read_string("WXBRIDGE_MEDIA_DIR") {
        settings.media.dir = v;
    }
    if let Some(v) = read_string("WXBRIDGE_MEDIA_HOST") {
        settings.media.host = v;
    }
    if let Some(raw) = read_string("WXBRIDGE_MEDIA_PORT") {
        match parse_u16_range(&raw, 1, 65535) {
            Some(v) => settings.media.port = v,
            None => warn!(key = "WXBRIDGE_MEDIA_PORT", value = %raw, "invalid u16 env var, ignoring"),
        }
    }

    // ── Send ────────────────────────────────────────────────────────
    if let Some(v) = read_string("WECHAT_ALLOWED_FILE_DIRS") {
        settings.send.allowed_file_dirs = split_path_list(&v);
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_string("WXBRIDGE_LOG_LEVEL") {
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

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Split an OS path list (`:` on unix, `;` on windows), dropping blanks.
pub fn split_path_list(val: &str) -> Vec<String> {
    std::env::split_paths(val)
        .filter_map(|p| p.to_str().map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty())
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
