//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `WS_*` overrides from the process environment, falling back to a
//!    `.env` file for variables the environment does not set (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::RelaySettings;

/// Dotenv file consulted by [`load_settings_from_path`], relative to the working directory.
pub const DOTENV_FILE: &str = ".env";

/// Resolve the default settings file path (`~/.form-relay/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".form-relay").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults (plus overrides). If the file
/// contains invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    load_settings_with_dotenv(path, Path::new(DOTENV_FILE))
}

/// Load settings from `path`, reading `WS_*` overrides from the process
/// environment first and from the dotenv file at `dotenv` second.
pub fn load_settings_with_dotenv(path: &Path, dotenv: &Path) -> Result<RelaySettings> {
    let mut settings = load_file_layer(path)?;
    let file_vars = load_dotenv(dotenv)?;
    apply_overrides(&mut settings, |name| {
        std::env::var(name).ok().or_else(|| file_vars.get(name).cloned())
    });
    Ok(settings)
}

/// Read a dotenv file into a map without touching the process environment.
///
/// A missing file yields an empty map.
pub fn load_dotenv(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        debug!(?path, "dotenv file not found");
        return Ok(HashMap::new());
    }
    let vars = dotenvy::from_path_iter(path)?.collect::<std::result::Result<HashMap<_, _>, _>>()?;
    debug!(?path, count = vars.len(), "loaded dotenv file");
    Ok(vars)
}

/// Defaults merged with the settings file, without env overrides.
pub fn load_file_layer(path: &Path) -> Result<RelaySettings> {
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

/// Apply overrides from an arbitrary variable lookup.
///
/// - Scalars must parse (and fall in range); invalid values are logged and ignored.
/// - `WS_ALLOWED_ORIGINS`, `WS_ALLOWED_IPS` and `WS_MAX_CONNECTIONS_PER_IP` set
///   to an empty string clear the corresponding limit.
/// - `WS_ALLOWED_FORMS` set to an empty string is ignored.
pub fn apply_overrides(settings: &mut RelaySettings, lookup: impl Fn(&str) -> Option<String>) {
    // ── Policy ──────────────────────────────────────────────────────
    if let Some(v) = lookup("WS_AUTH_TOKEN").filter(|v| !v.is_empty()) {
        settings.policy.auth_token = Some(v);
    }
    if let Some(v) = lookup("WS_ALLOWED_ORIGINS") {
        settings.policy.allowed_origins = non_empty(parse_list(&v));
    }
    if let Some(v) = lookup("WS_ALLOWED_IPS") {
        settings.policy.allowed_ips = non_empty(parse_list(&v));
    }
    if let Some(v) = lookup("WS_MAX_CONNECTIONS_PER_IP") {
        if v.trim().is_empty() {
            settings.policy.max_connections_per_ip = None;
        } else if let Some(n) = parse_usize_range(&v, 1, 1_000_000) {
            settings.policy.max_connections_per_ip = Some(n);
        } else {
            warn!(
                key = "WS_MAX_CONNECTIONS_PER_IP",
                value = %v,
                "invalid connection cap, ignoring"
            );
        }
    }
    if let Some(v) = lookup("WS_ALLOWED_FORMS") {
        let forms = parse_list(&v);
        if !forms.is_empty() {
            settings.policy.allowed_form_names = forms;
        }
    }

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = lookup("WS_HOST").filter(|v| !v.is_empty()) {
        settings.server.host = v;
    }
    if let Some(port) =
        read_u64(&lookup, "WS_PORT", 1, 65_535).and_then(|v| u16::try_from(v).ok())
    {
        settings.server.port = port;
    }
    if let Some(v) = read_u64(&lookup, "WS_PING_INTERVAL_MS", 100, 3_600_000) {
        settings.server.ping_interval_ms = v;
    }
    if let Some(v) = read_u64(&lookup, "WS_PING_TIMEOUT_MS", 100, 3_600_000) {
        settings.server.ping_timeout_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = lookup("WS_LOG_LEVEL").filter(|v| !v.is_empty()) {
        settings.logging.level = v;
    }
    if let Some(v) = lookup("WS_LOG_FILE") {
        settings.logging.file = (!v.trim().is_empty()).then_some(v);
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Split a comma-separated list, trimming entries and dropping empty ones.
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn non_empty(list: Vec<String>) -> Option<Vec<String>> {
    (!list.is_empty()).then_some(list)
}

fn read_u64(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    min: u64,
    max: u64,
) -> Option<u64> {
    let val = lookup(name)?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid integer env var, ignoring");
    }
    result
}
