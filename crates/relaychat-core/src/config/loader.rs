//! Config loader: reads `~/.relaychat/config.json` and merges env vars.
//!
//! # Loading precedence
//! 1. Defaults (from `Config::default()`)
//! 2. JSON file at `~/.relaychat/config.json`
//! 3. Environment variables `RELAYCHAT_<SECTION>__<FIELD>` (override JSON)

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::schema::Config;

/// Default config file path.
pub fn get_config_path() -> PathBuf {
    crate::utils::get_data_path().join("config.json")
}

/// Load configuration from the default path + env vars.
///
/// Falls back to `Config::default()` if the file doesn't exist or can't be parsed.
pub fn load_config(path: Option<&Path>) -> Config {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    load_config_from_path(&config_path)
}

/// Load only what is on disk, without env overrides.
///
/// Use this as the base when writing the file back, so overrides from the
/// environment are not persisted.
pub fn load_config_file(path: Option<&Path>) -> Config {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    read_config_file(&config_path)
}

/// Load config from a specific file path.
fn load_config_from_path(path: &Path) -> Config {
    apply_env_overrides(read_config_file(path))
}

/// Read the JSON file without applying env overrides.
fn read_config_file(path: &Path) -> Config {
    if !path.exists() {
        info!("No config file found at {}, using defaults", path.display());
        return Config::default();
    }

    debug!("Loading config from {}", path.display());

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read config file {}: {}", path.display(), e);
            return Config::default();
        }
    };

    match serde_json::from_str(&content) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to parse config JSON: {}", e);
            Config::default()
        }
    }
}

/// Save configuration to disk (pretty-printed JSON with camelCase keys).
pub fn save_config(config: &Config, path: Option<&Path>) -> std::io::Result<()> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config).map_err(std::io::Error::other)?;

    std::fs::write(&config_path, json)?;
    debug!("Config saved to {}", config_path.display());
    Ok(())
}

/// Apply environment variable overrides on top of a loaded config.
///
/// Env var format: `RELAYCHAT_<SECTION>__<FIELD>` (double underscore as delimiter).
///
/// Supported overrides:
/// - `RELAYCHAT_ENDPOINT__URL` → `endpoint.url`
/// - `RELAYCHAT_ENDPOINT__HANDSHAKE_TIMEOUT_SECS` → `endpoint.handshake_timeout_secs`
/// - `RELAYCHAT_ENDPOINT__KEEPALIVE_INTERVAL_SECS` → `endpoint.keepalive_interval_secs`
/// - `RELAYCHAT_ENDPOINT__SERVER_TIMEOUT_SECS` → `endpoint.server_timeout_secs`
/// - `RELAYCHAT_RECONNECT__ENABLED` → `reconnect.enabled`
/// - `RELAYCHAT_RECONNECT__DELAYS_MS` → `reconnect.delays_ms` (comma-separated)
/// - `RELAYCHAT_USER__DISPLAY_NAME` → `user.display_name`
fn apply_env_overrides(config: Config) -> Config {
    apply_overrides_from(config, |key| std::env::var(key).ok())
}

fn apply_overrides_from(mut config: Config, var: impl Fn(&str) -> Option<String>) -> Config {
    // Endpoint
    if let Some(val) = var("RELAYCHAT_ENDPOINT__URL") {
        config.endpoint.url = val;
    }
    if let Some(n) = parse_var(&var, "RELAYCHAT_ENDPOINT__HANDSHAKE_TIMEOUT_SECS") {
        config.endpoint.handshake_timeout_secs = n;
    }
    if let Some(n) = parse_var(&var, "RELAYCHAT_ENDPOINT__KEEPALIVE_INTERVAL_SECS") {
        config.endpoint.keepalive_interval_secs = n;
    }
    if let Some(n) = parse_var(&var, "RELAYCHAT_ENDPOINT__SERVER_TIMEOUT_SECS") {
        config.endpoint.server_timeout_secs = n;
    }

    // Reconnect
    if let Some(val) = var("RELAYCHAT_RECONNECT__ENABLED") {
        config.reconnect.enabled = val == "true" || val == "1";
    }
    if let Some(val) = var("RELAYCHAT_RECONNECT__DELAYS_MS") {
        match parse_delays(&val) {
            Some(delays) => config.reconnect.delays_ms = delays,
            None => warn!(value = %val, "ignoring malformed RELAYCHAT_RECONNECT__DELAYS_MS"),
        }
    }

    // User
    if let Some(val) = var("RELAYCHAT_USER__DISPLAY_NAME") {
        config.user.display_name = val;
    }

    config
}

fn parse_var(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    var(key).and_then(|v| v.trim().parse::<u64>().ok())
}

/// Parse `"0, 2000,10000"` into delays. Empty input means "no retries".
fn parse_delays(raw: &str) -> Option<Vec<u64>> {
    if raw.trim().is_empty() {
        return Some(Vec::new());
    }
    raw.split(',')
        .map(|part| part.trim().parse::<u64>().ok())
        .collect()
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
