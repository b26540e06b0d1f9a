//! Configuration schema.
//!
//! Hierarchy: `Config` → `EndpointConfig`, `ReconnectConfig`, `UserConfig`.
//!
//! JSON on disk uses **camelCase** keys; Rust uses snake_case.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default broadcast endpoint.
pub const DEFAULT_ENDPOINT_URL: &str = "ws://localhost:5289/chatHub";

/// Delays between automatic reconnect attempts. Retries stop after the last one.
pub const DEFAULT_RECONNECT_DELAYS_MS: [u64; 4] = [0, 2_000, 10_000, 30_000];

// ─────────────────────────────────────────────
// Root Config
// ─────────────────────────────────────────────

/// Root configuration: loaded from `~/.relaychat/config.json` + env vars.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub endpoint: EndpointConfig,
    pub reconnect: ReconnectConfig,
    pub user: UserConfig,
}

// ─────────────────────────────────────────────
// Endpoint
// ─────────────────────────────────────────────

/// Where the broadcast endpoint lives and how long to wait on it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EndpointConfig {
    /// WebSocket URL of the endpoint (`ws://` or `wss://`).
    pub url: String,
    /// Upper bound on connect + welcome frame.
    pub handshake_timeout_secs: u64,
    /// Ping interval while connected.
    pub keepalive_interval_secs: u64,
    /// Silence after which the connection counts as dropped. Also bounds
    /// how long an invocation waits for its completion.
    pub server_timeout_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_ENDPOINT_URL.to_string(),
            handshake_timeout_secs: 15,
            keepalive_interval_secs: 15,
            server_timeout_secs: 30,
        }
    }
}

impl EndpointConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs.max(1))
    }

    pub fn server_timeout(&self) -> Duration {
        Duration::from_secs(self.server_timeout_secs.max(1))
    }
}

// ─────────────────────────────────────────────
// Reconnect
// ─────────────────────────────────────────────

/// Automatic reconnect policy applied by the transport after a drop.
///
/// The initial connection is never retried.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectConfig {
    pub enabled: bool,
    /// One retry per entry, waiting that many milliseconds before it.
    pub delays_ms: Vec<u64>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delays_ms: DEFAULT_RECONNECT_DELAYS_MS.to_vec(),
        }
    }
}

impl ReconnectConfig {
    /// Retry schedule; empty when reconnect is disabled.
    pub fn delays(&self) -> Vec<Duration> {
        if !self.enabled {
            return Vec::new();
        }
        self.delays_ms
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect()
    }
}

// ─────────────────────────────────────────────
// User
// ─────────────────────────────────────────────

/// Front-end preferences. The session manager never reads these.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserConfig {
    /// Last display name used in `relaychat chat`.
    pub display_name: String,
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
