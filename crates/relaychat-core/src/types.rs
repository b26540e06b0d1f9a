//! Core types for Relaychat: the message log entry and the connection state.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────
// Chat messages
// ─────────────────────────────────────────────

/// One entry of the message log.
///
/// Created only by the session manager when a broadcast event arrives;
/// never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Display name of the sender, as supplied by whoever submitted it.
    pub sender: String,
    /// Message text.
    pub body: String,
    /// Local receipt time. Not a global ordering key.
    pub received_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a message stamped with the current local time.
    pub fn new(sender: impl Into<String>, body: impl Into<String>) -> Self {
        ChatMessage {
            sender: sender.into(),
            body: body.into(),
            received_at: Utc::now(),
        }
    }

    /// Whether this message was sent under the given display name.
    pub fn is_from(&self, name: &str) -> bool {
        self.sender == name
    }
}

// ─────────────────────────────────────────────
// Connection state
// ─────────────────────────────────────────────

/// Lifecycle state of the channel owned by a session manager.
///
/// Exactly one value holds at any instant. `Disconnected` is both the
/// initial state and the state after the channel is gone for good.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Connected,
    Reconnecting,
    #[default]
    Disconnected,
}

impl ConnectionState {
    /// Submissions are only accepted in this state.
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Whether a channel exists (live or being re-established).
    pub fn has_channel(self) -> bool {
        !matches!(self, ConnectionState::Disconnected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
