//! Wire protocol: JSON text frames exchanged with the broadcast endpoint.
//!
//! Every frame is an object tagged by `"type"`:
//!
//! | type | direction | fields |
//! |---|---|---|
//! | `welcome` | server → client | `connectionId` |
//! | `invocation` | client → server | `invocationId`, `target`, `arguments` |
//! | `completion` | server → client | `invocationId`, `error` |
//! | `event` | server → client | `target`, `arguments` |
//! | `close` | either | `error` |

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use relaychat_core::ChatError;

use crate::transport::TransportEvent;

/// Remote method that relays a message to every connected session.
pub const SUBMIT_MESSAGE: &str = "submitMessage";

/// Event carrying a relayed message: `[sender, body]`.
pub const MESSAGE_BROADCAST: &str = "messageBroadcast";

/// Presence event: `[connectionId]`.
pub const USER_CONNECTED: &str = "userConnected";

/// Presence event: `[connectionId]`.
pub const USER_DISCONNECTED: &str = "userDisconnected";

/// One protocol frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Frame {
    #[serde(rename_all = "camelCase")]
    Welcome { connection_id: String },

    #[serde(rename_all = "camelCase")]
    Invocation {
        invocation_id: String,
        target: String,
        #[serde(default)]
        arguments: Vec<Value>,
    },

    #[serde(rename_all = "camelCase")]
    Completion {
        invocation_id: String,
        #[serde(default)]
        error: Option<String>,
    },

    Event {
        target: String,
        #[serde(default)]
        arguments: Vec<Value>,
    },

    Close {
        #[serde(default)]
        error: Option<String>,
    },
}

impl Frame {
    /// Parse a text frame.
    pub fn decode(raw: &str) -> Result<Frame, ChatError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Serialize to the text sent over the socket.
    pub fn encode(&self) -> Result<String, ChatError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn invocation(invocation_id: u64, target: &str, arguments: Vec<Value>) -> Frame {
        Frame::Invocation {
            invocation_id: invocation_id.to_string(),
            target: target.to_string(),
            arguments,
        }
    }

    pub fn event(target: &str, arguments: Vec<Value>) -> Frame {
        Frame::Event {
            target: target.to_string(),
            arguments,
        }
    }
}

/// Whether a frame that failed to decode is valid JSON of a type this
/// client does not know, as opposed to garbage.
pub fn is_unknown_frame(raw: &str) -> bool {
    const KNOWN: &[&str] = &["welcome", "invocation", "completion", "event", "close"];
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => value
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(|kind| !KNOWN.contains(&kind)),
        Err(_) => false,
    }
}

/// Map an `event` frame onto the transport event it represents.
///
/// Returns `None` for unknown targets or arguments of the wrong shape.
pub fn event_to_transport(target: &str, arguments: &[Value]) -> Option<TransportEvent> {
    match target {
        MESSAGE_BROADCAST => {
            let sender = arguments.first()?.as_str()?;
            let body = arguments.get(1)?.as_str()?;
            Some(TransportEvent::Message {
                sender: sender.to_string(),
                body: body.to_string(),
            })
        }
        USER_CONNECTED => Some(TransportEvent::PeerConnected {
            connection_id: arguments.first()?.as_str()?.to_string(),
        }),
        USER_DISCONNECTED => Some(TransportEvent::PeerDisconnected {
            connection_id: arguments.first()?.as_str()?.to_string(),
        }),
        other => {
            debug!(target = other, "unhandled event target");
            None
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
