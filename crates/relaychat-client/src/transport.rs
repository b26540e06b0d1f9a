//! Transport traits: the seam between the session manager and the wire.
//!
//! A `Transport` opens channels; each open channel is a `Connection`.
//! Everything the transport observes on a channel after it opens
//! (broadcasts, drops, reconnects, close) is reported as a
//! `TransportEvent` on the sender handed to `connect()`, in the order it
//! happened.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use relaychat_core::ChatError;

/// Sender half of the queue a transport reports events on.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Channel lifecycle and payload events emitted by a transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// A `messageBroadcast` arrived.
    Message { sender: String, body: String },
    /// The channel is gone for good: server close, explicit close, or
    /// reconnect attempts exhausted. No further events follow.
    Closed { error: Option<String> },
    /// The channel dropped and automatic reconnect has begun.
    Reconnecting { reason: Option<String> },
    /// Automatic reconnect succeeded under a new connection id.
    Reconnected { connection_id: Option<String> },
    /// Another session joined the endpoint.
    PeerConnected { connection_id: String },
    /// Another session left the endpoint.
    PeerDisconnected { connection_id: String },
}

/// Opens channels to the broadcast endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a channel and complete the handshake.
    ///
    /// `events` must be wired up before the channel goes live so nothing
    /// emitted between handshake and return is lost. The initial connection
    /// is attempted exactly once.
    async fn connect(&self, events: EventSender) -> Result<Box<dyn Connection>, ChatError>;
}

/// One open channel.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Identifier the endpoint assigned to this channel, if currently known.
    fn connection_id(&self) -> Option<String>;

    /// Call a remote method and wait for the endpoint's acknowledgment.
    async fn invoke(&self, target: &str, arguments: Vec<Value>) -> Result<(), ChatError>;

    /// Close the channel. Emits `TransportEvent::Closed` if still open.
    async fn close(&self) -> Result<(), ChatError>;
}
