//! Error type for session and transport operations.

use thiserror::Error;

use crate::types::ConnectionState;

/// Everything a session operation can fail with.
///
/// A dropped connection that the transport is retrying is *not* an error:
/// it shows up as a state transition only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// The initial connection could not be established.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// `submit` was called while the channel was not `Connected`.
    #[error("cannot submit while {0}")]
    NotConnected(ConnectionState),

    /// The endpoint answered the invocation with an error.
    #[error("submission rejected: {0}")]
    SubmissionRejected(String),

    /// The channel went away while a call was in flight.
    #[error("connection closed")]
    ConnectionClosed,

    /// `start` was called while a channel is already open.
    #[error("session already started")]
    AlreadyStarted,

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// The endpoint sent something we could not understand.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl From<serde_json::Error> for ChatError {
    fn from(e: serde_json::Error) -> Self {
        ChatError::Protocol(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_connected_message() {
        let err = ChatError::NotConnected(ConnectionState::Reconnecting);
        assert_eq!(err.to_string(), "cannot submit while reconnecting");
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{{").unwrap_err();
        let err: ChatError = json_err.into();
        assert!(matches!(err, ChatError::Protocol(_)));
    }
}
