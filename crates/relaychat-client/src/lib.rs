//! Relaychat Client: the real-time session manager and its transport.
//!
//! This crate provides:
//! - **transport**: the `Transport`/`Connection` traits and `TransportEvent`
//! - **protocol**: JSON frames spoken with the broadcast endpoint
//! - **ws**: `WsTransport`, WebSocket transport with automatic reconnect
//! - **session**: `SessionManager`, lifecycle, message log, observers

pub mod protocol;
pub mod session;
pub mod transport;
pub mod ws;

pub use session::{SessionEvent, SessionManager};
pub use transport::{Connection, EventSender, Transport, TransportEvent};
pub use ws::WsTransport;
