//! WebSocket transport: a client channel to the broadcast endpoint.
//!
//! Architecture:
//! - The endpoint is a WebSocket server (default `ws://localhost:5289/chatHub`)
//! - Handshake: connect, then wait for the `welcome` frame carrying our connection id
//! - Inbound: `event` frames become `TransportEvent`s, `completion` frames resolve invocations
//! - Outbound: `invocation` frames, each acknowledged by a matching `completion`
//!
//! Features:
//! - Auto-reconnect after a drop, following the configured delay schedule
//! - Keep-alive pings and server-silence detection
//! - In-flight invocations fail when the socket goes away (never re-sent)

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use relaychat_core::config::{Config, EndpointConfig, ReconnectConfig};
use relaychat_core::ChatError;

use crate::protocol::{self, Frame};
use crate::transport::{Connection, EventSender, Transport, TransportEvent};

// ─────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────

/// How long `close()` waits for the channel task to wind down.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Type alias for the WebSocket sink.
type WsSender = SplitSink<WsStream, WsMessage>;

type WsReader = SplitStream<WsStream>;

/// Invocations awaiting a `completion`, keyed by invocation id.
type PendingMap = HashMap<String, oneshot::Sender<Result<(), String>>>;

// ─────────────────────────────────────────────
// WsTransport
// ─────────────────────────────────────────────

/// Opens WebSocket channels to the broadcast endpoint.
#[derive(Clone, Debug)]
pub struct WsTransport {
    endpoint: EndpointConfig,
    reconnect: ReconnectConfig,
}

impl WsTransport {
    pub fn new(endpoint: EndpointConfig, reconnect: ReconnectConfig) -> Self {
        Self {
            endpoint,
            reconnect,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.endpoint.clone(), config.reconnect.clone())
    }

    /// Endpoint URL as configured.
    pub fn url(&self) -> &str {
        &self.endpoint.url
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, events: EventSender) -> Result<Box<dyn Connection>, ChatError> {
        let url = validate_url(&self.endpoint.url)?;
        debug!(url = %url, "connecting to broadcast endpoint");

        let (write, read, connection_id) =
            handshake(&url, self.endpoint.handshake_timeout()).await?;
        info!(url = %url, connection_id = %connection_id, "connected to broadcast endpoint");

        let shared = Arc::new(Shared {
            url,
            endpoint: self.endpoint.clone(),
            delays: self.reconnect.delays(),
            connection_id: StdMutex::new(Some(connection_id)),
            writer: Mutex::new(Some(write)),
            pending: StdMutex::new(HashMap::new()),
            next_invocation: AtomicU64::new(0),
            shutdown: Notify::new(),
        });

        let task = tokio::spawn(run_channel(shared.clone(), read, events));

        Ok(Box::new(WsConnection {
            shared,
            task: Mutex::new(Some(task)),
        }))
    }
}

/// Accept only `ws://` and `wss://` URLs.
fn validate_url(raw: &str) -> Result<String, ChatError> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| ChatError::Handshake(format!("invalid endpoint url {raw:?}: {e}")))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(parsed.to_string()),
        other => Err(ChatError::Handshake(format!(
            "unsupported scheme {other:?}, expected ws or wss"
        ))),
    }
}

/// Connect and wait for `welcome`, bounded by `limit`.
async fn handshake(url: &str, limit: Duration) -> Result<(WsSender, WsReader, String), ChatError> {
    match tokio::time::timeout(limit, open_socket(url)).await {
        Ok(result) => result,
        Err(_) => Err(ChatError::Handshake(format!(
            "no welcome from endpoint within {}s",
            limit.as_secs()
        ))),
    }
}

async fn open_socket(url: &str) -> Result<(WsSender, WsReader, String), ChatError> {
    let (ws_stream, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| ChatError::Handshake(e.to_string()))?;

    let (write, mut read) = ws_stream.split();

    while let Some(msg) = read.next().await {
        let msg = msg.map_err(|e| ChatError::Handshake(e.to_string()))?;
        let text = match msg {
            WsMessage::Text(t) => t,
            WsMessage::Close(_) => {
                return Err(ChatError::Handshake(
                    "endpoint closed the socket during handshake".into(),
                ))
            }
            _ => continue,
        };

        match Frame::decode(text.as_str()).map_err(|e| ChatError::Handshake(e.to_string()))? {
            Frame::Welcome { connection_id } => return Ok((write, read, connection_id)),
            Frame::Close { error } => {
                return Err(ChatError::Handshake(
                    error.unwrap_or_else(|| "endpoint refused the connection".into()),
                ))
            }
            other => debug!(frame = ?other, "frame before welcome ignored"),
        }
    }

    Err(ChatError::Handshake("stream ended before welcome".into()))
}

// ─────────────────────────────────────────────
// Channel task
// ─────────────────────────────────────────────

/// Why a single socket session ended.
enum SessionEnd {
    /// `close()` was called.
    Shutdown,
    /// The endpoint closed the channel on purpose.
    ServerClosed(Option<String>),
    /// The socket failed or went silent.
    Dropped(String),
}

enum Reconnect {
    Connected(WsReader, String),
    Shutdown,
    Exhausted(String),
}

/// State shared between the channel task and the `WsConnection` handle.
struct Shared {
    url: String,
    endpoint: EndpointConfig,
    delays: Vec<Duration>,
    connection_id: StdMutex<Option<String>>,
    /// Write half of the current socket; `None` while no socket is up.
    writer: Mutex<Option<WsSender>>,
    pending: StdMutex<PendingMap>,
    next_invocation: AtomicU64,
    shutdown: Notify,
}

/// Drive one channel across reconnects until it closes for good.
async fn run_channel(shared: Arc<Shared>, mut read: WsReader, events: EventSender) {
    loop {
        let end = shared.pump(&mut read, &events).await;
        shared.release_socket().await;

        let reason = match end {
            SessionEnd::Shutdown => {
                info!("channel closed by client");
                let _ = events.send(TransportEvent::Closed { error: None });
                return;
            }
            SessionEnd::ServerClosed(error) => {
                info!(error = ?error, "endpoint closed the channel");
                let _ = events.send(TransportEvent::Closed { error });
                return;
            }
            SessionEnd::Dropped(reason) => reason,
        };

        *shared.connection_id.lock().unwrap() = None;

        if shared.delays.is_empty() {
            warn!(reason = %reason, "channel dropped, reconnect disabled");
            let _ = events.send(TransportEvent::Closed {
                error: Some(reason),
            });
            return;
        }

        warn!(reason = %reason, "channel dropped, reconnecting");
        let _ = events.send(TransportEvent::Reconnecting {
            reason: Some(reason),
        });

        match shared.reconnect().await {
            Reconnect::Connected(new_read, connection_id) => {
                read = new_read;
                info!(connection_id = %connection_id, "reconnected to broadcast endpoint");
                let _ = events.send(TransportEvent::Reconnected {
                    connection_id: Some(connection_id),
                });
            }
            Reconnect::Shutdown => {
                info!("shutdown during reconnect");
                let _ = events.send(TransportEvent::Closed { error: None });
                return;
            }
            Reconnect::Exhausted(last_error) => {
                error!(error = %last_error, "reconnect attempts exhausted");
                let _ = events.send(TransportEvent::Closed {
                    error: Some(last_error),
                });
                return;
            }
        }
    }
}

impl Shared {
    /// Read frames from one socket until it ends.
    async fn pump(&self, read: &mut WsReader, events: &EventSender) -> SessionEnd {
        let keepalive = self.endpoint.keepalive_interval();
        let server_timeout = self.endpoint.server_timeout();
        let mut ticker = tokio::time::interval_at(Instant::now() + keepalive, keepalive);
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    if let Some(mut write) = self.writer.lock().await.take() {
                        let _ = write.send(WsMessage::Close(None)).await;
                    }
                    return SessionEnd::Shutdown;
                }
                msg = read.next() => {
                    let msg = match msg {
                        Some(Ok(m)) => m,
                        Some(Err(e)) => return SessionEnd::Dropped(e.to_string()),
                        None => return SessionEnd::Dropped("stream ended".into()),
                    };
                    last_seen = Instant::now();

                    match msg {
                        WsMessage::Text(t) => {
                            if let Some(end) = self.handle_frame(t.as_str(), events) {
                                return end;
                            }
                        }
                        WsMessage::Close(frame) => {
                            let reason = frame
                                .map(|f| f.reason.as_str().to_string())
                                .filter(|r| !r.is_empty());
                            return SessionEnd::ServerClosed(reason);
                        }
                        _ => {}
                    }
                }
                _ = ticker.tick() => {
                    if last_seen.elapsed() >= server_timeout {
                        return SessionEnd::Dropped(format!(
                            "no frames from endpoint for {}s",
                            server_timeout.as_secs()
                        ));
                    }
                    if let Some(write) = self.writer.lock().await.as_mut() {
                        if let Err(e) = write.send(WsMessage::Ping(Default::default())).await {
                            return SessionEnd::Dropped(e.to_string());
                        }
                    }
                }
            }
        }
    }

    /// Handle one text frame. Returns `Some` when the frame ends the session.
    fn handle_frame(&self, raw: &str, events: &EventSender) -> Option<SessionEnd> {
        let frame = match Frame::decode(raw) {
            Ok(f) => f,
            Err(e) if protocol::is_unknown_frame(raw) => {
                debug!(error = %e, "ignoring frame of unknown type");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "ignoring malformed frame");
                return None;
            }
        };

        match frame {
            Frame::Event { target, arguments } => {
                if let Some(event) = protocol::event_to_transport(&target, &arguments) {
                    let _ = events.send(event);
                }
            }
            Frame::Completion {
                invocation_id,
                error,
            } => {
                let waiter = self.pending.lock().unwrap().remove(&invocation_id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(error.map_or(Ok(()), Err));
                    }
                    None => debug!(invocation_id = %invocation_id, "completion for unknown invocation"),
                }
            }
            Frame::Welcome { connection_id } => {
                debug!(connection_id = %connection_id, "connection id refreshed");
                *self.connection_id.lock().unwrap() = Some(connection_id);
            }
            Frame::Close { error } => return Some(SessionEnd::ServerClosed(error)),
            Frame::Invocation { target, .. } => {
                debug!(target = %target, "ignoring invocation from endpoint");
            }
        }
        None
    }

    /// Drop the socket and fail every in-flight invocation.
    async fn release_socket(&self) {
        self.writer.lock().await.take();
        // Dropping the waiters resolves them with `ConnectionClosed`.
        self.pending.lock().unwrap().clear();
    }

    async fn reconnect(&self) -> Reconnect {
        let mut last_error = String::from("no reconnect attempts configured");

        for (attempt, delay) in self.delays.iter().enumerate() {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => return Reconnect::Shutdown,
                _ = tokio::time::sleep(*delay) => {}
            }

            debug!(attempt = attempt + 1, url = %self.url, "reconnect attempt");
            match handshake(&self.url, self.endpoint.handshake_timeout()).await {
                Ok((write, read, connection_id)) => {
                    *self.writer.lock().await = Some(write);
                    *self.connection_id.lock().unwrap() = Some(connection_id.clone());
                    return Reconnect::Connected(read, connection_id);
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "reconnect attempt failed");
                    last_error = e.to_string();
                }
            }
        }

        Reconnect::Exhausted(last_error)
    }

    async fn invoke(&self, target: &str, arguments: Vec<Value>) -> Result<(), ChatError> {
        let n = self.next_invocation.fetch_add(1, Ordering::Relaxed) + 1;
        let id = n.to_string();
        let frame = Frame::invocation(n, target, arguments).encode()?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id.clone(), tx);

        {
            let mut guard = self.writer.lock().await;
            let sent = match guard.as_mut() {
                Some(write) => write
                    .send(WsMessage::text(frame))
                    .await
                    .map_err(|e| ChatError::Transport(e.to_string())),
                None => Err(ChatError::ConnectionClosed),
            };
            if let Err(e) = sent {
                self.pending.lock().unwrap().remove(&id);
                return Err(e);
            }
        }
        debug!(invocation_id = %id, target = target, "invocation sent");

        match tokio::time::timeout(self.endpoint.server_timeout(), rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(reason))) => Err(ChatError::SubmissionRejected(reason)),
            Ok(Err(_)) => Err(ChatError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().unwrap().remove(&id);
                Err(ChatError::Timeout("invocation completion"))
            }
        }
    }
}

// ─────────────────────────────────────────────
// WsConnection
// ─────────────────────────────────────────────

/// Handle to an open WebSocket channel.
pub struct WsConnection {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl Connection for WsConnection {
    fn connection_id(&self) -> Option<String> {
        self.shared.connection_id.lock().unwrap().clone()
    }

    async fn invoke(&self, target: &str, arguments: Vec<Value>) -> Result<(), ChatError> {
        self.shared.invoke(target, arguments).await
    }

    async fn close(&self) -> Result<(), ChatError> {
        let Some(mut task) = self.task.lock().await.take() else {
            return Ok(());
        };

        self.shared.shutdown.notify_one();
        match tokio::time::timeout(CLOSE_TIMEOUT, &mut task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ChatError::Transport(e.to_string())),
            Err(_) => {
                task.abort();
                Err(ChatError::Timeout("channel close"))
            }
        }
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        self.shared.shutdown.notify_one();
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
