//! Session manager: owns one channel to the broadcast endpoint.
//!
//! Responsibilities:
//! - Open the channel (`start`), close it (`stop`)
//! - Track `ConnectionState` and the endpoint-assigned session id
//! - Fold inbound broadcasts into an append-only message log
//! - Submit outbound messages while `Connected`
//! - Publish state and log to any number of observers
//!
//! Transport events reach a single dispatcher task through one queue, so
//! they are applied in the order the transport emitted them. The manager
//! is the only writer of its state; observers get `watch` snapshots and a
//! `broadcast` stream of incremental `SessionEvent`s.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use relaychat_core::{ChatError, ChatMessage, ConnectionState};

use crate::protocol::SUBMIT_MESSAGE;
use crate::transport::{Connection, Transport, TransportEvent};

/// Buffer of the incremental event stream. Slow observers see `Lagged`
/// and can resync from the `watch` snapshots.
const EVENT_CAPACITY: usize = 256;

// ─────────────────────────────────────────────
// SessionEvent
// ─────────────────────────────────────────────

/// Incremental change notification delivered to observers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// A message was appended to the log (in append order).
    MessageAppended(ChatMessage),
    /// The connection state or session id changed.
    StateChanged {
        state: ConnectionState,
        session_id: Option<String>,
    },
    PeerConnected(String),
    PeerDisconnected(String),
}

// ─────────────────────────────────────────────
// SessionManager
// ─────────────────────────────────────────────

/// Manages the lifecycle, message log, and observers of one channel.
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
    /// The open channel, if any. Exclusively owned by the manager.
    channel: Mutex<Option<OpenChannel>>,
}

struct OpenChannel {
    connection: Arc<dyn Connection>,
    dispatcher: JoinHandle<()>,
}

/// Which channel lifecycle events are accepted from.
///
/// Every `start()` opens a new generation. Once a generation is closed
/// (by the transport or by `stop()`), its late lifecycle events are ignored.
struct Lifecycle {
    generation: u64,
    closed: bool,
    /// The dispatcher already applied a lifecycle event of this generation,
    /// so the handshake result is out of date.
    superseded: bool,
}

impl Lifecycle {
    fn accepts(&self, generation: u64) -> bool {
        self.generation == generation && !self.closed
    }
}

/// Canonical state plus the notification fan-out.
struct Shared {
    lifecycle: StdMutex<Lifecycle>,
    state_tx: watch::Sender<ConnectionState>,
    session_id_tx: watch::Sender<Option<String>>,
    log_tx: watch::Sender<Vec<ChatMessage>>,
    events_tx: broadcast::Sender<SessionEvent>,
    stop_requested: AtomicBool,
}

impl SessionManager {
    /// Create a manager in the `Disconnected` state with an empty log.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (session_id_tx, _) = watch::channel(None);
        let (log_tx, _) = watch::channel(Vec::new());
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            transport,
            shared: Arc::new(Shared {
                lifecycle: StdMutex::new(Lifecycle {
                    generation: 0,
                    closed: true,
                    superseded: false,
                }),
                state_tx,
                session_id_tx,
                log_tx,
                events_tx,
                stop_requested: AtomicBool::new(false),
            }),
            channel: Mutex::new(None),
        }
    }

    /// Open the channel and wait for the handshake.
    ///
    /// The message log is kept. The initial connection is attempted once;
    /// on failure the state stays `Disconnected` and `ChatError::Handshake`
    /// is returned.
    pub async fn start(&self) -> Result<(), ChatError> {
        self.open(false).await
    }

    /// Like `start`, but clears the message log first.
    pub async fn start_new_session(&self) -> Result<(), ChatError> {
        self.open(true).await
    }

    async fn open(&self, clear_log: bool) -> Result<(), ChatError> {
        let mut channel = self.channel.lock().await;

        if channel.is_some() && self.current_state().has_channel() {
            return Err(ChatError::AlreadyStarted);
        }
        // A channel the transport already closed; nothing left to release.
        if let Some(stale) = channel.take() {
            stale.dispatcher.abort();
        }

        if clear_log {
            self.shared.log_tx.send_replace(Vec::new());
            info!("message log cleared for new session");
        }

        let generation = self.shared.begin_generation();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        // The dispatcher is listening before the transport can emit anything.
        let shared = self.shared.clone();
        let dispatcher = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                shared.handle_event(generation, event);
            }
            debug!(generation, "transport event queue closed");
        });

        info!(generation, "starting session");
        let connection = match self.transport.connect(events_tx).await {
            Ok(c) => Arc::<dyn Connection>::from(c),
            Err(e) => {
                dispatcher.abort();
                self.shared.close_generation(generation);
                let err = match e {
                    ChatError::Handshake(_) => e,
                    other => ChatError::Handshake(other.to_string()),
                };
                warn!(error = %err, "session start failed");
                return Err(err);
            }
        };

        let session_id = connection.connection_id();
        let opened = self.shared.opened(generation, session_id.clone());
        *channel = Some(OpenChannel {
            connection,
            dispatcher,
        });

        if opened {
            info!(session_id = ?session_id, "session started");
            Ok(())
        } else {
            warn!("channel closed before the handshake completed");
            Err(ChatError::ConnectionClosed)
        }
    }

    /// Close the channel if one is open.
    ///
    /// The manager lets go of the channel before closing it, so the
    /// resource is released even when closing fails. State becomes
    /// `Disconnected` and the session id is cleared either way.
    pub async fn stop(&self) -> Result<(), ChatError> {
        let Some(open) = self.channel.lock().await.take() else {
            debug!("stop with no open channel");
            return Ok(());
        };

        info!("stopping session");
        self.shared.stop();

        let result = open.connection.close().await;
        open.dispatcher.abort();

        if let Err(e) = &result {
            warn!(error = %e, "error while closing channel");
        }
        result
    }

    /// Submit a message to the endpoint for broadcast.
    ///
    /// Only allowed while `Connected`; nothing is queued otherwise. The
    /// message is *not* appended locally: it enters the log when the
    /// endpoint's broadcast comes back.
    pub async fn submit(&self, sender: &str, body: &str) -> Result<(), ChatError> {
        let state = self.current_state();
        if !state.is_connected() {
            warn!(state = %state, "submit rejected, channel not connected");
            return Err(ChatError::NotConnected(state));
        }

        let connection = match self.channel.lock().await.as_ref() {
            Some(open) => open.connection.clone(),
            None => return Err(ChatError::NotConnected(ConnectionState::Disconnected)),
        };

        debug!(sender = sender, body_len = body.len(), "submitting message");
        connection
            .invoke(SUBMIT_MESSAGE, vec![Value::from(sender), Value::from(body)])
            .await
            .inspect_err(|e| warn!(error = %e, "submission failed"))
    }

    // ── Observers ────────────────────────────

    /// Connection state, current value first.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Endpoint-assigned session id, current value first.
    pub fn session_id(&self) -> watch::Receiver<Option<String>> {
        self.shared.session_id_tx.subscribe()
    }

    /// The whole message log, current value first.
    pub fn messages(&self) -> watch::Receiver<Vec<ChatMessage>> {
        self.shared.log_tx.subscribe()
    }

    /// Incremental events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events_tx.subscribe()
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    pub fn current_session_id(&self) -> Option<String> {
        self.shared.session_id_tx.borrow().clone()
    }

    /// Snapshot of the message log.
    pub fn log(&self) -> Vec<ChatMessage> {
        self.shared.log_tx.borrow().clone()
    }

    /// Whether the current `Disconnected` state came from `stop()`.
    ///
    /// A server close and exhausted reconnect attempts look identical at
    /// this layer; this flag tells them apart from a local stop.
    pub fn stop_requested(&self) -> bool {
        self.shared.stop_requested.load(Ordering::SeqCst)
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(open) = self.channel.get_mut().take() {
            open.dispatcher.abort();
        }
    }
}

// ─────────────────────────────────────────────
// Dispatcher
// ─────────────────────────────────────────────

impl Shared {
    fn begin_generation(&self) -> u64 {
        let mut lifecycle = self.lifecycle.lock().unwrap();
        lifecycle.generation += 1;
        lifecycle.closed = false;
        lifecycle.superseded = false;
        self.stop_requested.store(false, Ordering::SeqCst);
        lifecycle.generation
    }

    /// Apply a successful handshake. False if the channel already closed.
    ///
    /// The transport may emit events before `connect()` returns. When the
    /// dispatcher got to one of them first, it already holds the newer state.
    fn opened(&self, generation: u64, session_id: Option<String>) -> bool {
        let lifecycle = self.lifecycle.lock().unwrap();
        if !lifecycle.accepts(generation) {
            return false;
        }
        if lifecycle.superseded {
            debug!(generation, "handshake result already superseded by the transport");
            return true;
        }
        self.transition(ConnectionState::Connected, session_id);
        true
    }

    fn close_generation(&self, generation: u64) {
        let mut lifecycle = self.lifecycle.lock().unwrap();
        if lifecycle.generation == generation {
            lifecycle.closed = true;
        }
        self.transition(ConnectionState::Disconnected, None);
    }

    fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().unwrap();
        lifecycle.closed = true;
        self.stop_requested.store(true, Ordering::SeqCst);
        self.transition(ConnectionState::Disconnected, None);
    }

    /// Map one transport event to a state transition and notification.
    fn handle_event(&self, generation: u64, event: TransportEvent) {
        match event {
            // Arrival never depends on connection state.
            TransportEvent::Message { sender, body } => {
                self.append(ChatMessage::new(sender, body));
            }
            TransportEvent::PeerConnected { connection_id } => {
                debug!(peer = %connection_id, "peer connected");
                let _ = self
                    .events_tx
                    .send(SessionEvent::PeerConnected(connection_id));
            }
            TransportEvent::PeerDisconnected { connection_id } => {
                debug!(peer = %connection_id, "peer disconnected");
                let _ = self
                    .events_tx
                    .send(SessionEvent::PeerDisconnected(connection_id));
            }
            TransportEvent::Closed { error } => {
                let mut lifecycle = self.lifecycle.lock().unwrap();
                if !lifecycle.accepts(generation) {
                    debug!(generation, "ignoring close of a finished channel");
                    return;
                }
                lifecycle.closed = true;
                match &error {
                    Some(e) => warn!(error = %e, "channel closed"),
                    None => info!("channel closed"),
                }
                self.transition(ConnectionState::Disconnected, None);
            }
            TransportEvent::Reconnecting { reason } => {
                let mut lifecycle = self.lifecycle.lock().unwrap();
                if !lifecycle.accepts(generation) {
                    debug!(generation, "ignoring reconnecting for a finished channel");
                    return;
                }
                lifecycle.superseded = true;
                warn!(reason = ?reason, "connection lost, reconnecting");
                self.transition(ConnectionState::Reconnecting, None);
            }
            TransportEvent::Reconnected { connection_id } => {
                let mut lifecycle = self.lifecycle.lock().unwrap();
                if !lifecycle.accepts(generation) {
                    debug!(generation, "ignoring reconnected for a finished channel");
                    return;
                }
                lifecycle.superseded = true;
                self.transition(ConnectionState::Connected, connection_id);
            }
        }
    }

    fn append(&self, message: ChatMessage) {
        debug!(sender = %message.sender, body_len = message.body.len(), "message received");
        self.log_tx.send_modify(|log| log.push(message.clone()));
        let _ = self.events_tx.send(SessionEvent::MessageAppended(message));
    }

    /// Publish a new state/session id pair. No-op when nothing changed.
    fn transition(&self, state: ConnectionState, session_id: Option<String>) {
        let previous = *self.state_tx.borrow();

        // Session id first, so a state observer never reads a stale id.
        let id_changed = self.session_id_tx.send_if_modified(|current| {
            if *current != session_id {
                *current = session_id.clone();
                true
            } else {
                false
            }
        });
        let state_changed = self.state_tx.send_if_modified(|current| {
            if *current != state {
                *current = state;
                true
            } else {
                false
            }
        });

        if state_changed || id_changed {
            info!(from = %previous, to = %state, session_id = ?session_id, "connection state changed");
            let _ = self
                .events_tx
                .send(SessionEvent::StateChanged { state, session_id });
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use crate::transport::EventSender;

    /// In-memory transport driven by the test.
    #[derive(Default)]
    struct ScriptedTransport {
        fail_handshake: AtomicBool,
        /// Lose the socket right after the handshake, before `connect` returns.
        drop_after_handshake: AtomicBool,
        echo: AtomicBool,
        connects: AtomicUsize,
        events: StdMutex<Option<EventSender>>,
        invocations: Arc<StdMutex<Vec<(String, Vec<Value>)>>>,
        reject_with: Arc<StdMutex<Option<String>>>,
        close_error: Arc<StdMutex<Option<String>>>,
        closed: Arc<AtomicBool>,
    }

    impl ScriptedTransport {
        /// Emit an event as if it came off the wire.
        fn emit(&self, event: TransportEvent) {
            self.events
                .lock()
                .unwrap()
                .as_ref()
                .expect("transport was never connected")
                .send(event)
                .unwrap();
        }

        fn message(&self, sender: &str, body: &str) {
            self.emit(TransportEvent::Message {
                sender: sender.into(),
                body: body.into(),
            });
        }
    }

    struct ScriptedConnection {
        id: String,
        echo: bool,
        events: EventSender,
        invocations: Arc<StdMutex<Vec<(String, Vec<Value>)>>>,
        reject_with: Arc<StdMutex<Option<String>>>,
        close_error: Arc<StdMutex<Option<String>>>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn connect(&self, events: EventSender) -> Result<Box<dyn Connection>, ChatError> {
            let n = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_handshake.load(Ordering::SeqCst) {
                return Err(ChatError::Handshake("connection refused".into()));
            }
            *self.events.lock().unwrap() = Some(events.clone());
            if self.drop_after_handshake.load(Ordering::SeqCst) {
                events
                    .send(TransportEvent::Reconnecting {
                        reason: Some("reset after welcome".into()),
                    })
                    .unwrap();
                // Let the dispatcher apply it before the handshake result.
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Ok(Box::new(ScriptedConnection {
                id: format!("conn-{n}"),
                echo: self.echo.load(Ordering::SeqCst),
                events,
                invocations: self.invocations.clone(),
                reject_with: self.reject_with.clone(),
                close_error: self.close_error.clone(),
                closed: self.closed.clone(),
            }))
        }
    }

    #[async_trait]
    impl Connection for ScriptedConnection {
        fn connection_id(&self) -> Option<String> {
            Some(self.id.clone())
        }

        async fn invoke(&self, target: &str, arguments: Vec<Value>) -> Result<(), ChatError> {
            self.invocations
                .lock()
                .unwrap()
                .push((target.to_string(), arguments.clone()));
            if let Some(reason) = self.reject_with.lock().unwrap().clone() {
                return Err(ChatError::SubmissionRejected(reason));
            }
            if self.echo {
                let _ = self.events.send(TransportEvent::Message {
                    sender: arguments[0].as_str().unwrap().to_string(),
                    body: arguments[1].as_str().unwrap().to_string(),
                });
            }
            Ok(())
        }

        async fn close(&self) -> Result<(), ChatError> {
            self.closed.store(true, Ordering::SeqCst);
            if let Some(reason) = self.close_error.lock().unwrap().clone() {
                return Err(ChatError::Transport(reason));
            }
            let _ = self.events.send(TransportEvent::Closed { error: None });
            Ok(())
        }
    }

    fn setup() -> (Arc<ScriptedTransport>, SessionManager) {
        let transport = Arc::new(ScriptedTransport::default());
        let manager = SessionManager::new(transport.clone());
        (transport, manager)
    }

    async fn wait_for_state(manager: &SessionManager, want: ConnectionState) {
        let mut rx = manager.state();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == want))
            .await
            .expect("timed out waiting for state")
            .expect("state sender dropped");
    }

    async fn wait_for_log_len(manager: &SessionManager, len: usize) -> Vec<ChatMessage> {
        let mut rx = manager.messages();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|log| log.len() >= len))
            .await
            .expect("timed out waiting for log")
            .expect("log sender dropped");
        manager.log()
    }

    fn pairs(log: &[ChatMessage]) -> Vec<(&str, &str)> {
        log.iter()
            .map(|m| (m.sender.as_str(), m.body.as_str()))
            .collect()
    }

    // ── start ────────────────────────────────

    #[tokio::test]
    async fn test_initial_state() {
        let (_, manager) = setup();
        assert_eq!(manager.current_state(), ConnectionState::Disconnected);
        assert_eq!(manager.current_session_id(), None);
        assert!(manager.log().is_empty());
        assert!(!manager.stop_requested());
    }

    #[tokio::test]
    async fn test_start_connects() {
        let (transport, manager) = setup();
        manager.start().await.unwrap();

        assert_eq!(manager.current_state(), ConnectionState::Connected);
        assert_eq!(manager.current_session_id().as_deref(), Some("conn-1"));
        assert_eq!(transport.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_handshake_failure() {
        let (transport, manager) = setup();
        transport.fail_handshake.store(true, Ordering::SeqCst);

        let err = manager.start().await.unwrap_err();
        assert!(matches!(err, ChatError::Handshake(_)));
        assert_eq!(manager.current_state(), ConnectionState::Disconnected);
        assert_eq!(manager.current_session_id(), None);
        // No retry of the initial connection
        assert_eq!(transport.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drop_during_handshake_is_not_overwritten() {
        let (transport, manager) = setup();
        transport.drop_after_handshake.store(true, Ordering::SeqCst);

        manager.start().await.unwrap();
        assert_eq!(manager.current_state(), ConnectionState::Reconnecting);
        assert_eq!(manager.current_session_id(), None);

        let err = manager.submit("alice", "hello").await.unwrap_err();
        assert_eq!(err, ChatError::NotConnected(ConnectionState::Reconnecting));
        assert!(transport.invocations.lock().unwrap().is_empty());

        transport.emit(TransportEvent::Reconnected {
            connection_id: Some("conn-1b".into()),
        });
        wait_for_state(&manager, ConnectionState::Connected).await;
        assert_eq!(manager.current_session_id().as_deref(), Some("conn-1b"));
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let (transport, manager) = setup();
        manager.start().await.unwrap();

        assert_eq!(manager.start().await, Err(ChatError::AlreadyStarted));
        assert_eq!(manager.current_state(), ConnectionState::Connected);
        assert_eq!(transport.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_then_two_messages() {
        let (transport, manager) = setup();
        manager.start().await.unwrap();

        transport.message("alice", "hi");
        transport.message("bob", "yo");

        let log = wait_for_log_len(&manager, 2).await;
        assert_eq!(pairs(&log), vec![("alice", "hi"), ("bob", "yo")]);
        assert_eq!(manager.current_state(), ConnectionState::Connected);
    }

    // ── receive ──────────────────────────────

    #[tokio::test]
    async fn test_log_order_survives_transitions() {
        let (transport, manager) = setup();
        manager.start().await.unwrap();

        transport.message("a", "1");
        transport.emit(TransportEvent::Reconnecting { reason: None });
        transport.message("b", "2");
        transport.emit(TransportEvent::Reconnected {
            connection_id: Some("conn-2".into()),
        });
        transport.message("c", "3");
        transport.message("a", "4");
        transport.emit(TransportEvent::Closed { error: None });
        transport.message("b", "5");

        let log = wait_for_log_len(&manager, 5).await;
        assert_eq!(
            pairs(&log),
            vec![("a", "1"), ("b", "2"), ("c", "3"), ("a", "4"), ("b", "5")]
        );
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_appended_twice() {
        let (transport, manager) = setup();
        manager.start().await.unwrap();

        transport.message("alice", "hi");
        transport.message("alice", "hi");

        let log = wait_for_log_len(&manager, 2).await;
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].body, log[1].body);
    }

    #[tokio::test]
    async fn test_late_observer_gets_full_log() {
        let (transport, manager) = setup();
        manager.start().await.unwrap();
        transport.message("alice", "hi");
        transport.message("bob", "yo");
        wait_for_log_len(&manager, 2).await;

        let rx = manager.messages();
        assert_eq!(rx.borrow().len(), 2);
    }

    // ── submit ───────────────────────────────

    #[tokio::test]
    async fn test_submit_before_start_fails() {
        let (transport, manager) = setup();
        let err = manager.submit("alice", "hello").await.unwrap_err();
        assert_eq!(err, ChatError::NotConnected(ConnectionState::Disconnected));
        assert!(transport.invocations.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submit_while_reconnecting_fails() {
        let (transport, manager) = setup();
        manager.start().await.unwrap();
        transport.message("bob", "before");
        let before = wait_for_log_len(&manager, 1).await;

        transport.emit(TransportEvent::Reconnecting {
            reason: Some("socket reset".into()),
        });
        wait_for_state(&manager, ConnectionState::Reconnecting).await;

        let err = manager.submit("alice", "hello").await.unwrap_err();
        assert_eq!(err, ChatError::NotConnected(ConnectionState::Reconnecting));
        assert!(transport.invocations.lock().unwrap().is_empty());
        assert_eq!(manager.log(), before);
    }

    #[tokio::test]
    async fn test_submit_invokes_without_appending() {
        let (transport, manager) = setup();
        manager.start().await.unwrap();

        manager.submit("alice", "hello").await.unwrap();

        let invocations = transport.invocations.lock().unwrap().clone();
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].0, "submitMessage");
        assert_eq!(
            invocations[0].1,
            vec![Value::from("alice"), Value::from("hello")]
        );

        // Only the marker arrives: the submission itself added nothing.
        transport.message("marker", "m");
        let log = wait_for_log_len(&manager, 1).await;
        assert_eq!(pairs(&log), vec![("marker", "m")]);
    }

    #[tokio::test]
    async fn test_submit_echo_enters_log_once() {
        let (transport, manager) = setup();
        transport.echo.store(true, Ordering::SeqCst);
        manager.start().await.unwrap();

        manager.submit("alice", "hello").await.unwrap();

        let log = wait_for_log_len(&manager, 1).await;
        assert_eq!(pairs(&log), vec![("alice", "hello")]);
    }

    #[tokio::test]
    async fn test_submit_remote_rejection_propagates() {
        let (transport, manager) = setup();
        manager.start().await.unwrap();
        *transport.reject_with.lock().unwrap() = Some("hub error".into());

        let err = manager.submit("alice", "hello").await.unwrap_err();
        assert_eq!(err, ChatError::SubmissionRejected("hub error".into()));
        assert!(manager.log().is_empty());
    }

    // ── reconnect / close ────────────────────

    #[tokio::test]
    async fn test_reconnect_keeps_log_and_updates_id() {
        let (transport, manager) = setup();
        manager.start().await.unwrap();
        transport.message("alice", "hi");
        let before = wait_for_log_len(&manager, 1).await;

        transport.emit(TransportEvent::Reconnecting { reason: None });
        wait_for_state(&manager, ConnectionState::Reconnecting).await;
        assert_eq!(manager.current_session_id(), None);
        assert_eq!(manager.log(), before);

        transport.emit(TransportEvent::Reconnected {
            connection_id: Some("sess-42".into()),
        });
        wait_for_state(&manager, ConnectionState::Connected).await;

        assert_eq!(manager.current_session_id().as_deref(), Some("sess-42"));
        assert_eq!(manager.log(), before);
    }

    #[tokio::test]
    async fn test_close_then_stray_message() {
        let (transport, manager) = setup();
        manager.start().await.unwrap();

        transport.emit(TransportEvent::Closed {
            error: Some("retries exhausted".into()),
        });
        wait_for_state(&manager, ConnectionState::Disconnected).await;
        assert_eq!(manager.current_session_id(), None);
        assert!(!manager.stop_requested());

        transport.message("late", "still here");
        let log = wait_for_log_len(&manager, 1).await;
        assert_eq!(pairs(&log), vec![("late", "still here")]);
        assert_eq!(manager.current_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_lifecycle_events_after_close_are_ignored() {
        let (transport, manager) = setup();
        manager.start().await.unwrap();

        transport.emit(TransportEvent::Closed { error: None });
        transport.emit(TransportEvent::Reconnected {
            connection_id: Some("ghost".into()),
        });
        transport.message("marker", "m");
        wait_for_log_len(&manager, 1).await;

        assert_eq!(manager.current_state(), ConnectionState::Disconnected);
        assert_eq!(manager.current_session_id(), None);
    }

    #[tokio::test]
    async fn test_restart_after_close_keeps_log() {
        let (transport, manager) = setup();
        manager.start().await.unwrap();
        transport.message("alice", "hi");
        wait_for_log_len(&manager, 1).await;

        transport.emit(TransportEvent::Closed { error: None });
        wait_for_state(&manager, ConnectionState::Disconnected).await;

        manager.start().await.unwrap();
        assert_eq!(manager.current_state(), ConnectionState::Connected);
        assert_eq!(manager.current_session_id().as_deref(), Some("conn-2"));
        assert_eq!(manager.log().len(), 1);
    }

    #[tokio::test]
    async fn test_start_new_session_clears_log() {
        let (transport, manager) = setup();
        manager.start().await.unwrap();
        transport.message("alice", "hi");
        wait_for_log_len(&manager, 1).await;
        manager.stop().await.unwrap();

        manager.start_new_session().await.unwrap();
        assert!(manager.log().is_empty());
        assert_eq!(manager.current_state(), ConnectionState::Connected);
    }

    // ── stop ─────────────────────────────────

    #[tokio::test]
    async fn test_stop_without_channel_is_noop() {
        let (_, manager) = setup();
        manager.stop().await.unwrap();
        assert_eq!(manager.current_state(), ConnectionState::Disconnected);
        assert!(!manager.stop_requested());
    }

    #[tokio::test]
    async fn test_stop_closes_channel() {
        let (transport, manager) = setup();
        manager.start().await.unwrap();

        manager.stop().await.unwrap();

        assert!(transport.closed.load(Ordering::SeqCst));
        assert_eq!(manager.current_state(), ConnectionState::Disconnected);
        assert_eq!(manager.current_session_id(), None);
        assert!(manager.stop_requested());

        // A second stop has nothing left to close.
        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_releases_channel_when_close_fails() {
        let (transport, manager) = setup();
        manager.start().await.unwrap();
        *transport.close_error.lock().unwrap() = Some("socket already gone".into());

        let err = manager.stop().await.unwrap_err();
        assert_eq!(err, ChatError::Transport("socket already gone".into()));
        assert!(transport.closed.load(Ordering::SeqCst));
        assert_eq!(manager.current_state(), ConnectionState::Disconnected);
        assert_eq!(manager.current_session_id(), None);
        assert!(manager.stop_requested());

        // Nothing is left holding the old channel.
        *transport.close_error.lock().unwrap() = None;
        manager.start().await.unwrap();
        assert_eq!(manager.current_state(), ConnectionState::Connected);
        assert_eq!(manager.current_session_id().as_deref(), Some("conn-2"));
        assert_eq!(transport.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_old_generation_events_ignored_after_stop() {
        let (_, manager) = setup();
        manager.start().await.unwrap();
        manager.stop().await.unwrap();

        manager.shared.handle_event(
            1,
            TransportEvent::Reconnected {
                connection_id: Some("ghost".into()),
            },
        );
        assert_eq!(manager.current_state(), ConnectionState::Disconnected);
        assert_eq!(manager.current_session_id(), None);
    }

    // ── observers ────────────────────────────

    #[tokio::test]
    async fn test_presence_does_not_touch_state_or_log() {
        let (transport, manager) = setup();
        manager.start().await.unwrap();
        let mut events = manager.subscribe();

        transport.emit(TransportEvent::PeerConnected {
            connection_id: "c-9".into(),
        });
        transport.emit(TransportEvent::PeerDisconnected {
            connection_id: "c-9".into(),
        });

        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::PeerConnected("c-9".into())
        );
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::PeerDisconnected("c-9".into())
        );
        assert_eq!(manager.current_state(), ConnectionState::Connected);
        assert_eq!(manager.current_session_id().as_deref(), Some("conn-1"));
        assert!(manager.log().is_empty());
    }

    #[tokio::test]
    async fn test_event_stream_order() {
        let (transport, manager) = setup();
        let mut events = manager.subscribe();
        manager.start().await.unwrap();

        transport.message("alice", "hi");
        transport.emit(TransportEvent::Reconnecting { reason: None });
        transport.message("bob", "yo");

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(events.recv().await.unwrap());
        }

        assert_eq!(
            seen[0],
            SessionEvent::StateChanged {
                state: ConnectionState::Connected,
                session_id: Some("conn-1".into())
            }
        );
        assert!(matches!(&seen[1], SessionEvent::MessageAppended(m) if m.body == "hi"));
        assert_eq!(
            seen[2],
            SessionEvent::StateChanged {
                state: ConnectionState::Reconnecting,
                session_id: None
            }
        );
        assert!(matches!(&seen[3], SessionEvent::MessageAppended(m) if m.body == "yo"));
    }
}
