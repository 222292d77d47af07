//! Reconnecting single-connection transport.
//!
//! A [`Transport`] owns at most one live connection to its address. Each
//! connection attempt runs as one session task that dials through the
//! configured [`Connector`], publishes the link, then multiplexes inbound
//! frames, outbound frames and close requests until the connection ends.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected --connect()--> Connecting --ok--> Open
//!      ^                          |               |
//!      | ceiling reached          | failure       | drop / close()
//!      |                          v               v
//!      +-------------------- Closed (backoff) <---+
//!                                 |
//!                                 +--delay--> Connecting
//! ```
//!
//! The attempt counter only resets on a successful open. Once it reaches
//! the policy ceiling the transport settles in `Disconnected` and stays
//! there until [`Transport::connect`] is called again.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ReconnectPolicy;
use crate::listeners::{Handler, Listeners};
use crate::transport::connector::{Connector, Duplex};
use crate::{AppError, Result};

// ── Public types ──────────────────────────────────────────────────────────────

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and no pending attempt.
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// The connection is usable.
    Open,
    /// The last connection ended; a reconnect is scheduled.
    Closed,
}

/// What the reconnect policy decided when a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconnect {
    /// Another attempt will run after `delay`.
    Scheduled {
        /// 1-based attempt number since the last successful open.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// The ceiling was reached; no further automatic attempts.
    Exhausted,
}

/// Event kinds a subscriber can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Connection opened.
    Open,
    /// Connection ended.
    Close,
    /// Connection or stream fault.
    Error,
    /// Inbound text frame.
    Message,
}

/// Event delivered to [`Transport::on`] subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection opened.
    Open,
    /// Connection ended, with the reconnect decision taken for it.
    Close(Reconnect),
    /// Connection or stream fault.
    Error(String),
    /// Inbound text frame.
    Message(String),
}

impl TransportEvent {
    /// Kind of this event.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Open => EventKind::Open,
            Self::Close(_) => EventKind::Close,
            Self::Error(_) => EventKind::Error,
            Self::Message(_) => EventKind::Message,
        }
    }
}

/// Outbound frame content.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Sent as-is.
    Text(String),
    /// Serialized to compact JSON text before sending.
    Json(serde_json::Value),
}

impl Payload {
    /// Text form written to the connection.
    #[must_use]
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Json(value) => value.to_string(),
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

// ── Internal state ────────────────────────────────────────────────────────────

/// Handle to the session task of an open connection.
struct Link {
    outbound: mpsc::UnboundedSender<String>,
    close: CancellationToken,
}

struct LinkState {
    status: ConnectionState,
    attempts: u32,
    /// Bumped by every connect that starts an attempt; a backoff timer only
    /// fires for the generation it was scheduled under.
    generation: u64,
    link: Option<Link>,
}

#[derive(Default)]
struct EventHandlers {
    open: Listeners<TransportEvent>,
    close: Listeners<TransportEvent>,
    error: Listeners<TransportEvent>,
    message: Listeners<TransportEvent>,
}

impl EventHandlers {
    fn for_kind(&self, kind: EventKind) -> &Listeners<TransportEvent> {
        match kind {
            EventKind::Open => &self.open,
            EventKind::Close => &self.close,
            EventKind::Error => &self.error,
            EventKind::Message => &self.message,
        }
    }
}

struct Inner {
    url: String,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    state: Mutex<LinkState>,
    message_handlers: Listeners<String>,
    events: EventHandlers,
}

// ── Transport ─────────────────────────────────────────────────────────────────

/// Resilient transport owning one logical connection to one address.
///
/// Cloning is cheap; clones share the same connection and subscribers.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl Transport {
    /// Create a disconnected transport. Nothing is dialed until
    /// [`connect`](Self::connect) is called.
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                connector,
                policy,
                state: Mutex::new(LinkState {
                    status: ConnectionState::Disconnected,
                    attempts: 0,
                    generation: 0,
                    link: None,
                }),
                message_handlers: Listeners::new(),
                events: EventHandlers::default(),
            }),
        }
    }

    /// Address this transport dials.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.lock_state().status
    }

    /// Reconnect attempts made since the last successful open.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.lock_state().attempts
    }

    /// `true` when both handles refer to the same transport.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Start a connection attempt.
    ///
    /// No-op while a connection is open or an attempt is already in flight.
    /// Failures are never returned: they go through the reconnect policy.
    /// Must be called from within a Tokio runtime.
    pub fn connect(&self) {
        Inner::connect(&self.inner);
    }

    /// Request the current connection to close.
    ///
    /// The resulting `close` event runs the reconnect policy like any other
    /// disconnect. No-op when nothing is open.
    pub fn close(&self) {
        let state = self.inner.lock_state();
        match &state.link {
            Some(link) => {
                debug!(url = %self.inner.url, "transport: close requested");
                link.close.cancel();
            }
            None => debug!(url = %self.inner.url, "transport: close with no open connection"),
        }
    }

    /// Send a frame, dropping it with a warning when not open.
    pub fn send(&self, payload: impl Into<Payload>) {
        if let Err(err) = self.try_send(payload) {
            warn!(url = %self.inner.url, %err, "transport: payload dropped");
        }
    }

    /// Send a frame, reporting a closed connection to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotConnected`] when no connection is open.
    pub fn try_send(&self, payload: impl Into<Payload>) -> Result<()> {
        let state = self.inner.lock_state();
        let Some(link) = state.link.as_ref().filter(|_| state.status == ConnectionState::Open)
        else {
            return Err(AppError::NotConnected(format!(
                "cannot send to {}: connection is not open",
                self.inner.url
            )));
        };

        link.outbound.send(payload.into().into_text()).map_err(|_| {
            AppError::NotConnected(format!("connection to {} is closing", self.inner.url))
        })
    }

    /// Send a frame and wait for the next inbound frame on this transport.
    ///
    /// The returned frame is whatever arrives first, whether or not it is the
    /// peer's answer to this frame. With several requests outstanding at once
    /// the frames can be handed to the wrong caller; use the correlator for
    /// keyed replies.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotConnected`] immediately when not open, or if the
    /// transport is dropped before a frame arrives.
    pub async fn send_with_reply(&self, payload: impl Into<Payload>) -> Result<String> {
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        let handler: Handler<TransportEvent> = Arc::new(move |event: &TransportEvent| {
            if let TransportEvent::Message(frame) = event {
                let sender = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                if let Some(sender) = sender {
                    let _ = sender.send(frame.clone());
                }
            }
        });

        let _guard = HandlerGuard::register(self, EventKind::Message, handler);
        self.try_send(payload)?;

        rx.await
            .map_err(|_| AppError::NotConnected("transport dropped before a reply arrived".into()))
    }

    /// Subscribe to `kind` events.
    pub fn on(&self, kind: EventKind, handler: Handler<TransportEvent>) {
        self.inner.events.for_kind(kind).add(handler);
    }

    /// Remove a subscription registered with [`on`](Self::on).
    ///
    /// Returns `false` when the handler was not registered for `kind`.
    pub fn off(&self, kind: EventKind, handler: &Handler<TransportEvent>) -> bool {
        self.inner.events.for_kind(kind).remove(handler)
    }

    /// Register a raw inbound-frame callback.
    ///
    /// Raw callbacks run before `message` event subscribers.
    pub fn on_message(&self, handler: Handler<String>) {
        self.inner.message_handlers.add(handler);
    }

    /// Remove a callback registered with [`on_message`](Self::on_message).
    pub fn remove_message_handler(&self, handler: &Handler<String>) -> bool {
        self.inner.message_handlers.remove(handler)
    }

    /// Number of subscribers for `kind`.
    #[must_use]
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.inner.events.for_kind(kind).len()
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock_state();
        f.debug_struct("Transport")
            .field("url", &self.inner.url)
            .field("state", &state.status)
            .field("attempts", &state.attempts)
            .finish_non_exhaustive()
    }
}

/// Removes a temporary subscription when dropped.
struct HandlerGuard<'a> {
    transport: &'a Transport,
    kind: EventKind,
    handler: Handler<TransportEvent>,
}

impl<'a> HandlerGuard<'a> {
    fn register(
        transport: &'a Transport,
        kind: EventKind,
        handler: Handler<TransportEvent>,
    ) -> Self {
        transport.on(kind, Arc::clone(&handler));
        Self {
            transport,
            kind,
            handler,
        }
    }
}

impl Drop for HandlerGuard<'_> {
    fn drop(&mut self) {
        self.transport.off(self.kind, &self.handler);
    }
}

// ── Session task ──────────────────────────────────────────────────────────────

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn connect(this: &Arc<Self>) {
        {
            let mut state = this.lock_state();
            match state.status {
                ConnectionState::Open | ConnectionState::Connecting => {
                    debug!(url = %this.url, status = ?state.status, "transport: connect ignored");
                    return;
                }
                ConnectionState::Disconnected | ConnectionState::Closed => {
                    state.status = ConnectionState::Connecting;
                    state.generation += 1;
                }
            }
        }

        debug!(url = %this.url, "transport: connecting");
        tokio::spawn(Self::run_session(Arc::clone(this)));
    }

    /// Timer-driven connect; skipped when another attempt has started since
    /// the timer was armed.
    fn reconnect(this: &Arc<Self>, generation: u64) {
        {
            let state = this.lock_state();
            if state.generation != generation || state.status != ConnectionState::Closed {
                debug!(
                    url = %this.url,
                    status = ?state.status,
                    "transport: stale reconnect timer ignored"
                );
                return;
            }
        }
        Self::connect(this);
    }

    async fn run_session(this: Arc<Self>) {
        let duplex = match this.connector.connect(&this.url).await {
            Ok(duplex) => duplex,
            Err(err) => {
                warn!(url = %this.url, %err, "transport: connection attempt failed");
                this.emit(&TransportEvent::Error(err.to_string()));
                Self::handle_closed(&this);
                return;
            }
        };

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let close = CancellationToken::new();
        {
            let mut state = this.lock_state();
            state.status = ConnectionState::Open;
            state.attempts = 0;
            state.link = Some(Link {
                outbound: outbound_tx,
                close: close.clone(),
            });
        }
        info!(url = %this.url, "transport: connection open");
        this.emit(&TransportEvent::Open);

        this.pump(duplex, outbound_rx, &close).await;
        Self::handle_closed(&this);
    }

    /// Move frames in both directions until the connection ends.
    async fn pump(
        &self,
        duplex: Duplex,
        mut outbound_rx: mpsc::UnboundedReceiver<String>,
        close: &CancellationToken,
    ) {
        let Duplex {
            mut sink,
            mut stream,
        } = duplex;

        loop {
            tokio::select! {
                biased;

                () = close.cancelled() => {
                    // Frames accepted before the close request still go out.
                    let mut flushed = 0_usize;
                    while let Ok(text) = outbound_rx.try_recv() {
                        if let Err(err) = sink.send(text).await {
                            warn!(url = %self.url, %err, "transport: write failed while closing");
                            break;
                        }
                        flushed += 1;
                    }
                    debug!(url = %self.url, flushed, "transport: closing connection");
                    if let Err(err) = sink.close().await {
                        debug!(url = %self.url, %err, "transport: error while closing sink");
                    }
                    break;
                }

                frame = stream.next() => {
                    match frame {
                        None => {
                            debug!(url = %self.url, "transport: peer closed the stream");
                            break;
                        }
                        Some(Ok(text)) => self.deliver(&text),
                        Some(Err(err)) => {
                            warn!(url = %self.url, %err, "transport: stream error");
                            self.emit(&TransportEvent::Error(err.to_string()));
                            break;
                        }
                    }
                }

                Some(text) = outbound_rx.recv() => {
                    if let Err(err) = sink.send(text).await {
                        warn!(url = %self.url, %err, "transport: write failed");
                        self.emit(&TransportEvent::Error(err.to_string()));
                        break;
                    }
                }
            }
        }
    }

    fn deliver(&self, frame: &str) {
        let frame = frame.to_owned();
        self.message_handlers.emit(&frame);
        self.emit(&TransportEvent::Message(frame));
    }

    fn emit(&self, event: &TransportEvent) {
        self.events.for_kind(event.kind()).emit(event);
    }

    /// Tear down the link and apply the reconnect policy.
    fn handle_closed(this: &Arc<Self>) {
        let (outcome, generation) = {
            let mut state = this.lock_state();
            state.link = None;
            if state.attempts < this.policy.max_attempts {
                state.attempts += 1;
                state.status = ConnectionState::Closed;
                let scheduled = Reconnect::Scheduled {
                    attempt: state.attempts,
                    delay: this.policy.delay,
                };
                (scheduled, state.generation)
            } else {
                state.status = ConnectionState::Disconnected;
                (Reconnect::Exhausted, state.generation)
            }
        };

        info!(url = %this.url, ?outcome, "transport: connection closed");
        this.emit(&TransportEvent::Close(outcome));

        match outcome {
            Reconnect::Scheduled { attempt, delay } => {
                info!(
                    url = %this.url,
                    attempt,
                    max_attempts = this.policy.max_attempts,
                    "transport: reconnect scheduled"
                );
                let inner = Arc::clone(this);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    Self::reconnect(&inner, generation);
                });
            }
            Reconnect::Exhausted => {
                error!(
                    url = %this.url,
                    max_attempts = this.policy.max_attempts,
                    "transport: reconnect attempts exhausted"
                );
            }
        }
    }
}
