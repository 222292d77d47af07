//! Request/response correlation on top of a [`Transport`].
//!
//! The [`Correlator`] decodes every inbound frame into an envelope and
//! routes it by type:
//!
//! | Envelope       | Effect                                                        |
//! |----------------|---------------------------------------------------------------|
//! | `ai_message`   | `ai` log line                                                 |
//! | `tool_call`    | `<op>` event, then a local execution answered with `tool_result` |
//! | `tool_result`  | `<op>_result` event and resolution of the pending future      |
//! | `end`          | `ai` log line                                                 |
//! | `{error}`      | `error` log line                                              |
//! | malformed      | `error` log line, frame discarded                             |
//!
//! Event listeners and pending futures are independent consumers of the
//! same envelope; neither one prevents the other from seeing it.
//!
//! Submodules:
//! - `events`: named listener lists.
//! - `executor`: the [`ToolExecutor`] seam producing answers to peer tool calls.
//! - `pending`: outstanding invocations keyed by `(tool_func, thread_id)`.

pub mod events;
pub mod executor;
pub mod pending;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::listeners::{Handler, Listeners};
use crate::models::envelope::{
    self, display_value, is_truthy, parse_inbound_frame, CorrelationKey, Inbound, ToolCall,
    ToolResult,
};
use crate::models::log::{LogEntry, Severity};
use crate::transport::{EventKind, Reconnect, Transport, TransportEvent, TransportRegistry};
use crate::{AppError, Result};

pub use events::{result_event_name, EventBus};
pub use executor::{SimulatedExecutor, ToolExecutor};
pub use pending::{PendingRequests, Ticket, ToolReply};

/// Duplex correlation client bound to one transport.
///
/// Cloning is cheap; clones share thread identity, pending requests and
/// subscribers.
#[derive(Clone)]
pub struct Correlator {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Transport,
    thread_prefix: String,
    thread_id: Mutex<Option<String>>,
    pending: PendingRequests,
    events: EventBus,
    logs: Listeners<LogEntry>,
    executor: Arc<dyn ToolExecutor>,
    subscriptions: Mutex<Vec<(EventKind, Handler<TransportEvent>)>>,
}

impl Correlator {
    /// Bind a correlator to `transport` and start connecting.
    ///
    /// Generated thread ids are `thread_prefix` followed by the current Unix
    /// time in milliseconds. Must be called from within a Tokio runtime.
    #[must_use]
    pub fn attach(
        transport: Transport,
        thread_prefix: impl Into<String>,
        executor: Arc<dyn ToolExecutor>,
    ) -> Self {
        let inner = Arc::new(Inner {
            transport,
            thread_prefix: thread_prefix.into(),
            thread_id: Mutex::new(None),
            pending: PendingRequests::new(),
            events: EventBus::new(),
            logs: Listeners::new(),
            executor,
            subscriptions: Mutex::new(Vec::new()),
        });
        Inner::install(&inner);
        inner.transport.connect();
        Self { inner }
    }

    /// Bind a correlator to the registry's transport for `config.url`, with
    /// the simulated executor answering peer tool calls.
    #[must_use]
    pub fn from_config(registry: &TransportRegistry, config: &ClientConfig) -> Self {
        Self::attach(
            registry.get(&config.url),
            config.thread_prefix.clone(),
            Arc::new(SimulatedExecutor::new(config.reply_delay())),
        )
    }

    /// Transport this correlator sends through.
    #[must_use]
    pub fn transport(&self) -> &Transport {
        &self.inner.transport
    }

    /// Session thread id, once established.
    #[must_use]
    pub fn thread_id(&self) -> Option<String> {
        self.inner.lock_thread_id().clone()
    }

    /// Send a plain user message `{input, thread_id}`.
    ///
    /// Empty input (`null`, `""`, `false`, `0`) is ignored. Otherwise the
    /// session thread id becomes the first non-empty of: `thread_id`, the
    /// current session id, a freshly generated id.
    pub fn send_message(&self, input: impl Into<Value>, thread_id: Option<&str>) {
        let input = input.into();
        if !is_truthy(&input) {
            debug!("correlator: empty user input ignored");
            return;
        }
        let thread_id = self.inner.establish_thread_id(thread_id);
        self.inner
            .transport
            .send(envelope::user_message(&input, &thread_id));
    }

    /// Invoke `tool_func` and get a future for its result.
    ///
    /// The thread id is taken from `payload["thread_id"]`, falling back to
    /// the session id and then to a fresh id (which does not become the
    /// session id). A second invocation with the same `(tool_func,
    /// thread_id)` before the first is answered replaces the first, whose
    /// future then never resolves.
    pub fn invoke_with_future(&self, tool_func: &str, payload: &Map<String, Value>) -> ToolReply {
        let (_key, _ticket, reply) = self.inner.register_and_send(tool_func, payload);
        reply
    }

    /// Like [`invoke_with_future`](Self::invoke_with_future), but gives up
    /// after `deadline`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Timeout`] when no result arrives in time. The
    /// pending record is removed unless a newer invocation replaced it.
    pub async fn invoke_with_deadline(
        &self,
        tool_func: &str,
        payload: &Map<String, Value>,
        deadline: Duration,
    ) -> Result<Value> {
        let (key, ticket, reply) = self.inner.register_and_send(tool_func, payload);
        if let Ok(result) = tokio::time::timeout(deadline, reply).await {
            Ok(result)
        } else {
            self.inner.pending.expire(&key, ticket);
            Err(AppError::Timeout(format!(
                "no result for {key} within {} ms",
                deadline.as_millis()
            )))
        }
    }

    /// Invoke `tool_func` without a pending record.
    ///
    /// The result is only observable as the `<tool_func>_result` event.
    /// Returns the thread id the call was sent under.
    pub fn invoke(&self, tool_func: &str, payload: &Map<String, Value>) -> String {
        let thread_id = self.inner.thread_id_for(payload);
        self.inner
            .transport
            .send(envelope::tool_call(tool_func, &thread_id, payload));
        thread_id
    }

    /// Subscribe to a named event (`<op>` or `<op>_result`, or any custom name).
    pub fn register_tool_event(&self, name: &str, handler: Handler<Value>) {
        self.inner.events.subscribe(name, handler);
    }

    /// Remove a subscription made with [`register_tool_event`](Self::register_tool_event).
    pub fn remove_tool_event(&self, name: &str, handler: &Handler<Value>) -> bool {
        self.inner.events.unsubscribe(name, handler)
    }

    /// Emit a named event to local subscribers.
    pub fn trigger_tool_event(&self, name: &str, detail: &Value) -> usize {
        self.inner.events.emit(name, detail)
    }

    /// Subscribe to the `log` stream.
    pub fn on_log(&self, handler: Handler<LogEntry>) {
        self.inner.logs.add(handler);
    }

    /// Remove a subscription made with [`on_log`](Self::on_log).
    pub fn remove_log_handler(&self, handler: &Handler<LogEntry>) -> bool {
        self.inner.logs.remove(handler)
    }

    /// Append a line to the `log` stream.
    pub fn emit_log(&self, message: impl Into<String>, severity: Severity) {
        self.inner.log(message, severity);
    }

    /// Whether a future is outstanding for `key`.
    #[must_use]
    pub fn is_pending(&self, key: &CorrelationKey) -> bool {
        self.inner.pending.contains(key)
    }

    /// Number of outstanding futures.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("transport", &self.inner.transport)
            .field("thread_id", &self.thread_id())
            .field("pending", &self.inner.pending)
            .finish_non_exhaustive()
    }
}

// ── Dispatch ──────────────────────────────────────────────────────────────────

impl Inner {
    /// Subscribe to the transport through weak references, so the transport
    /// (which may outlive us in a registry) does not keep us alive.
    fn install(this: &Arc<Self>) {
        let kinds = [
            EventKind::Open,
            EventKind::Close,
            EventKind::Error,
            EventKind::Message,
        ];
        let mut installed = Vec::with_capacity(kinds.len());
        for kind in kinds {
            let weak: Weak<Self> = Arc::downgrade(this);
            let handler: Handler<TransportEvent> = Arc::new(move |event: &TransportEvent| {
                if let Some(inner) = weak.upgrade() {
                    Self::on_transport_event(&inner, event);
                }
            });
            this.transport.on(kind, Arc::clone(&handler));
            installed.push((kind, handler));
        }
        *this.lock_subscriptions() = installed;
    }

    fn on_transport_event(this: &Arc<Self>, event: &TransportEvent) {
        match event {
            TransportEvent::Open => {
                this.log(format!("connected to {}", this.transport.url()), Severity::Info);
            }
            TransportEvent::Close(Reconnect::Scheduled { attempt, delay }) => this.log(
                format!(
                    "disconnected; reconnect attempt {attempt} in {} ms",
                    delay.as_millis()
                ),
                Severity::Error,
            ),
            TransportEvent::Close(Reconnect::Exhausted) => this.log(
                "disconnected; reconnect attempts exhausted",
                Severity::Error,
            ),
            TransportEvent::Error(message) => {
                this.log(format!("transport error: {message}"), Severity::Error);
            }
            TransportEvent::Message(frame) => Self::dispatch(this, frame),
        }
    }

    fn dispatch(this: &Arc<Self>, frame: &str) {
        let inbound = match parse_inbound_frame(frame) {
            Ok(inbound) => inbound,
            Err(err) => {
                debug!(%err, "correlator: discarding malformed frame");
                this.log(format!("received unparseable frame: {frame}"), Severity::Error);
                return;
            }
        };

        match inbound {
            Inbound::AiMessage { content } => {
                this.log(format!("AI: {}", display_value(&content)), Severity::Ai);
            }
            Inbound::ToolCall(call) => Self::handle_tool_call(this, call),
            Inbound::ToolResult {
                tool_func,
                thread_id,
                result,
            } => {
                debug!(%tool_func, %thread_id, "correlator: tool result received");
                this.events.emit(
                    &result_event_name(&tool_func),
                    &json!({ "result": result, "thread_id": thread_id }),
                );
                this.pending
                    .resolve(&CorrelationKey::new(tool_func, thread_id), result);
            }
            Inbound::End => this.log("conversation turn ended", Severity::Ai),
            Inbound::PeerError(message) => this.log(format!("error: {message}"), Severity::Error),
            Inbound::Unrecognized => debug!("correlator: dropping unrecognized envelope"),
        }
    }

    fn handle_tool_call(this: &Arc<Self>, call: ToolCall) {
        this.log(
            format!("[event] received tool call: {}", call.tool_func),
            Severity::Tool,
        );
        this.events.emit(&call.tool_func, &call.envelope);

        let weak = Arc::downgrade(this);
        let executor = Arc::clone(&this.executor);
        tokio::spawn(async move {
            let result = executor.execute(&call).await;
            match weak.upgrade() {
                Some(inner) => inner.complete_tool_call(&call, &result),
                None => debug!(
                    tool_func = %call.tool_func,
                    "correlator dropped before tool call completed"
                ),
            }
        });
    }

    /// Answer a peer tool call and surface the answer locally.
    fn complete_tool_call(&self, call: &ToolCall, result: &ToolResult) {
        let result = result.to_value();
        self.transport.send(envelope::tool_result(
            &call.tool_func,
            &call.thread_id,
            &result,
        ));
        self.log(format!("returned tool result: {result}"), Severity::Tool);
        self.events.emit(
            &result_event_name(&call.tool_func),
            &json!({ "result": result, "thread_id": call.thread_id }),
        );
        if self.pending.resolve(&call.key(), result.clone()) {
            self.log(format!("[future] tool call completed: {result}"), Severity::Tool);
        }
    }

    fn register_and_send(
        &self,
        tool_func: &str,
        payload: &Map<String, Value>,
    ) -> (CorrelationKey, Ticket, ToolReply) {
        let thread_id = self.thread_id_for(payload);
        let key = CorrelationKey::new(tool_func, &thread_id);
        let (ticket, reply) = self.pending.register(key.clone());
        self.transport
            .send(envelope::tool_call(tool_func, &thread_id, payload));
        (key, ticket, reply)
    }

    // ── Thread identity ──────────────────────────────────────────────────────

    fn establish_thread_id(&self, supplied: Option<&str>) -> String {
        let mut current = self.lock_thread_id();
        let chosen = match supplied.filter(|id| !id.is_empty()) {
            Some(id) => id.to_owned(),
            None => current
                .clone()
                .unwrap_or_else(|| self.generate_thread_id()),
        };
        *current = Some(chosen.clone());
        chosen
    }

    fn thread_id_for(&self, payload: &Map<String, Value>) -> String {
        payload
            .get("thread_id")
            .filter(|id| is_truthy(id))
            .map(display_value)
            .or_else(|| self.lock_thread_id().clone())
            .unwrap_or_else(|| self.generate_thread_id())
    }

    fn generate_thread_id(&self) -> String {
        format!("{}{}", self.thread_prefix, Utc::now().timestamp_millis())
    }

    // ── Log stream ───────────────────────────────────────────────────────────

    fn log(&self, message: impl Into<String>, severity: Severity) {
        let entry = LogEntry::new(message, severity);
        if severity == Severity::Error {
            warn!(severity = %entry.severity, "{}", entry.message);
        } else {
            info!(severity = %entry.severity, "{}", entry.message);
        }
        self.logs.emit(&entry);
    }

    fn lock_thread_id(&self) -> MutexGuard<'_, Option<String>> {
        self.thread_id.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_subscriptions(&self) -> MutexGuard<'_, Vec<(EventKind, Handler<TransportEvent>)>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let subscriptions = std::mem::take(&mut *self.lock_subscriptions());
        for (kind, handler) in subscriptions {
            self.transport.off(kind, &handler);
        }
    }
}
