//! Pending tool invocations awaiting their result.
//!
//! One record per [`CorrelationKey`]. Registering a key that is already
//! pending replaces the earlier record: the earlier [`ToolReply`] is
//! abandoned and never resolves. Resolution removes the record, so a second
//! result for the same key finds nothing and is ignored.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::models::envelope::CorrelationKey;

/// Identifies one registration, so a deadline only expires its own record.
pub type Ticket = u64;

struct PendingEntry {
    ticket: Ticket,
    reply_tx: oneshot::Sender<Value>,
}

/// Map of outstanding invocations keyed by `(tool_func, thread_id)`.
#[derive(Default)]
pub struct PendingRequests {
    next_ticket: AtomicU64,
    entries: Mutex<HashMap<CorrelationKey, PendingEntry>>,
}

impl PendingRequests {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an invocation for `key`, replacing any earlier one.
    pub fn register(&self, key: CorrelationKey) -> (Ticket, ToolReply) {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        let previous = self
            .lock()
            .insert(key.clone(), PendingEntry { ticket, reply_tx });
        if previous.is_some() {
            debug!(%key, "pending request superseded by a newer invocation");
        }
        (ticket, ToolReply::new(reply_rx))
    }

    /// Resolve and remove the record for `key`.
    ///
    /// Returns `false` when nothing was pending, which is not an error.
    pub fn resolve(&self, key: &CorrelationKey, result: Value) -> bool {
        let Some(entry) = self.lock().remove(key) else {
            debug!(%key, "no pending request for result");
            return false;
        };
        if entry.reply_tx.send(result).is_err() {
            debug!(%key, "pending request receiver already dropped");
        }
        true
    }

    /// Remove the record for `key` only if it is still registration `ticket`.
    pub fn expire(&self, key: &CorrelationKey, ticket: Ticket) -> bool {
        let mut entries = self.lock();
        if entries.get(key).is_some_and(|entry| entry.ticket == ticket) {
            entries.remove(key);
            true
        } else {
            false
        }
    }

    /// `true` when a record for `key` is outstanding.
    #[must_use]
    pub fn contains(&self, key: &CorrelationKey) -> bool {
        self.lock().contains_key(key)
    }

    /// Number of outstanding records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// `true` when nothing is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CorrelationKey, PendingEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for PendingRequests {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequests")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

/// Future resolving with the `result` of a matching `tool_result`.
///
/// If its record is superseded or the correlator goes away first, the
/// future stays pending forever. Wrap it in [`tokio::time::timeout`] or use
/// `Correlator::invoke_with_deadline` to bound the wait.
#[derive(Debug)]
#[must_use = "a ToolReply does nothing unless awaited"]
pub struct ToolReply {
    reply_rx: Option<oneshot::Receiver<Value>>,
}

impl ToolReply {
    fn new(reply_rx: oneshot::Receiver<Value>) -> Self {
        Self {
            reply_rx: Some(reply_rx),
        }
    }
}

impl Future for ToolReply {
    type Output = Value;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(reply_rx) = self.reply_rx.as_mut() else {
            return Poll::Pending;
        };
        match Pin::new(reply_rx).poll(cx) {
            Poll::Ready(Ok(result)) => {
                self.reply_rx = None;
                Poll::Ready(result)
            }
            Poll::Ready(Err(_)) => {
                // Sender dropped without a result: abandoned for good.
                self.reply_rx = None;
                Poll::Pending
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
