//! Ordered callback lists with identity-based removal.
//!
//! Both the transport subscriber sets and the correlator's named events
//! are built on [`Listeners`]. Delivery iterates over a snapshot taken
//! before the first callback runs, so a callback may register or remove
//! listeners (including itself) without disturbing the current round.
//! A panicking callback is logged and skipped; the remaining callbacks
//! still run.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::error;

/// Shared callback handle. Keep a clone to remove it later.
pub type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Ordered list of callbacks receiving `&T`.
pub struct Listeners<T> {
    entries: Mutex<Vec<Handler<T>>>,
}

impl<T> Listeners<T> {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Append `handler` to the end of the list.
    ///
    /// The same handler may be added more than once; it is then called once
    /// per registration.
    pub fn add(&self, handler: Handler<T>) {
        self.lock().push(handler);
    }

    /// Remove the first registration of `handler`.
    ///
    /// Returns `false` when the handler was not registered.
    pub fn remove(&self, handler: &Handler<T>) -> bool {
        let mut entries = self.lock();
        match entries.iter().position(|h| Arc::ptr_eq(h, handler)) {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Invoke every registered callback, in registration order.
    ///
    /// Returns the number of callbacks that completed without panicking.
    pub fn emit(&self, value: &T) -> usize {
        let snapshot: Vec<Handler<T>> = self.lock().clone();
        let mut delivered = 0;
        for handler in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(value))) {
                Ok(()) => delivered += 1,
                Err(_) => error!("listener callback panicked; continuing delivery"),
            }
        }
        delivered
    }

    /// Number of registered callbacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// `true` when no callback is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Handler<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Listeners<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("len", &self.len())
            .finish()
    }
}
