//! Named event bus for tool events.
//!
//! Event names are arbitrary strings: an operation name for inbound
//! `tool_call`s and `<operation>_result` for results. Each name owns its own
//! [`Listeners`] list, so emitting one name never touches another's list.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::listeners::{Handler, Listeners};

/// Suffix appended to an operation name for its result event.
pub const RESULT_SUFFIX: &str = "_result";

/// Name of the result event for `tool_func`.
#[must_use]
pub fn result_event_name(tool_func: &str) -> String {
    format!("{tool_func}{RESULT_SUFFIX}")
}

/// String-keyed collection of listener lists carrying JSON details.
#[derive(Default)]
pub struct EventBus {
    named: Mutex<HashMap<String, Arc<Listeners<Value>>>>,
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handler` to `name`.
    pub fn subscribe(&self, name: &str, handler: Handler<Value>) {
        let listeners = Arc::clone(self.lock().entry(name.to_owned()).or_default());
        listeners.add(handler);
    }

    /// Remove `handler` from `name`.
    pub fn unsubscribe(&self, name: &str, handler: &Handler<Value>) -> bool {
        let listeners = self.lock().get(name).cloned();
        listeners.is_some_and(|listeners| listeners.remove(handler))
    }

    /// Deliver `detail` to every subscriber of `name`.
    ///
    /// Returns the number of callbacks that ran to completion.
    pub fn emit(&self, name: &str, detail: &Value) -> usize {
        let listeners = self.lock().get(name).cloned();
        listeners.map_or(0, |listeners| listeners.emit(detail))
    }

    /// Number of subscribers of `name`.
    #[must_use]
    pub fn subscriber_count(&self, name: &str) -> usize {
        self.lock().get(name).map_or(0, |listeners| listeners.len())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Listeners<Value>>>> {
        self.named.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("names", &self.lock().len())
            .finish()
    }
}
