//! Process-wide pool of transports keyed by address.
//!
//! The registry is an ordinary value owned by the process root and passed
//! by reference to whoever needs a connection. Entries are created on first
//! use and live as long as the registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::config::ReconnectPolicy;
use crate::transport::client::Transport;
use crate::transport::connector::Connector;

/// Address -> [`Transport`] map guaranteeing one transport per address.
pub struct TransportRegistry {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    transports: Mutex<HashMap<String, Transport>>,
}

impl TransportRegistry {
    /// Create an empty registry whose transports dial through `connector`.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, policy: ReconnectPolicy) -> Self {
        Self {
            connector,
            policy,
            transports: Mutex::new(HashMap::new()),
        }
    }

    /// Return the transport for `url`, creating it on first use.
    ///
    /// The returned transport is not connected by this call.
    #[must_use]
    pub fn get(&self, url: &str) -> Transport {
        let mut transports = self
            .transports
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        transports
            .entry(url.to_owned())
            .or_insert_with(|| {
                debug!(url, "transport registry: creating transport");
                Transport::new(url, Arc::clone(&self.connector), self.policy)
            })
            .clone()
    }

    /// Number of addresses with a transport.
    #[must_use]
    pub fn len(&self) -> usize {
        self.transports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// `true` when no transport has been created yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportRegistry")
            .field("policy", &self.policy)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
