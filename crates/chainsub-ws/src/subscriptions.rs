//! WebSocket subscription bookkeeping.
//!
//! Maps the ids returned by `eth_subscribe` to typed item channels and a
//! one-shot error signal. Entries live only as long as the connection that
//! created them; there is no re-subscription after a reconnect, the
//! subscriber loops open fresh subscriptions on a fresh connection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use chainsub_core::TransportError;

/// A unique subscription ID returned by `eth_subscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub String);

impl From<String> for SubscriptionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Decodes a notification payload and pushes it to the subscriber.
/// Returns `false` once the receiving side is gone.
type Forward = Box<dyn Fn(Value) -> bool + Send>;

/// Everything the connection task needs to serve one subscription.
pub struct SubscriptionEntry {
    /// The subscription type (e.g. `"newHeads"`, `"logs"`).
    kind: &'static str,
    forward: Forward,
    error: Option<oneshot::Sender<TransportError>>,
}

impl SubscriptionEntry {
    /// Build an entry plus the receiving halves handed to the caller.
    ///
    /// Payloads that `decode` rejects are logged and dropped without
    /// affecting the subscription.
    pub fn new<T, F>(
        kind: &'static str,
        decode: F,
    ) -> (Self, mpsc::UnboundedReceiver<T>, oneshot::Receiver<TransportError>)
    where
        T: Send + 'static,
        F: Fn(&Value) -> Option<T> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let (err_tx, err_rx) = oneshot::channel();
        let forward: Forward = Box::new(move |payload| match decode(&payload) {
            Some(item) => tx.send(item).is_ok(),
            None => {
                tracing::warn!(kind, payload = %payload, "dropping malformed notification");
                !tx.is_closed()
            }
        });
        let entry = Self {
            kind,
            forward,
            error: Some(err_tx),
        };
        (entry, rx, err_rx)
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    fn fail(mut self, err: TransportError) {
        if let Some(tx) = self.error.take() {
            let _ = tx.send(err);
        }
    }
}

/// Active subscriptions on one connection.
#[derive(Clone, Default)]
pub struct SubscriptionManager {
    entries: Arc<Mutex<HashMap<SubscriptionId, SubscriptionEntry>>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriptionId, SubscriptionEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start routing notifications for `id` to `entry`.
    pub fn insert(&self, id: SubscriptionId, entry: SubscriptionEntry) {
        self.lock().insert(id, entry);
    }

    /// Forward a notification. Returns `false` if `id` is unknown.
    ///
    /// An entry whose receiver has been dropped is removed.
    pub fn dispatch(&self, id: &SubscriptionId, payload: Value) -> bool {
        let mut entries = self.lock();
        let Some(entry) = entries.get(id) else {
            return false;
        };
        if !(entry.forward)(payload) {
            tracing::debug!(%id, kind = entry.kind, "receiver dropped, forgetting subscription");
            entries.remove(id);
        }
        true
    }

    /// Forget a subscription without signalling it. Returns `true` if it was
    /// still registered.
    pub fn remove(&self, id: &SubscriptionId) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Fire every error signal once and forget every subscription.
    pub fn fail_all(&self, err: &TransportError) {
        let drained: Vec<_> = self.lock().drain().collect();
        for (id, entry) in drained {
            tracing::debug!(%id, kind = entry.kind, "failing subscription");
            entry.fail(err.clone());
        }
    }

    /// Forget every subscription silently.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of active subscriptions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if there are no active subscriptions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
