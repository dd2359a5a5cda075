//! Subscription multiplexing.
//!
//! Any number of in-process subscribers per key share a single remote
//! subscription. The first subscriber for a key opens the remote side;
//! the last one leaving tears it down by dropping the handle.

use harvest_remote::RemoteSubscription;
use harvest_types::{Entity, EntityKey};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Callback invoked with the latest local value for a key. `None` means
/// the entity was deleted.
pub type SubscriberCallback = Arc<dyn Fn(&EntityKey, Option<&Entity>) + Send + Sync>;

struct KeyListeners {
    callbacks: HashMap<u64, SubscriberCallback>,
    remote: Option<RemoteSubscription>,
}

/// Per-key fan-out of cache updates to registered subscribers.
#[derive(Default)]
pub struct ListenerRegistry {
    inner: Mutex<HashMap<EntityKey, KeyListeners>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback for `key`.
    ///
    /// Returns the subscriber id and whether this is the first
    /// subscriber for the key (meaning the caller should open the
    /// remote subscription).
    pub fn add(&self, key: &EntityKey, callback: SubscriberCallback) -> (u64, bool) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        let listeners = inner.entry(key.clone()).or_insert_with(|| KeyListeners {
            callbacks: HashMap::new(),
            remote: None,
        });
        let is_first = listeners.callbacks.is_empty();
        listeners.callbacks.insert(id, callback);
        (id, is_first)
    }

    /// Removes one subscriber. When the last subscriber for the key
    /// leaves, the shared remote subscription is dropped (cancelling
    /// it) and the key is forgotten.
    pub fn remove(&self, key: &EntityKey, id: u64) {
        let torn_down = {
            let mut inner = self.inner.lock().unwrap();
            let Some(listeners) = inner.get_mut(key) else {
                return;
            };
            listeners.callbacks.remove(&id);
            if listeners.callbacks.is_empty() {
                inner.remove(key);
                true
            } else {
                false
            }
        };
        if torn_down {
            debug!(key = %key, "last subscriber left, remote subscription torn down");
        }
    }

    /// Attaches the shared remote subscription for `key`, replacing
    /// (and thereby cancelling) any previous one. If every subscriber
    /// left while the remote side was being opened, the handle is
    /// dropped immediately.
    pub fn attach_remote(&self, key: &EntityKey, subscription: RemoteSubscription) {
        let mut inner = self.inner.lock().unwrap();
        match inner.get_mut(key) {
            Some(listeners) => {
                if listeners.remote.replace(subscription).is_some() {
                    debug!(key = %key, "replaced remote subscription");
                }
            }
            None => debug!(key = %key, "subscribers gone before remote attach, cancelling"),
        }
    }

    /// Invokes every callback registered for `key` with `entity`.
    ///
    /// Callbacks run outside the registry lock, so a callback may
    /// subscribe or unsubscribe without deadlocking.
    pub fn notify(&self, key: &EntityKey, entity: Option<&Entity>) {
        let callbacks: Vec<SubscriberCallback> = {
            let inner = self.inner.lock().unwrap();
            match inner.get(key) {
                Some(listeners) => listeners.callbacks.values().cloned().collect(),
                None => return,
            }
        };
        for callback in callbacks {
            callback(key, entity);
        }
    }

    /// Whether `key` has at least one subscriber.
    #[must_use]
    pub fn is_active(&self, key: &EntityKey) -> bool {
        self.inner.lock().unwrap().contains_key(key)
    }

    /// Every key with at least one subscriber.
    #[must_use]
    pub fn active_keys(&self) -> Vec<EntityKey> {
        self.inner.lock().unwrap().keys().cloned().collect()
    }

    /// Number of keys with at least one subscriber.
    #[must_use]
    pub fn active_key_count(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// Drops every subscriber and remote subscription.
    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }
}
