//! In-memory remote store for tests.
//!
//! Supports scripted failures, an online/offline switch, remote pushes,
//! operation-id deduplication, and capture of every adapter call so
//! tests can assert exactly-once delivery.

use crate::error::{RemoteError, RemoteResult};
use crate::store::{RemoteAck, RemoteSnapshot, RemoteStore, RemoteSubscription};
use async_trait::async_trait;
use harvest_types::{Entity, EntityKey, OperationId, Patch};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// One captured adapter call.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    /// `read(key)`.
    Read { key: EntityKey },
    /// `write(key, op_id, ..)`.
    Write { key: EntityKey, op_id: OperationId },
    /// `apply_patch(key, op_id, patch)`.
    Patch {
        key: EntityKey,
        op_id: OperationId,
        patch: Patch,
    },
    /// `delete(key, op_id)`.
    Delete { key: EntityKey, op_id: OperationId },
}

type Subscribers = Mutex<HashMap<EntityKey, Vec<(u64, mpsc::Sender<RemoteSnapshot>)>>>;

/// A controllable in-memory [`RemoteStore`].
#[derive(Default)]
pub struct MockRemoteStore {
    entities: Mutex<HashMap<EntityKey, Entity>>,
    revisions: Mutex<HashMap<EntityKey, u64>>,
    applied: Mutex<HashMap<OperationId, RemoteAck>>,
    scripted_failures: Mutex<VecDeque<RemoteError>>,
    latency: Mutex<Duration>,
    calls: Mutex<Vec<RemoteCall>>,
    online: AtomicBool,
    subscribers: Arc<Subscribers>,
    next_sub_id: AtomicU64,
}

impl MockRemoteStore {
    /// Creates an empty, online store.
    #[must_use]
    pub fn new() -> Self {
        let store = Self::default();
        store.online.store(true, Ordering::SeqCst);
        store
    }

    // ── Test controls ────────────────────────────────────────────

    /// Seeds an entity without recording a call or notifying anyone.
    pub fn seed(&self, key: EntityKey, entity: Entity) {
        let mut revisions = self.revisions.lock().unwrap();
        let rev = revisions.entry(key.clone()).or_insert(0);
        *rev += 1;
        self.entities.lock().unwrap().insert(key, entity);
    }

    /// Queues an error to be returned by the next mutating call.
    pub fn fail_next(&self, error: RemoteError) {
        self.scripted_failures.lock().unwrap().push_back(error);
    }

    /// Adds a fixed round-trip delay to every adapter call, so tests
    /// can hold a caller inside an in-flight request.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    /// Flips connectivity. Coming back online redelivers the current
    /// snapshot of every subscribed key.
    pub fn set_online(&self, online: bool) {
        let was = self.online.swap(online, Ordering::SeqCst);
        if online && !was {
            let keys: Vec<EntityKey> = self
                .subscribers
                .lock()
                .unwrap()
                .keys()
                .cloned()
                .collect();
            for key in keys {
                self.notify(&key);
            }
        }
    }

    /// Simulates a change made by another client: applies `entity`,
    /// bumps the revision, and notifies subscribers.
    pub fn push(&self, key: EntityKey, entity: Entity) {
        {
            let mut revisions = self.revisions.lock().unwrap();
            *revisions.entry(key.clone()).or_insert(0) += 1;
            self.entities.lock().unwrap().insert(key.clone(), entity);
        }
        if self.online.load(Ordering::SeqCst) {
            self.notify(&key);
        }
    }

    /// Returns every captured adapter call in order.
    #[must_use]
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of keys with at least one live subscription.
    #[must_use]
    pub fn subscribed_key_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap()
            .values()
            .filter(|subs| !subs.is_empty())
            .count()
    }

    /// Current entity value, as another client would read it.
    #[must_use]
    pub fn entity(&self, key: &EntityKey) -> Option<Entity> {
        self.entities.lock().unwrap().get(key).cloned()
    }

    /// Current revision for a key (0 = never written).
    #[must_use]
    pub fn revision(&self, key: &EntityKey) -> u64 {
        self.revisions.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    // ── Internals ────────────────────────────────────────────────

    fn snapshot(&self, key: &EntityKey) -> Option<RemoteSnapshot> {
        let entity = self.entities.lock().unwrap().get(key).cloned()?;
        let revision = self.revision(key);
        Some(RemoteSnapshot {
            key: key.clone(),
            revision,
            entity,
        })
    }

    fn notify(&self, key: &EntityKey) {
        let Some(snapshot) = self.snapshot(key) else {
            return;
        };
        let mut subs = self.subscribers.lock().unwrap();
        if let Some(senders) = subs.get_mut(key) {
            senders.retain(|(_, sender)| sender.try_send(snapshot.clone()).is_ok());
        }
    }

    async fn gate(&self) -> RemoteResult<()> {
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if let Some(error) = self.scripted_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        if !self.online.load(Ordering::SeqCst) {
            return Err(RemoteError::Transient("offline".into()));
        }
        Ok(())
    }

    fn record_ack(&self, key: &EntityKey, op_id: OperationId) -> RemoteAck {
        let revision = {
            let mut revisions = self.revisions.lock().unwrap();
            let rev = revisions.entry(key.clone()).or_insert(0);
            *rev += 1;
            *rev
        };
        let ack = RemoteAck {
            revision,
            entity: self.entities.lock().unwrap().get(key).cloned(),
        };
        self.applied.lock().unwrap().insert(op_id, ack.clone());
        ack
    }

    fn replayed(&self, op_id: OperationId) -> Option<RemoteAck> {
        let ack = self.applied.lock().unwrap().get(&op_id).cloned();
        if ack.is_some() {
            debug!(%op_id, "mock remote: duplicate operation, replaying ack");
        }
        ack
    }
}

#[async_trait]
impl RemoteStore for MockRemoteStore {
    async fn read(&self, key: &EntityKey) -> RemoteResult<Option<RemoteSnapshot>> {
        self.calls
            .lock()
            .unwrap()
            .push(RemoteCall::Read { key: key.clone() });
        self.gate().await?;
        Ok(self.snapshot(key))
    }

    async fn write(
        &self,
        key: &EntityKey,
        op_id: OperationId,
        entity: &Entity,
    ) -> RemoteResult<RemoteAck> {
        self.calls.lock().unwrap().push(RemoteCall::Write {
            key: key.clone(),
            op_id,
        });
        self.gate().await?;
        if let Some(ack) = self.replayed(op_id) {
            return Ok(ack);
        }
        self.entities
            .lock()
            .unwrap()
            .insert(key.clone(), entity.clone());
        let ack = self.record_ack(key, op_id);
        self.notify(key);
        Ok(ack)
    }

    async fn apply_patch(
        &self,
        key: &EntityKey,
        op_id: OperationId,
        patch: &Patch,
    ) -> RemoteResult<RemoteAck> {
        self.calls.lock().unwrap().push(RemoteCall::Patch {
            key: key.clone(),
            op_id,
            patch: patch.clone(),
        });
        self.gate().await?;
        if let Some(ack) = self.replayed(op_id) {
            return Ok(ack);
        }
        {
            let mut entities = self.entities.lock().unwrap();
            let base = entities.get(key).cloned().unwrap_or_default();
            entities.insert(key.clone(), patch.apply(&base));
        }
        let ack = self.record_ack(key, op_id);
        self.notify(key);
        Ok(ack)
    }

    async fn delete(&self, key: &EntityKey, op_id: OperationId) -> RemoteResult<RemoteAck> {
        self.calls.lock().unwrap().push(RemoteCall::Delete {
            key: key.clone(),
            op_id,
        });
        self.gate().await?;
        if let Some(ack) = self.replayed(op_id) {
            return Ok(ack);
        }
        self.entities.lock().unwrap().remove(key);
        Ok(self.record_ack(key, op_id))
    }

    async fn subscribe(
        &self,
        key: &EntityKey,
        sender: mpsc::Sender<RemoteSnapshot>,
    ) -> RemoteResult<RemoteSubscription> {
        let sub_id = self.next_sub_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers
            .lock()
            .unwrap()
            .entry(key.clone())
            .or_default()
            .push((sub_id, sender));

        // Initial delivery of the current value, when online.
        if self.online.load(Ordering::SeqCst) {
            self.notify(key);
        }

        let subscribers = Arc::clone(&self.subscribers);
        let key = key.clone();
        Ok(RemoteSubscription::new(move || {
            let mut subs = subscribers.lock().unwrap();
            if let Some(senders) = subs.get_mut(&key) {
                senders.retain(|(id, _)| *id != sub_id);
                if senders.is_empty() {
                    subs.remove(&key);
                }
            }
        }))
    }
}
