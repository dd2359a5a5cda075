//! The sync orchestrator.
//!
//! Composes the durable cache, remote store adapter, sync queue,
//! listener registry, and connectivity monitor into the engine's public
//! surface: optimistic mutation, read-through fetch, multiplexed
//! subscriptions, and status reporting.
//!
//! All per-key state transitions happen under a per-key async lock, so
//! an acknowledgement, a rollback, and an incoming remote snapshot for
//! the same key never interleave.

use crate::config::SyncConfig;
use crate::connectivity::{ConnectivityEvent, ConnectivityMonitor, ConnectivitySignal};
use crate::error::{SyncError, SyncResult};
use crate::queue::{QueueEvent, SyncQueue};
use crate::registry::{ListenerRegistry, SubscriberCallback};
use crate::resolver::{self, Resolution};
use harvest_cache::DurableCache;
use harvest_remote::{RemoteSnapshot, RemoteStore};
use harvest_types::{
    unix_millis_now, CacheRecord, Entity, EntityKey, HybridTimestamp, OperationId, OperationKind,
    Patch, PendingOperation, WriteSource, UPDATED_AT_FIELD,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

/// Point-in-time view of engine health.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    /// Debounced connectivity state.
    pub online: bool,
    /// Operations queued and awaiting acknowledgement.
    pub pending_operations: usize,
    /// Unix millis of the last acknowledged sync, if any.
    pub last_successful_sync_at: Option<u64>,
    /// Keys with at least one active subscriber.
    pub active_subscriptions: usize,
}

/// Handle for one subscription. Dropping it (or calling
/// [`unsubscribe`]) removes the callback; the last handle for a key
/// also tears down the shared remote subscription.
///
/// [`unsubscribe`]: SubscriptionHandle::unsubscribe
pub struct SubscriptionHandle {
    registry: Arc<ListenerRegistry>,
    key: EntityKey,
    id: u64,
}

impl SubscriptionHandle {
    /// Explicitly tears the subscription down.
    pub fn unsubscribe(self) {}
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.registry.remove(&self.key, self.id);
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("key", &self.key)
            .field("id", &self.id)
            .finish()
    }
}

type Waiter = oneshot::Sender<SyncResult<Option<Entity>>>;

/// The engine. One instance per local store; cheap to share via `Arc`.
pub struct SyncOrchestrator {
    cache: Arc<DurableCache>,
    remote: Arc<dyn RemoteStore>,
    queue: Arc<SyncQueue>,
    registry: Arc<ListenerRegistry>,
    connectivity: Arc<ConnectivityMonitor>,
    config: SyncConfig,
    key_locks: Mutex<HashMap<EntityKey, Arc<tokio::sync::Mutex<()>>>>,
    waiters: Mutex<HashMap<OperationId, Waiter>>,
    clock: Mutex<HybridTimestamp>,
    /// Unix millis of the last acknowledged operation (0 = never).
    last_sync_at: AtomicU64,
    snapshot_tx: mpsc::Sender<RemoteSnapshot>,
}

impl SyncOrchestrator {
    /// Builds the engine and starts its background event loops.
    ///
    /// Any operations persisted by a previous process are rehydrated
    /// and, if online, dispatched immediately.
    pub fn new(
        cache: Arc<DurableCache>,
        remote: Arc<dyn RemoteStore>,
        config: SyncConfig,
    ) -> SyncResult<Arc<Self>> {
        let connectivity = ConnectivityMonitor::new(config.debounce_window);
        let (queue_tx, mut queue_rx) = mpsc::channel(64);
        let (snapshot_tx, mut snapshot_rx) = mpsc::channel(64);

        let queue = Arc::new(SyncQueue::new(
            Arc::clone(&cache),
            Arc::clone(&remote),
            Arc::clone(&connectivity),
            config.clone(),
            queue_tx,
        )?);

        let orchestrator = Arc::new(Self {
            cache,
            remote,
            queue,
            registry: Arc::new(ListenerRegistry::new()),
            connectivity,
            config,
            key_locks: Mutex::new(HashMap::new()),
            waiters: Mutex::new(HashMap::new()),
            clock: Mutex::new(HybridTimestamp::now()),
            last_sync_at: AtomicU64::new(0),
            snapshot_tx,
        });

        let this = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            while let Some(event) = queue_rx.recv().await {
                match event {
                    QueueEvent::Acked {
                        op,
                        revision,
                        entity,
                    } => this.handle_ack(op, revision, entity).await,
                    QueueEvent::Failed { op, error } => this.handle_failure(op, error).await,
                }
            }
        });

        let this = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            while let Some(snapshot) = snapshot_rx.recv().await {
                this.handle_snapshot(snapshot).await;
            }
        });

        let this = Arc::clone(&orchestrator);
        let mut events = orchestrator.connectivity.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ConnectivityEvent::Online | ConnectivityEvent::Resumed) => {
                        this.on_reconnect().await;
                    }
                    Ok(ConnectivityEvent::Offline) => debug!("connectivity lost"),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        if orchestrator.queue.pending_count() > 0 {
            orchestrator.spawn_drain();
        }

        Ok(orchestrator)
    }

    // ── Public surface ───────────────────────────────────────────

    /// Returns the cached value for `key` without touching the network.
    ///
    /// A corrupt record is treated as absent; if online, a background
    /// read-through reseeds it.
    pub fn get_snapshot(self: &Arc<Self>, key: &EntityKey) -> Option<Entity> {
        match self.cache.get(key) {
            Ok(Some(record)) => Some(record.data),
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "cache read failed, treating key as absent");
                if self.connectivity.is_online() {
                    let this = Arc::clone(self);
                    let key = key.clone();
                    tokio::spawn(async move {
                        if let Err(e) = this.fetch(&key).await {
                            debug!(key = %key, error = %e, "background reseed failed");
                        }
                    });
                }
                None
            }
        }
    }

    /// Reads through to the remote store and refreshes the cache.
    ///
    /// Returns the merged value (remote snapshot plus any still-queued
    /// local operations), or `None` if the key does not exist remotely.
    pub async fn fetch(&self, key: &EntityKey) -> SyncResult<Option<Entity>> {
        let Some(snapshot) = self.remote.read(key).await? else {
            return Ok(None);
        };

        let lock = self.key_lock(key);
        let _guard = lock.lock().await;
        let current = self.record_tolerant(key);
        let pending = self.queue.pending_for(key);

        match resolver::resolve(current.as_ref(), &snapshot, &pending) {
            Resolution::Store(mut record) => {
                if record.source == WriteSource::Remote {
                    record.source = WriteSource::Seed;
                }
                let data = record.data.clone();
                self.cache.put(&record)?;
                self.registry.notify(key, Some(&data));
                Ok(Some(data))
            }
            Resolution::StaleEcho => Ok(current.map(|c| c.data)),
            Resolution::SuppressedByDelete => Ok(None),
        }
    }

    /// Subscribes to changes for `key`.
    ///
    /// The callback fires immediately with the current cached value
    /// (which may be `None`), then on every accepted local or remote
    /// write. All subscribers for a key share one remote subscription.
    pub async fn subscribe(
        self: &Arc<Self>,
        key: &EntityKey,
        callback: impl Fn(&EntityKey, Option<&Entity>) + Send + Sync + 'static,
    ) -> SyncResult<SubscriptionHandle> {
        let callback: SubscriberCallback = Arc::new(callback);
        let cached = self.record_tolerant(key).map(|r| r.data);
        callback(key, cached.as_ref());

        let (id, is_first) = self.registry.add(key, callback);
        // Watched keys do not expire underneath their subscribers.
        if let Err(e) = self.cache.touch(key) {
            debug!(key = %key, error = %e, "touch failed");
        }

        if is_first {
            match self.remote.subscribe(key, self.snapshot_tx.clone()).await {
                Ok(subscription) => self.registry.attach_remote(key, subscription),
                Err(e) if e.is_transient() => {
                    // Offline: reconnect handling re-establishes it.
                    warn!(key = %key, error = %e, "remote subscription deferred until reconnect");
                }
                Err(e) => {
                    self.registry.remove(key, id);
                    return Err(e.into());
                }
            }
        }

        Ok(SubscriptionHandle {
            registry: Arc::clone(&self.registry),
            key: key.clone(),
            id,
        })
    }

    /// Applies a patch optimistically and queues it for the remote
    /// store.
    ///
    /// The cache and subscribers see the new value before any network
    /// I/O. The returned future resolves with the confirmed entity once
    /// the remote store acknowledges, or with the error that rolled the
    /// write back.
    pub async fn mutate(self: &Arc<Self>, key: &EntityKey, patch: Patch) -> SyncResult<Entity> {
        let (rx, optimistic) = {
            let lock = self.key_lock(key);
            let _guard = lock.lock().await;

            let current = self.record_tolerant(key);
            let base = current
                .as_ref()
                .map(|r| r.data.clone())
                .unwrap_or_default();

            let projected = patch.apply(&base);
            for field in &self.config.non_negative_fields {
                let touched =
                    patch.fields.contains_key(field) || patch.deltas.contains_key(field);
                if touched && projected.counter(field).is_some_and(|v| v < 0) {
                    return Err(SyncError::Validation {
                        reason: format!("counter `{field}` would go negative"),
                    });
                }
            }

            let ts = self.next_updated_at(base.updated_at());
            // Folding the timestamp into the patch keeps it attached to
            // the operation through retries and snapshot re-merges.
            let patch = patch.set(UPDATED_AT_FIELD, ts);
            let optimistic = patch.apply(&base);

            let kind = if current.is_some() {
                OperationKind::Patch
            } else {
                OperationKind::Create
            };
            let version = current.as_ref().map(|c| c.version + 1).unwrap_or(1);
            let record =
                CacheRecord::new(key.clone(), optimistic.clone(), version, WriteSource::Local)
                    .with_remote_revision(
                        current.as_ref().map(|c| c.remote_revision).unwrap_or(0),
                    )
                    .with_confirmed(current.and_then(|c| c.confirmed));
            self.cache.put(&record)?;
            self.registry.notify(key, Some(&optimistic));

            let op = PendingOperation::new(key.clone(), kind, patch);
            let op_id = op.id;
            let (tx, rx) = oneshot::channel();
            self.waiters.lock().unwrap().insert(op_id, tx);
            if let Err(e) = self.queue.enqueue(op) {
                self.waiters.lock().unwrap().remove(&op_id);
                return Err(e);
            }
            (rx, optimistic)
        };

        self.spawn_drain();
        match rx.await {
            Ok(result) => result.map(|entity| entity.unwrap_or(optimistic)),
            Err(_) => Err(SyncError::ChannelClosed),
        }
    }

    /// Deletes `key` locally and queues the delete for the remote
    /// store. Resolves once the remote store acknowledges.
    pub async fn remove(self: &Arc<Self>, key: &EntityKey) -> SyncResult<()> {
        let rx = {
            let lock = self.key_lock(key);
            let _guard = lock.lock().await;

            self.cache.delete(key)?;
            self.registry.notify(key, None);

            let op = PendingOperation::new(key.clone(), OperationKind::Delete, Patch::new());
            let op_id = op.id;
            let (tx, rx) = oneshot::channel();
            self.waiters.lock().unwrap().insert(op_id, tx);
            if let Err(e) = self.queue.enqueue(op) {
                self.waiters.lock().unwrap().remove(&op_id);
                return Err(e);
            }
            rx
        };

        self.spawn_drain();
        match rx.await {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(SyncError::ChannelClosed),
        }
    }

    /// Feeds a platform connectivity signal into the engine.
    pub fn report_connectivity(&self, signal: ConnectivitySignal) {
        self.connectivity.report(signal);
    }

    /// Current engine health.
    #[must_use]
    pub fn sync_status(&self) -> SyncStatus {
        let last = self.last_sync_at.load(Ordering::SeqCst);
        SyncStatus {
            online: self.connectivity.is_online(),
            pending_operations: self.queue.pending_count(),
            last_successful_sync_at: (last > 0).then_some(last),
            active_subscriptions: self.registry.active_key_count(),
        }
    }

    /// Drops all local state: cache, queue, subscribers, and unsettled
    /// mutation futures (which resolve with [`SyncError::ChannelClosed`]).
    pub fn reset(&self) -> SyncResult<()> {
        self.queue.clear();
        self.cache.clear()?;
        self.registry.clear();
        self.waiters.lock().unwrap().clear();
        self.key_locks.lock().unwrap().clear();
        Ok(())
    }

    // ── Event handling ───────────────────────────────────────────

    async fn handle_ack(&self, op: PendingOperation, revision: u64, entity: Option<Entity>) {
        let lock = self.key_lock(&op.key);
        let _guard = lock.lock().await;

        debug!(op = %op.id, key = %op.key, revision, "acknowledged");
        let result = match op.kind {
            // The record was removed optimistically; nothing to update.
            OperationKind::Delete => Ok(None),
            _ => self.reconcile_ack(&op, revision, entity),
        };

        self.last_sync_at.store(unix_millis_now(), Ordering::SeqCst);
        self.settle(op.id, result);
    }

    /// Folds an acknowledged write back into the cache.
    ///
    /// The ack's post-apply entity is authoritative for this operation.
    /// If a newer snapshot already landed (`revision` behind the
    /// watermark), that snapshot's raw remote value already contains
    /// this operation and serves as the base instead. Either way the
    /// base plus the still-queued operations is the correct local
    /// value, which also squeezes out any transient double-count from a
    /// snapshot that raced the ack.
    fn reconcile_ack(
        &self,
        op: &PendingOperation,
        revision: u64,
        entity: Option<Entity>,
    ) -> SyncResult<Option<Entity>> {
        let Some(current) = self.record_tolerant(&op.key) else {
            return Ok(entity);
        };
        let remaining = self.queue.pending_for(&op.key);

        let base = if revision >= current.remote_revision {
            entity.unwrap_or_else(|| current.data.clone())
        } else {
            current
                .confirmed
                .clone()
                .unwrap_or_else(|| current.data.clone())
        };

        let mut data = base.clone();
        for queued in &remaining {
            data = queued.patch.apply(&data);
        }
        if let Some(ts) = current.data.updated_at() {
            if data.updated_at().unwrap_or(0) < ts {
                data.set_updated_at(ts);
            }
        }

        let source = if remaining.is_empty() {
            WriteSource::Remote
        } else {
            WriteSource::Local
        };
        let record = CacheRecord::new(op.key.clone(), data.clone(), current.version + 1, source)
            .with_remote_revision(current.remote_revision.max(revision))
            .with_confirmed(Some(base));
        self.cache.put(&record)?;
        self.registry.notify(&op.key, Some(&data));
        Ok(Some(data))
    }

    async fn handle_failure(self: &Arc<Self>, op: PendingOperation, error: SyncError) {
        let lock = self.key_lock(&op.key);
        let _guard = lock.lock().await;

        warn!(op = %op.id, key = %op.key, error = %error, "operation failed, rolling back");
        let remaining = self.queue.pending_for(&op.key);

        if let Some(current) = self.record_tolerant(&op.key) {
            self.roll_back(&op.key, &current, &remaining);
        } else if op.kind == OperationKind::Delete && self.connectivity.is_online() {
            // The local copy is gone and the remote refused the delete;
            // reseed so the key reappears.
            let this = Arc::clone(self);
            let key = op.key.clone();
            tokio::spawn(async move {
                if let Err(e) = this.fetch(&key).await {
                    debug!(key = %key, error = %e, "reseed after failed delete failed");
                }
            });
        }

        self.settle(op.id, Err(error));
    }

    /// Rebuilds the record from the last remote-confirmed baseline plus
    /// whatever operations are still queued.
    fn roll_back(&self, key: &EntityKey, current: &CacheRecord, remaining: &[PendingOperation]) {
        match current.confirmed.clone() {
            Some(baseline) => {
                let mut data = baseline.clone();
                for queued in remaining {
                    data = queued.patch.apply(&data);
                }
                let source = if remaining.is_empty() {
                    WriteSource::Remote
                } else {
                    WriteSource::Local
                };
                let record =
                    CacheRecord::new(key.clone(), data.clone(), current.version + 1, source)
                        .with_remote_revision(current.remote_revision)
                        .with_confirmed(Some(baseline));
                match self.cache.put(&record) {
                    Ok(_) => self.registry.notify(key, Some(&data)),
                    Err(e) => warn!(key = %key, error = %e, "rollback write failed"),
                }
            }
            // Never remotely confirmed: the key only ever existed
            // optimistically.
            None if remaining.is_empty() => {
                if let Err(e) = self.cache.delete(key) {
                    warn!(key = %key, error = %e, "rollback delete failed");
                }
                self.registry.notify(key, None);
            }
            None => {
                let mut data = Entity::default();
                for queued in remaining {
                    data = queued.patch.apply(&data);
                }
                let record = CacheRecord::new(
                    key.clone(),
                    data.clone(),
                    current.version + 1,
                    WriteSource::Local,
                );
                match self.cache.put(&record) {
                    Ok(_) => self.registry.notify(key, Some(&data)),
                    Err(e) => warn!(key = %key, error = %e, "rollback write failed"),
                }
            }
        }
    }

    async fn handle_snapshot(&self, snapshot: RemoteSnapshot) {
        if !self.registry.is_active(&snapshot.key) {
            debug!(key = %snapshot.key, "snapshot for unwatched key dropped");
            return;
        }

        let lock = self.key_lock(&snapshot.key);
        let _guard = lock.lock().await;
        let current = self.record_tolerant(&snapshot.key);
        let pending = self.queue.pending_for(&snapshot.key);

        match resolver::resolve(current.as_ref(), &snapshot, &pending) {
            Resolution::Store(record) => {
                let data = record.data.clone();
                match self.cache.put(&record) {
                    Ok(true) => self.registry.notify(&snapshot.key, Some(&data)),
                    Ok(false) => {}
                    Err(e) => warn!(key = %snapshot.key, error = %e, "snapshot write failed"),
                }
            }
            Resolution::StaleEcho => {
                debug!(key = %snapshot.key, revision = snapshot.revision, "stale echo dropped");
            }
            Resolution::SuppressedByDelete => {
                debug!(key = %snapshot.key, "snapshot suppressed by queued delete");
            }
        }
    }

    async fn on_reconnect(self: &Arc<Self>) {
        debug!("connectivity restored, draining queue and refreshing subscriptions");
        self.spawn_drain();
        for key in self.registry.active_keys() {
            if let Err(e) = self.cache.touch(&key) {
                debug!(key = %key, error = %e, "touch failed");
            }
            match self.remote.subscribe(&key, self.snapshot_tx.clone()).await {
                Ok(subscription) => self.registry.attach_remote(&key, subscription),
                Err(e) => warn!(key = %key, error = %e, "resubscribe failed"),
            }
        }
    }

    // ── Internals ────────────────────────────────────────────────

    fn key_lock(&self, key: &EntityKey) -> Arc<tokio::sync::Mutex<()>> {
        self.key_locks
            .lock()
            .unwrap()
            .entry(key.clone())
            .or_default()
            .clone()
    }

    /// Reads the current record, treating corruption as absence.
    fn record_tolerant(&self, key: &EntityKey) -> Option<CacheRecord> {
        match self.cache.get(key) {
            Ok(record) => record,
            Err(e) => {
                warn!(key = %key, error = %e, "cache read failed, treating key as absent");
                None
            }
        }
    }

    /// Next `updatedAt` value, greater than or equal to both the local
    /// clock and the previously observed timestamp.
    fn next_updated_at(&self, observed: Option<u64>) -> u64 {
        let mut clock = self.clock.lock().unwrap();
        let observed = HybridTimestamp::from_millis(observed.unwrap_or(0));
        *clock = clock.receive(&observed);
        clock.wall_time()
    }

    fn settle(&self, op_id: OperationId, result: SyncResult<Option<Entity>>) {
        if let Some(waiter) = self.waiters.lock().unwrap().remove(&op_id) {
            let _ = waiter.send(result);
        }
    }

    fn spawn_drain(&self) {
        let queue = Arc::clone(&self.queue);
        tokio::spawn(async move {
            queue.drain().await;
        });
    }
}
