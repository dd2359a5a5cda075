//! The durable sync queue.
//!
//! Operations are persisted to the cache at enqueue time and mirrored
//! in memory per key, so the queue survives restarts and preserves
//! per-key FIFO order. `drain` dispatches the head operation of each
//! key, retries transient failures with capped exponential backoff,
//! and reports outcomes to the orchestrator over an event channel.
//!
//! The queue never counts attempts while offline: a drain during an
//! outage is a no-op, so queued work waits for reconnection instead of
//! burning through its retry budget against a dead network.

use crate::config::SyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use harvest_cache::DurableCache;
use harvest_remote::{RemoteAck, RemoteError, RemoteResult, RemoteStore};
use harvest_types::{Entity, EntityKey, OperationId, OperationKind, PendingOperation};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Outcome of one queued operation, reported to the orchestrator.
#[derive(Debug)]
pub enum QueueEvent {
    /// The remote store accepted the operation.
    Acked {
        op: PendingOperation,
        /// Revision the store assigned to the write.
        revision: u64,
        /// Post-apply entity as the store saw it; `None` for deletes.
        entity: Option<Entity>,
    },
    /// The operation was permanently rejected or abandoned after
    /// exhausting its retry budget.
    Failed { op: PendingOperation, error: SyncError },
}

/// Durable, per-key FIFO queue of operations awaiting remote
/// acknowledgement.
pub struct SyncQueue {
    cache: Arc<DurableCache>,
    remote: Arc<dyn RemoteStore>,
    connectivity: Arc<ConnectivityMonitor>,
    config: SyncConfig,
    pending: Mutex<HashMap<EntityKey, VecDeque<PendingOperation>>>,
    /// Earliest instant each backing-off operation may be retried.
    not_before: Mutex<HashMap<OperationId, Instant>>,
    draining: AtomicBool,
    events: mpsc::Sender<QueueEvent>,
}

impl SyncQueue {
    /// Creates a queue, rehydrating any operations persisted by a
    /// previous process in their original order.
    pub fn new(
        cache: Arc<DurableCache>,
        remote: Arc<dyn RemoteStore>,
        connectivity: Arc<ConnectivityMonitor>,
        config: SyncConfig,
        events: mpsc::Sender<QueueEvent>,
    ) -> SyncResult<Self> {
        let mut pending: HashMap<EntityKey, VecDeque<PendingOperation>> = HashMap::new();
        for op in cache.load_ops()? {
            pending.entry(op.key.clone()).or_default().push_back(op);
        }
        let rehydrated: usize = pending.values().map(VecDeque::len).sum();
        if rehydrated > 0 {
            debug!(count = rehydrated, "rehydrated queued operations from cache");
        }
        Ok(Self {
            cache,
            remote,
            connectivity,
            config,
            pending: Mutex::new(pending),
            not_before: Mutex::new(HashMap::new()),
            draining: AtomicBool::new(false),
            events,
        })
    }

    /// Persists and enqueues an operation.
    pub fn enqueue(&self, op: PendingOperation) -> SyncResult<()> {
        self.cache.enqueue_op(&op)?;
        self.pending
            .lock()
            .unwrap()
            .entry(op.key.clone())
            .or_default()
            .push_back(op);
        Ok(())
    }

    /// Operations still queued for `key`, in dispatch order.
    #[must_use]
    pub fn pending_for(&self, key: &EntityKey) -> Vec<PendingOperation> {
        self.pending
            .lock()
            .unwrap()
            .get(key)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether any operation is queued for `key`.
    #[must_use]
    pub fn has_pending(&self, key: &EntityKey) -> bool {
        self.pending.lock().unwrap().contains_key(key)
    }

    /// Total operations queued across all keys.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().values().map(VecDeque::len).sum()
    }

    /// Drops the in-memory mirror. The caller clears the cache.
    pub fn clear(&self) {
        self.pending.lock().unwrap().clear();
        self.not_before.lock().unwrap().clear();
    }

    /// Dispatches queued operations until none are eligible.
    ///
    /// At most one drain runs at a time; a concurrent call returns
    /// immediately. Keys are processed independently, but operations
    /// within a key strictly in order: a key whose head operation is
    /// backing off is skipped, not reordered.
    pub async fn drain(self: &Arc<Self>) {
        loop {
            if !self.connectivity.is_online() {
                debug!("drain skipped: offline");
                return;
            }
            if self.draining.swap(true, Ordering::SeqCst) {
                return;
            }

            'outer: loop {
                let now = Instant::now();
                let heads: Vec<PendingOperation> = {
                    let pending = self.pending.lock().unwrap();
                    let not_before = self.not_before.lock().unwrap();
                    pending
                        .values()
                        .filter_map(VecDeque::front)
                        .filter(|op| not_before.get(&op.id).is_none_or(|at| *at <= now))
                        .cloned()
                        .collect()
                };
                if heads.is_empty() {
                    break;
                }
                for op in heads {
                    if !self.connectivity.is_online() {
                        debug!("drain interrupted: went offline");
                        break 'outer;
                    }
                    self.process(op).await;
                }
            }

            self.draining.store(false, Ordering::SeqCst);
            self.schedule_retry();

            // An enqueue can land between the last empty-heads check and
            // the flag clear; its own drain call no-ops on the still-set
            // flag. Re-check here so that operation is picked up now
            // rather than stranded until some unrelated trigger.
            if !self.has_eligible_head() {
                return;
            }
        }
    }

    /// Whether any key's head operation could be dispatched right now.
    fn has_eligible_head(&self) -> bool {
        let now = Instant::now();
        let pending = self.pending.lock().unwrap();
        let not_before = self.not_before.lock().unwrap();
        pending
            .values()
            .filter_map(VecDeque::front)
            .any(|op| not_before.get(&op.id).is_none_or(|at| *at <= now))
    }

    async fn process(&self, op: PendingOperation) {
        let result = match tokio::time::timeout(self.config.request_timeout, self.dispatch(&op))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout),
        };

        match result {
            Ok(ack) => self.complete(op, ack).await,
            Err(error) if error.is_transient() => self.retry_later(op, &error).await,
            Err(error) => {
                warn!(op = %op.id, key = %op.key, error = %error, "operation rejected");
                self.forget(&op);
                let _ = self
                    .events
                    .send(QueueEvent::Failed {
                        op,
                        error: error.into(),
                    })
                    .await;
            }
        }
    }

    async fn dispatch(&self, op: &PendingOperation) -> RemoteResult<RemoteAck> {
        match op.kind {
            OperationKind::Create => {
                let entity = op.patch.apply(&Entity::default());
                self.remote.write(&op.key, op.id, &entity).await
            }
            OperationKind::Patch => self.remote.apply_patch(&op.key, op.id, &op.patch).await,
            OperationKind::Delete => self.remote.delete(&op.key, op.id).await,
        }
    }

    async fn complete(&self, op: PendingOperation, ack: RemoteAck) {
        debug!(op = %op.id, key = %op.key, revision = ack.revision, "operation acknowledged");
        self.forget(&op);
        let _ = self
            .events
            .send(QueueEvent::Acked {
                op,
                revision: ack.revision,
                entity: ack.entity,
            })
            .await;
    }

    async fn retry_later(&self, mut op: PendingOperation, error: &RemoteError) {
        op.attempts += 1;
        op.last_error = Some(error.to_string());

        if op.attempts >= self.config.max_attempts {
            warn!(
                op = %op.id,
                key = %op.key,
                attempts = op.attempts,
                "retry budget exhausted, abandoning operation"
            );
            self.forget(&op);
            let error = SyncError::Abandoned {
                attempts: op.attempts,
                last_error: op.last_error.clone().unwrap_or_default(),
            };
            let _ = self.events.send(QueueEvent::Failed { op, error }).await;
            return;
        }

        if let Err(e) = self
            .cache
            .update_op_attempts(op.id, op.attempts, op.last_error.as_deref())
        {
            warn!(op = %op.id, error = %e, "failed to persist retry accounting");
        }

        let delay = self.backoff(op.attempts);
        debug!(
            op = %op.id,
            key = %op.key,
            attempts = op.attempts,
            delay_ms = delay.as_millis() as u64,
            "transient failure, backing off"
        );
        self.not_before
            .lock()
            .unwrap()
            .insert(op.id, Instant::now() + delay);

        let mut pending = self.pending.lock().unwrap();
        if let Some(queue) = pending.get_mut(&op.key) {
            if let Some(head) = queue.front_mut() {
                if head.id == op.id {
                    *head = op;
                }
            }
        }
    }

    /// Removes the operation from both the durable queue and the
    /// in-memory mirror.
    fn forget(&self, op: &PendingOperation) {
        if let Err(e) = self.cache.remove_op(op.id) {
            warn!(op = %op.id, error = %e, "failed to remove persisted operation");
        }
        self.not_before.lock().unwrap().remove(&op.id);
        let mut pending = self.pending.lock().unwrap();
        if let Some(queue) = pending.get_mut(&op.key) {
            queue.retain(|queued| queued.id != op.id);
            if queue.is_empty() {
                pending.remove(&op.key);
            }
        }
    }

    /// Doubles per attempt from the base delay, capped, with up to 25%
    /// random jitter so a fleet of clients does not retry in lockstep.
    fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        let raw = self
            .config
            .base_retry_delay
            .saturating_mul(2u32.saturating_pow(exponent));
        let capped = raw.min(self.config.max_retry_delay);
        capped.mul_f64(1.0 + rand::random::<f64>() * 0.25)
    }

    /// Arms a wake-up for the earliest backing-off head operation, so a
    /// drain happens when its delay elapses even if nothing else
    /// triggers one.
    fn schedule_retry(self: &Arc<Self>) {
        let earliest = {
            let pending = self.pending.lock().unwrap();
            let not_before = self.not_before.lock().unwrap();
            pending
                .values()
                .filter_map(VecDeque::front)
                .filter_map(|op| not_before.get(&op.id))
                .min()
                .copied()
        };
        let Some(at) = earliest else {
            return;
        };
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(at.into()).await;
            queue.drain().await;
        });
    }
}
