//! The remote store boundary.
//!
//! The only part of the system aware of the authoritative backing
//! store's wire format and authentication. Everything above it works in
//! terms of snapshots, acks, and a push channel.

use crate::error::RemoteResult;
use async_trait::async_trait;
use harvest_types::{Entity, EntityKey, OperationId, Patch};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// The full current state of one entity at a remote revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSnapshot {
    /// The entity key.
    pub key: EntityKey,
    /// The store's monotonically increasing revision for this key.
    pub revision: u64,
    /// The entity value at that revision.
    pub entity: Entity,
}

/// Acknowledgement of an accepted write.
///
/// Carries the entity as the store saw it immediately after applying
/// the write. Retrying an already-applied operation returns the
/// original ack, which is what lets the engine reconcile a write whose
/// first response was lost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteAck {
    /// The revision assigned by the store after applying the write.
    pub revision: u64,
    /// The post-apply entity; `None` for deletes.
    pub entity: Option<Entity>,
}

/// Handle that tears down one remote subscription.
///
/// Dropping the handle cancels the subscription; [`cancel`] does so
/// explicitly.
///
/// [`cancel`]: RemoteSubscription::cancel
pub struct RemoteSubscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl RemoteSubscription {
    /// Wraps a transport-specific cancellation action.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Cancels the subscription now.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for RemoteSubscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for RemoteSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSubscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// The authoritative backing store, abstracted.
///
/// Mutating calls carry the pending operation's id as an idempotency
/// key: retrying an already-applied call must be safe and return the
/// original outcome.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Reads the current snapshot for `key`, or `None` if the key does
    /// not exist remotely.
    async fn read(&self, key: &EntityKey) -> RemoteResult<Option<RemoteSnapshot>>;

    /// Replaces the entity at `key`.
    async fn write(
        &self,
        key: &EntityKey,
        op_id: OperationId,
        entity: &Entity,
    ) -> RemoteResult<RemoteAck>;

    /// Applies a field-level patch to the entity at `key`.
    async fn apply_patch(
        &self,
        key: &EntityKey,
        op_id: OperationId,
        patch: &Patch,
    ) -> RemoteResult<RemoteAck>;

    /// Deletes the entity at `key`.
    async fn delete(&self, key: &EntityKey, op_id: OperationId) -> RemoteResult<RemoteAck>;

    /// Subscribes to changes for `key`.
    ///
    /// Delivers the full current snapshot first (when the key exists),
    /// then one snapshot per remote change, over `sender`. Delivery may
    /// silently stop while offline; the current value is redelivered as
    /// soon as connectivity returns. The returned handle tears the
    /// subscription down when cancelled or dropped.
    async fn subscribe(
        &self,
        key: &EntityKey,
        sender: mpsc::Sender<RemoteSnapshot>,
    ) -> RemoteResult<RemoteSubscription>;
}
