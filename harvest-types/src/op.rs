//! Pending operations — the unit of work on the sync queue.

use crate::ids::OperationId;
use crate::key::EntityKey;
use crate::patch::Patch;
use crate::timestamp::unix_millis_now;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What a pending operation does to its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// First write for a key; the patch carries the full initial entity.
    Create,
    /// Field-level update of an existing entity.
    Patch,
    /// Removal of the entity.
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Patch => "patch",
            Self::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "patch" => Ok(Self::Patch),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown operation kind: {other}")),
        }
    }
}

/// A not-yet-confirmed mutation awaiting replay against the remote store.
///
/// Created by `mutate`/`remove`, mutated only by the sync queue's retry
/// accounting, destroyed on acknowledgement or permanent failure.
/// Operations for the same key are applied to the remote store in
/// enqueue order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Unique id; doubles as the remote idempotency key.
    pub id: OperationId,
    /// The entity this operation targets.
    pub key: EntityKey,
    /// Create, patch, or delete.
    pub kind: OperationKind,
    /// The change, including counter deltas captured at enqueue time.
    pub patch: Patch,
    /// When the operation was enqueued, in unix millis.
    pub enqueued_at: u64,
    /// Delivery attempts so far.
    pub attempts: u32,
    /// Last transient error message, for diagnostics.
    pub last_error: Option<String>,
}

impl PendingOperation {
    /// Creates a fresh operation with zero attempts.
    #[must_use]
    pub fn new(key: EntityKey, kind: OperationKind, patch: Patch) -> Self {
        Self {
            id: OperationId::new(),
            key,
            kind,
            patch,
            enqueued_at: unix_millis_now(),
            attempts: 0,
            last_error: None,
        }
    }
}
