//! Conflict resolution.
//!
//! Pure merge logic with no I/O: given an incoming remote snapshot, the
//! current cache record, and the operations still queued for the key,
//! decide what (if anything) to store. The orchestrator owns all
//! locking and persistence.
//!
//! A still-queued patch is *intent the remote store has not yet
//! observed*: it is re-applied on top of the snapshot instead of being
//! discarded. Counter deltas were captured once at enqueue time and are
//! dropped from the queue on acknowledgement, so every delta lands
//! exactly once — the snapshot already contains acked deltas, and only
//! unacked ones are re-applied.

use harvest_remote::RemoteSnapshot;
use harvest_types::{CacheRecord, OperationKind, PendingOperation, WriteSource};

/// Outcome of merging a remote snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Store this record and notify subscribers.
    Store(CacheRecord),
    /// The snapshot does not advance the remote revision watermark;
    /// ignore it.
    StaleEcho,
    /// A queued delete for this key suppresses resurrection by
    /// snapshot.
    SuppressedByDelete,
}

/// Merges `snapshot` against the current record and queue state.
#[must_use]
pub fn resolve(
    current: Option<&CacheRecord>,
    snapshot: &RemoteSnapshot,
    pending: &[PendingOperation],
) -> Resolution {
    if let Some(current) = current {
        if snapshot.revision <= current.remote_revision {
            return Resolution::StaleEcho;
        }
    }

    if pending.iter().any(|op| op.kind == OperationKind::Delete) {
        return Resolution::SuppressedByDelete;
    }

    let mut merged = snapshot.entity.clone();
    for op in pending {
        merged = op.patch.apply(&merged);
    }

    // Keep updatedAt monotonic across the merge: a slow echo must not
    // rewind the timestamp below what this client already observed.
    if let Some(current_ts) = current.and_then(|c| c.data.updated_at()) {
        if merged.updated_at().unwrap_or(0) < current_ts {
            merged.set_updated_at(current_ts);
        }
    }

    let version = current.map(|c| c.version + 1).unwrap_or(1);
    let source = if pending.is_empty() {
        WriteSource::Remote
    } else {
        WriteSource::Local
    };

    let record = CacheRecord::new(snapshot.key.clone(), merged, version, source)
        .with_remote_revision(snapshot.revision)
        .with_confirmed(Some(snapshot.entity.clone()));

    Resolution::Store(record)
}
