//! Error types for the sync layer.
//!
//! Three-tier taxonomy: transient failures stay inside the queue's
//! retry loop; rejections and validation failures surface on the
//! `mutate` future and trigger rollback of the optimistic write.

use harvest_cache::CacheError;
use harvest_remote::RemoteError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network-level failure; retried with backoff, surfaced only after
    /// the attempt ceiling.
    #[error("transient network error: {0}")]
    Transient(String),

    /// The remote store permanently rejected the operation.
    #[error("remote rejected: {reason}")]
    Rejected { reason: String },

    /// The mutation violated a domain invariant before any write left
    /// the orchestrator.
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    /// A transiently failing operation exhausted its retry budget.
    #[error("operation abandoned after {attempts} attempts: {last_error}")]
    Abandoned { attempts: u32, last_error: String },

    /// A stored record failed to deserialize; the key is treated as
    /// absent and reseeded from the remote store.
    #[error("cache corruption for key {key}")]
    CacheCorruption { key: String },

    /// Cache storage error.
    #[error("cache error: {0}")]
    Cache(CacheError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An internal channel closed (engine shutting down).
    #[error("channel closed")]
    ChannelClosed,
}

impl From<CacheError> for SyncError {
    fn from(error: CacheError) -> Self {
        match error {
            CacheError::Corrupt { key, .. } => Self::CacheCorruption { key },
            other => Self::Cache(other),
        }
    }
}

impl From<RemoteError> for SyncError {
    fn from(error: RemoteError) -> Self {
        match error {
            RemoteError::Transient(msg) => Self::Transient(msg),
            RemoteError::Timeout => Self::Transient("remote call timed out".into()),
            RemoteError::Rejected { reason, .. } => Self::Rejected { reason },
            RemoteError::Serialization(e) => Self::Serialization(e),
        }
    }
}
