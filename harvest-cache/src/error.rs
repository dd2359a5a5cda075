//! Error types for the durable cache.

use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur in cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row failed to deserialize. Callers treat the key as
    /// absent; the row has already been deleted.
    #[error("corrupt cache record for key {key}: {detail}")]
    Corrupt { key: String, detail: String },

    /// Invalid stored data outside of JSON bodies (enum tags etc.).
    #[error("invalid data: {0}")]
    InvalidData(String),
}
