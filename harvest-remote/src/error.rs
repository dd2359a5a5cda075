//! Error types for the remote store boundary.
//!
//! Every failure is classified as either transient (retry-worthy) or
//! rejected (permanent). Only transient errors feed the sync queue's
//! backoff loop.

use thiserror::Error;

/// Result type for remote store operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors returned by a [`RemoteStore`](crate::RemoteStore).
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Network-level failure; safe to retry.
    #[error("transient remote error: {0}")]
    Transient(String),

    /// The call exceeded its bounded timeout; treated as transient.
    #[error("remote call timed out")]
    Timeout,

    /// The store permanently rejected the operation (validation,
    /// permission, business rule). Never retried.
    #[error("remote rejected: {reason}")]
    Rejected {
        /// Protocol status code, when one exists.
        status: Option<u16>,
        /// Human-readable rejection reason.
        reason: String,
    },

    /// Payload could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RemoteError {
    /// True when the sync queue should retry the operation.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout)
    }

    /// Builds a permanent rejection without a status code.
    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            status: None,
            reason: reason.into(),
        }
    }
}
