//! Configuration for the sync engine.

use std::time::Duration;

/// Tunables for queue retry, connectivity debouncing, cache TTL, and
/// domain validation.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// First retry delay; doubles per attempt.
    pub base_retry_delay: Duration,
    /// Upper bound on the backoff delay.
    pub max_retry_delay: Duration,
    /// Attempts before a transiently failing operation is abandoned.
    pub max_attempts: u32,
    /// Bounded timeout for every remote store call.
    pub request_timeout: Duration,
    /// Window within which flapping connectivity collapses to one
    /// transition.
    pub debounce_window: Duration,
    /// Age past which an unwatched cache record expires.
    pub cache_ttl: Duration,
    /// Counter fields that must never go negative (e.g. balances).
    pub non_negative_fields: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_retry_delay: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(30),
            max_attempts: 8,
            request_timeout: Duration::from_secs(10),
            debounce_window: Duration::from_millis(750),
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            non_negative_fields: vec!["coins".to_string(), "balance".to_string()],
        }
    }
}
