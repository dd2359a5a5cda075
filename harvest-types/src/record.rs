//! Cache records.

use crate::entity::Entity;
use crate::key::EntityKey;
use crate::timestamp::unix_millis_now;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where the most recent accepted write for a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteSource {
    /// Confirmed by the remote store (snapshot or acked round trip).
    Remote,
    /// Optimistic local write, not yet confirmed.
    Local,
    /// Hydrated via a read-through fetch, not yet observed by a
    /// subscription.
    Seed,
}

impl fmt::Display for WriteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Remote => "remote",
            Self::Local => "local",
            Self::Seed => "seed",
        };
        write!(f, "{s}")
    }
}

impl FromStr for WriteSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "remote" => Ok(Self::Remote),
            "local" => Ok(Self::Local),
            "seed" => Ok(Self::Seed),
            other => Err(format!("unknown write source: {other}")),
        }
    }
}

/// One cached entity plus the bookkeeping the sync layer needs.
///
/// `version` strictly increases on every accepted write for the key,
/// local or remote-derived; `DurableCache::put` enforces this.
/// `remote_revision` is the newest remote revision reflected in `data`,
/// used to drop stale remote echoes. `confirmed` holds the last
/// remote-confirmed entity and is the rollback baseline when an
/// optimistic write is permanently rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// The entity key.
    pub key: EntityKey,
    /// Current (possibly optimistic) entity value.
    pub data: Entity,
    /// Per-key monotonic write counter.
    pub version: u64,
    /// Newest remote revision reflected in `data` (0 = never synced).
    pub remote_revision: u64,
    /// Origin of the last accepted write.
    pub source: WriteSource,
    /// Last remote-confirmed entity, if any.
    pub confirmed: Option<Entity>,
    /// When this record was last written, in unix millis (TTL basis).
    pub cached_at: u64,
}

impl CacheRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(key: EntityKey, data: Entity, version: u64, source: WriteSource) -> Self {
        Self {
            key,
            data,
            version,
            remote_revision: 0,
            source,
            confirmed: None,
            cached_at: unix_millis_now(),
        }
    }

    /// Sets the remote revision watermark.
    #[must_use]
    pub fn with_remote_revision(mut self, revision: u64) -> Self {
        self.remote_revision = revision;
        self
    }

    /// Sets the confirmed baseline.
    #[must_use]
    pub fn with_confirmed(mut self, confirmed: Option<Entity>) -> Self {
        self.confirmed = confirmed;
        self
    }

    /// True if the record's age exceeds `ttl_millis`.
    #[must_use]
    pub fn is_expired(&self, now_millis: u64, ttl_millis: u64) -> bool {
        now_millis.saturating_sub(self.cached_at) > ttl_millis
    }
}
