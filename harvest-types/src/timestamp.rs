//! Hybrid timestamp for monotonic `updatedAt` values.
//!
//! Combines wall-clock milliseconds with a logical counter so that
//! timestamps keep increasing even when the wall clock stalls or a
//! remote merge delivers a value from a faster clock.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as milliseconds since the Unix epoch.
#[must_use]
pub fn unix_millis_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A wall-time + logical-counter timestamp.
///
/// Entities carry only the packed millisecond value in `updatedAt`; the
/// logical counter disambiguates writes landing in the same millisecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HybridTimestamp {
    /// Milliseconds since Unix epoch.
    wall_time: u64,
    /// Counter for writes within the same millisecond.
    logical: u32,
}

impl HybridTimestamp {
    /// Creates a timestamp at the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self {
            wall_time: unix_millis_now(),
            logical: 0,
        }
    }

    /// Creates a timestamp from components.
    #[must_use]
    pub const fn new(wall_time: u64, logical: u32) -> Self {
        Self { wall_time, logical }
    }

    /// Reconstructs a timestamp from a bare millisecond value (e.g. an
    /// entity's `updatedAt` field).
    #[must_use]
    pub const fn from_millis(wall_time: u64) -> Self {
        Self { wall_time, logical: 0 }
    }

    /// Returns the wall-time component in milliseconds.
    #[must_use]
    pub const fn wall_time(&self) -> u64 {
        self.wall_time
    }

    /// Returns the logical counter.
    #[must_use]
    pub const fn logical(&self) -> u32 {
        self.logical
    }

    /// Produces the next timestamp, strictly greater than `self`.
    #[must_use]
    pub fn tick(&self) -> Self {
        let now = unix_millis_now();
        if now > self.wall_time {
            Self { wall_time: now, logical: 0 }
        } else {
            Self {
                wall_time: self.wall_time,
                logical: self.logical.saturating_add(1),
            }
        }
    }

    /// Merges a timestamp observed from the remote store, producing a
    /// value greater than both sides.
    #[must_use]
    pub fn receive(&self, other: &Self) -> Self {
        let now = unix_millis_now();
        let max_wall = now.max(self.wall_time).max(other.wall_time);

        let logical = if max_wall == self.wall_time && max_wall == other.wall_time {
            self.logical.max(other.logical).saturating_add(1)
        } else if max_wall == self.wall_time {
            self.logical.saturating_add(1)
        } else if max_wall == other.wall_time {
            other.logical.saturating_add(1)
        } else {
            0
        };

        Self { wall_time: max_wall, logical }
    }
}

impl Default for HybridTimestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl PartialOrd for HybridTimestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HybridTimestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.wall_time.cmp(&other.wall_time) {
            Ordering::Equal => self.logical.cmp(&other.logical),
            other => other,
        }
    }
}
