//! Core type definitions for the Harvest sync layer.
//!
//! Everything here is plain data with no I/O: entity keys, opaque JSON
//! entities, field-level patches, cache records, pending operations, and
//! the hybrid timestamp used to keep `updatedAt` monotonic.

mod entity;
mod ids;
mod key;
mod op;
mod patch;
mod record;
mod timestamp;

pub use entity::{Entity, UPDATED_AT_FIELD};
pub use ids::OperationId;
pub use key::EntityKey;
pub use op::{OperationKind, PendingOperation};
pub use patch::Patch;
pub use record::{CacheRecord, WriteSource};
pub use timestamp::{unix_millis_now, HybridTimestamp};
