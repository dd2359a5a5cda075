//! Offline-capable data synchronization for the Harvest mini-app.
//!
//! The engine keeps a durable local cache authoritative for reads,
//! applies writes optimistically, and reconciles with the remote store
//! as connectivity allows:
//!
//! - [`SyncOrchestrator`] is the public surface: optimistic
//!   [`mutate`](SyncOrchestrator::mutate), read-through
//!   [`fetch`](SyncOrchestrator::fetch), multiplexed
//!   [`subscribe`](SyncOrchestrator::subscribe), and
//!   [`sync_status`](SyncOrchestrator::sync_status).
//! - [`SyncQueue`] persists unacknowledged operations and retries
//!   transient failures with capped exponential backoff.
//! - [`resolver`] merges incoming remote snapshots with still-queued
//!   local intent so counter deltas land exactly once.
//! - [`ConnectivityMonitor`] debounces platform online/offline and
//!   visibility signals.
//!
//! Storage lives in `harvest-cache`, the network boundary in
//! `harvest-remote`, and the plain data types in `harvest-types`.

mod config;
mod connectivity;
mod error;
mod queue;
mod registry;
pub mod resolver;

mod orchestrator;

pub use config::SyncConfig;
pub use connectivity::{ConnectivityEvent, ConnectivityMonitor, ConnectivitySignal};
pub use error::{SyncError, SyncResult};
pub use orchestrator::{SubscriptionHandle, SyncOrchestrator, SyncStatus};
pub use queue::{QueueEvent, SyncQueue};
pub use registry::{ListenerRegistry, SubscriberCallback};
