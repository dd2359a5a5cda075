//! Remote store adapter boundary for the Harvest sync layer.
//!
//! Abstracts the authoritative backing store behind read/write/patch/
//! delete plus a push subscription, with errors classified as transient
//! (retry) or rejected (permanent). This crate is the only component
//! that talks to the network.
//!
//! # Implementations
//!
//! - [`RestRemoteStore`]: HTTP+JSON with polling subscriptions
//! - [`mock::MockRemoteStore`]: controllable in-memory store for tests

mod error;
mod http;
pub mod mock;
mod store;

pub use error::{RemoteError, RemoteResult};
pub use http::{RestConfig, RestRemoteStore};
pub use store::{RemoteAck, RemoteSnapshot, RemoteStore, RemoteSubscription};
