//! In-memory index of every provider version in the registry.
//!
//! The blob store is the source of truth; this crate only keeps a snapshot of
//! what it contained at the last successful refresh. Listings are answered
//! from memory, and a refresh either fully succeeds and replaces the snapshot
//! or fails and changes nothing.

mod cache;
pub mod error;
mod snapshot;

pub use crate::cache::{Cache, MAX_REFRESH_CONCURRENCY, Refresh, RefreshSummary, VersionIndex};
pub use crate::snapshot::Snapshot;
