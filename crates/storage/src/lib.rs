//! Blob store access for the registry.
//!
//! The registry only ever needs two things from storage: a flat listing of
//! every object key, and the bytes behind a single key. Everything else
//! (what a key *means*) is decided by the crates above this one.

pub mod backend;
pub mod error;
mod key;
mod models;

pub use crate::backend::StorageBackend;
pub use crate::key::validate as validate_key;
pub use crate::models::{Object, ObjectInfo};
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
