//! Registry Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A registry error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A required object is missing from the blob store.
    #[display("object not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// The blob store failed to list or fetch (see the error tree for details).
    #[display("storage error: {_0}")]
    Storage(#[error(not(source))] String),
    /// A metadata sibling exists but its content is unusable.
    #[display("malformed metadata in {_0}")]
    MalformedMetadata(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns `true` if the object simply isn't there.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Raise a storage failure into the registry's error tree, keeping "missing"
/// distinguishable from "broken".
pub(crate) fn from_storage<T>(result: s3reg_storage::error::Result<T>, key: &str) -> Result<T> {
    use exn::ResultExt;
    match result {
        Ok(value) => Ok(value),
        Err(err) if err.is_not_found() => Err(err).or_raise(|| ErrorKind::NotFound(key.to_string())),
        Err(err) => Err(err).or_raise(|| ErrorKind::Storage(key.to_string())),
    }
}
