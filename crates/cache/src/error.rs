//! Cache Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A cache error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The namespace has never been seen by a successful refresh.
    #[display("unable to find data for namespace {_0}")]
    NamespaceNotFound(#[error(not(source))] String),
    /// The namespace is known, but not this provider type.
    #[display("unable to find data for {_0}/{_1}")]
    TypeNotFound(#[error(not(source))] String, String),
    /// Refresh could not list the blob store.
    #[display("unable to list providers")]
    Listing,
    /// Refresh could not list the versions of one provider.
    #[display("unable to list versions of {_0}/{_1}")]
    Lookup(#[error(not(source))] String, String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Listing | Self::Lookup(..))
    }

    /// Returns `true` if the lookup missed the snapshot.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NamespaceNotFound(_) | Self::TypeNotFound(..))
    }
}
