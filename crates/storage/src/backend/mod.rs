//! Storage backend trait and implementations.
//!
//! This module defines the `StorageBackend` trait, which provides a unified
//! interface for the (read-only) blob store operations the registry needs,
//! across different backends (S3-compatible services, local filesystem, etc.).
//!

mod local;
#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "s3")]
mod s3;
mod timeout;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
#[cfg(feature = "s3")]
pub use self::s3::{S3Backend, S3Credentials};
pub use self::timeout::TimeoutBackend;
use crate::error::Result;
use crate::models::{Object, ObjectInfo};
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::pin::Pin;
use tokio::io::AsyncReadExt;

const READ_CAPACITY_LIMIT: usize = 1 << 20;

pub(crate) type ObjectInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<ObjectInfo>> + Send + 'a>>;

/// Unified interface for blob store backends.
///
/// All storage operations are asynchronous to efficiently handle network
/// operations and concurrent access. The registry never writes, so neither
/// does this trait.
///
/// # Keys
/// Keys returned by listings are raw and opaque. Keys passed *in* to
/// [`get()`](Self::get), [`read()`](Self::read) and [`exists()`](Self::exists)
/// must be validated using [`validate_key`](crate::validate_key) by the
/// implementation before use.
///
/// # Examples
///
/// ```
/// use s3reg_storage::{backend::StorageBackend, error::Result};
///
/// async fn size_of_checksum_file(backend: &dyn StorageBackend) -> Result<u64> {
///     let key = "hashicorp/aws/5.0.0/shasum";
///     if backend.exists(key).await? {
///         let data = backend.read(key).await?;
///         Ok(data.len() as u64)
///     } else {
///         Ok(0)
///     }
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend. Used for logging only.
    fn name(&self) -> &str;

    /// List all objects matching an optional key prefix.
    ///
    /// Default implementation of this method is to collect all the results
    /// from [`list_stream()`](Self::list_stream) into a [`Vec`] before
    /// returning.
    async fn list(&self, prefix: Option<&str>) -> Result<Vec<ObjectInfo>> {
        self.list_stream(prefix).try_collect().await
    }

    /// Stream object metadata matching an optional key prefix.
    ///
    /// Yields results incrementally as the backend produces them (one page
    /// at a time for S3). If a prefix is provided, only objects whose keys
    /// start with the prefix (as a plain string) are returned.
    ///
    /// # Examples
    ///
    /// ```
    /// use futures::TryStreamExt;
    /// # use s3reg_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    ///
    /// let mut stream = backend.list_stream(Some("hashicorp/"));
    /// while let Some(info) = stream.try_next().await? {
    ///     println!("{}: {} bytes", info.key, info.size);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    fn list_stream<'a>(&'a self, prefix: Option<&'a str>) -> ObjectInfoStream<'a>;

    /// Check if an object exists.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Open an object for streaming reads.
    ///
    /// Returns the body unread, together with the declared content length
    /// and content type. Returns [`NotFound`](crate::error::ErrorKind::NotFound)
    /// if the object does not exist.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use tokio::io::AsyncReadExt;
    /// # use s3reg_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let mut object = backend.get("hashicorp/aws/5.0.0/shasum").await?;
    /// println!("{} ({} bytes)", object.content_type, object.content_length);
    /// let mut head = [0u8; 64];
    /// let _ = object.body.read(&mut head).await;
    /// # Ok(())
    /// # }
    /// ```
    async fn get(&self, key: &str) -> Result<Object>;

    /// Read object contents.
    ///
    /// Returns the complete object contents as a [`Vec<u8>`]. Returns
    /// [`NotFound`](crate::error::ErrorKind::NotFound) if the object does
    /// not exist. Only meant for small objects (checksums, key files); use
    /// [`get()`](Self::get) for artifacts.
    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let mut object = self.get(key).await?;
        // Don't trust the declared length for the allocation.
        let mut buffer = Vec::with_capacity(usize::try_from(object.content_length).unwrap_or(0).min(READ_CAPACITY_LIMIT));
        object.body.read_to_end(&mut buffer).await.map_err(crate::error::ErrorKind::Io)?;
        Ok(buffer)
    }
}
