//! Storage models.

use std::fmt;
use std::pin::Pin;
use tokio::io::AsyncRead;

pub type BoxAsyncRead = Pin<Box<dyn AsyncRead + Send + 'static>>;

/// Content type reported when a backend has nothing better to offer.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Object metadata returned by listing operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Raw object key, exactly as the backend reported it. Directory
    /// markers keep their trailing `/`.
    pub key: String,
    /// Object size in bytes
    pub size: u64,
}
impl ObjectInfo {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self { key: key.into(), size }
    }
}

/// An opened object whose body has not been read yet.
///
/// The body is handed over as-is; whoever holds the `Object` is responsible
/// for draining (or dropping) it.
pub struct Object {
    pub body: BoxAsyncRead,
    pub content_length: u64,
    pub content_type: String,
}
impl Object {
    pub fn new(body: impl AsyncRead + Send + 'static, content_length: u64, content_type: impl Into<String>) -> Self {
        Self {
            body: Box::pin(body),
            content_length,
            content_type: content_type.into(),
        }
    }

    /// Wrap an in-memory buffer. Mostly useful for tests and small objects.
    pub fn from_bytes(data: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        let data = data.into();
        let length = data.len() as u64;
        Self::new(std::io::Cursor::new(data), length, content_type)
    }
}
impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("content_length", &self.content_length)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Guess a content type from an object key's extension.
pub fn content_type_for(key: &str) -> &'static str {
    let name = key.rsplit('/').next().unwrap_or(key);
    match name.rsplit_once('.').map(|(_, ext)| ext) {
        Some("zip") => "application/zip",
        Some("json") => "application/json",
        Some("sig") => "application/pgp-signature",
        _ => DEFAULT_CONTENT_TYPE,
    }
}
