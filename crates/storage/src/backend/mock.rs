//! In-memory storage backend for testing.

use super::ObjectInfoStream;
use crate::error::{ErrorKind, Result};
use crate::key::validate as validate_key;
use crate::models::content_type_for;
use crate::{Object, ObjectInfo, StorageBackend};
use async_stream::stream;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// In-memory storage backend for testing.
///
/// Objects are stored in a sorted map behind a [`RwLock`], so all trait
/// methods (and the test helpers that mutate content) can operate on `&self`.
/// Keys are kept exactly as given, which means directory markers such as
/// `"black/lodge/"` show up in listings just like they do in a real bucket.
///
/// Failures can be injected to exercise error paths: the whole backend can be
/// made [unavailable](Self::set_unavailable), individual keys can be made to
/// [fail](Self::fail_key).
///
/// # Examples
///
/// ```
/// use s3reg_storage::backend::{MockBackend, StorageBackend};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([
///     ("black/lodge/1.0.1/shasum", "315 coffee"),
/// ]);
/// assert!(backend.exists("black/lodge/1.0.1/shasum").await.unwrap());
///
/// backend.insert("black/lodge/1.0.1/key_id", "315").await;
/// assert!(backend.exists("black/lodge/1.0.1/key_id").await.unwrap());
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    storage: RwLock<BTreeMap<String, Vec<u8>>>,
    failing: RwLock<HashSet<String>>,
    unavailable: AtomicBool,
}

impl MockBackend {
    /// Create a mock backend pre-populated with objects.
    ///
    /// Panics if any key fails validation (e.g. path traversal). If test
    /// setup is wrong, then test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<String>, impl Into<Vec<u8>>)>) -> Self {
        let mut map = BTreeMap::new();
        for (key, data) in files {
            let key = key.into();
            if validate_key(&key).is_err() {
                // The panic here is DELIBERATE. MockBackend is intended to be
                // used in tests; panics are expected. There is no error result.
                panic!("MockBackend::with_files: invalid key {key:?}");
            }
            map.insert(key, data.into());
        }
        Self {
            name: "mock".to_string(),
            storage: RwLock::new(map),
            failing: RwLock::new(HashSet::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Create a mock backend containing the given keys, each with an empty
    /// body. Most listing tests don't care about content.
    pub fn with_keys(keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::with_files(keys.into_iter().map(|k| (k, Vec::new())))
    }

    /// Add or replace an object.
    pub async fn insert(&self, key: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.storage.write().await.insert(key.into(), data.into());
    }

    /// Remove an object, returning whether it existed.
    pub async fn remove(&self, key: &str) -> bool {
        self.storage.write().await.remove(key).is_some()
    }

    /// Make every call fail with a network error (or stop doing so).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make fetching a single key fail with a backend error.
    pub async fn fail_key(&self, key: impl Into<String>) {
        self.failing.write().await.insert(key.into());
    }

    fn enter(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::Network(format!("mock backend `{}` is unavailable", self.name)));
        }
        Ok(())
    }

    async fn lookup(&self, key: &str) -> Result<Vec<u8>> {
        self.enter()?;
        let key = validate_key(key)?;
        if self.failing.read().await.contains(&key) {
            exn::bail!(ErrorKind::BackendError(format!("injected failure for {key}")));
        }
        self.storage.read().await.get(&key).cloned().ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(key)))
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let files: [(&str, &str); 0] = [];
        Self::with_files(files)
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a str>) -> ObjectInfoStream<'a> {
        Box::pin(stream! {
            if let Err(e) = self.enter() {
                yield Err(e);
                return;
            }
            // Snapshot matching entries under the read lock, then drop it
            // before yielding to avoid holding the lock across yield points.
            let entries: Vec<ObjectInfo> = {
                let guard = self.storage.read().await;
                guard
                    .iter()
                    .filter(|(key, _)| prefix.is_none_or(|pfx| key.starts_with(pfx)))
                    .map(|(key, data)| ObjectInfo::new(key.clone(), data.len() as u64))
                    .collect()
            };
            for info in entries {
                yield Ok(info);
            }
        })
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.enter()?;
        let key = validate_key(key)?;
        Ok(self.storage.read().await.contains_key(&key))
    }

    async fn get(&self, key: &str) -> Result<Object> {
        let data = self.lookup(key).await?;
        Ok(Object::from_bytes(data, content_type_for(key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_with_files() {
        let backend = MockBackend::with_files([
            ("black/lodge/1.0.0/shasum", Vec::from(*b"abc")),
            ("white/lodge/1.0.0/shasum", Vec::from(*b"def")),
        ]);
        assert!(backend.exists("black/lodge/1.0.0/shasum").await.unwrap());
        assert!(backend.exists("white/lodge/1.0.0/shasum").await.unwrap());
        assert!(!backend.exists("red/room/1.0.0/shasum").await.unwrap());
    }

    #[tokio::test]
    async fn test_get() {
        let backend = MockBackend::with_files([("a/b/1.0.0/p_1.0.0_linux_amd64.zip", "zipdata")]);
        let mut object = backend.get("a/b/1.0.0/p_1.0.0_linux_amd64.zip").await.unwrap();
        assert_eq!(object.content_length, 7);
        assert_eq!(object.content_type, "application/zip");
        let mut body = Vec::new();
        object.body.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"zipdata");
    }

    #[tokio::test]
    async fn test_read_not_found() {
        let backend = MockBackend::default();
        let err = backend.read("missing").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_keeps_raw_keys_in_order() {
        let backend = MockBackend::with_keys(["b/t/1.0.0/x_1.0.0_linux_amd64.zip", "a/t/", "a/t/1.0.0/"]);
        let keys: Vec<_> = backend.list(None).await.unwrap().into_iter().map(|o| o.key).collect();
        assert_eq!(keys, vec!["a/t/", "a/t/1.0.0/", "b/t/1.0.0/x_1.0.0_linux_amd64.zip"]);
    }

    #[tokio::test]
    async fn test_list_with_prefix() {
        let backend = MockBackend::with_keys(["black/lodge/a", "black/lounge/b", "white/lodge/c"]);
        assert_eq!(backend.list(Some("black/lo")).await.unwrap().len(), 2);
        assert_eq!(backend.list(Some("white/")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_insert_and_remove() {
        let backend = MockBackend::default();
        backend.insert("a/b", "data").await;
        assert_eq!(backend.read("a/b").await.unwrap(), b"data");
        assert!(backend.remove("a/b").await);
        assert!(!backend.remove("a/b").await);
        assert!(!backend.exists("a/b").await.unwrap());
    }

    #[tokio::test]
    async fn test_unavailable() {
        let backend = MockBackend::with_keys(["a/b"]);
        backend.set_unavailable(true);
        let err = backend.list(None).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Network(_)));
        assert!(backend.get("a/b").await.is_err());
        backend.set_unavailable(false);
        assert_eq!(backend.list(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fail_key() {
        let backend = MockBackend::with_files([("a/key_id", "1"), ("a/keyfile", "2")]);
        backend.fail_key("a/keyfile").await;
        assert!(backend.read("a/key_id").await.is_ok());
        let err = backend.read("a/keyfile").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::BackendError(_)));
    }

    #[tokio::test]
    async fn test_key_traversal_rejected() {
        let backend = MockBackend::default();
        let err = backend.read("../etc/passwd").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidKey(_)));
    }

    #[test]
    #[should_panic(expected = "invalid key")]
    fn test_with_files_panics_on_bad_key() {
        MockBackend::with_files([("../escape", Vec::from(*b"bad"))]);
    }
}
