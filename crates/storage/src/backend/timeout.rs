//! Time-bounded storage backend.
//!
//! Wraps another backend and fails any call that doesn't complete within a
//! fixed duration with [`ErrorKind::Timeout`]. Listings are bounded per item,
//! not as a whole, since a bucket with many pages can legitimately take a
//! while to enumerate.

use crate::{
    BackendHandle, Object, StorageBackend,
    backend::ObjectInfoStream,
    error::{ErrorKind, Result},
};
use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use std::future::Future;
use std::time::Duration;

#[derive(Clone)]
pub struct TimeoutBackend {
    inner: BackendHandle,
    timeout: Duration,
}
impl TimeoutBackend {
    pub fn new(inner: BackendHandle, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(&self, operation: &str, key: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(backend = self.inner.name(), operation, key, timeout_ms, "Storage call timed out");
                exn::bail!(ErrorKind::Timeout(self.timeout))
            },
        }
    }
}

#[async_trait]
impl StorageBackend for TimeoutBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a str>) -> ObjectInfoStream<'a> {
        Box::pin(stream! {
            let mut inner = self.inner.list_stream(prefix);
            loop {
                match tokio::time::timeout(self.timeout, inner.next()).await {
                    Ok(Some(item)) => yield item,
                    Ok(None) => break,
                    Err(_) => {
                        tracing::warn!(backend = self.inner.name(), prefix, "Storage listing timed out");
                        yield Err(exn::Exn::from(ErrorKind::Timeout(self.timeout)));
                        break;
                    },
                }
            }
        })
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.bounded("exists", key, self.inner.exists(key)).await
    }

    async fn get(&self, key: &str) -> Result<Object> {
        self.bounded("get", key, self.inner.get(key)).await
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        self.bounded("read", key, self.inner.read(key)).await
    }
}
