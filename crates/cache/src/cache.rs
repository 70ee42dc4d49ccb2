use crate::error::{ErrorKind, Result};
use crate::snapshot::Snapshot;
use async_trait::async_trait;
use exn::ResultExt;
use futures::stream::FuturesUnordered;
use futures::{StreamExt, TryStreamExt};
use s3reg_registry::{ProviderKey, ProviderVersions, VersionSource};
use s3reg_storage::BackendHandle;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, instrument, trace, warn};

/// Upper bound on per-provider version listings in flight during a refresh.
pub const MAX_REFRESH_CONCURRENCY: usize = 16;

/// Read access to provider versions.
#[async_trait]
pub trait VersionIndex: Send + Sync {
    async fn list_versions(&self, namespace: &str, provider_type: &str) -> Result<ProviderVersions>;
}

/// Rebuild the index from the blob store.
#[async_trait]
pub trait Refresh: Send + Sync {
    async fn refresh(&self) -> Result<RefreshSummary>;
}

/// What a successful refresh published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSummary {
    pub providers: usize,
    pub versions: usize,
    /// Number of successful refreshes so far, this one included.
    pub generation: u64,
}

/// In-memory index of every provider version, rebuilt on demand.
///
/// Reads only ever see a complete [`Snapshot`]: a refresh builds the next one
/// on the side and swaps it in with a single pointer write. If anything fails
/// along the way the previous snapshot stays published. Refreshes are
/// serialized; reads never wait for one to finish.
pub struct Cache {
    backend: BackendHandle,
    source: Arc<dyn VersionSource>,
    current: RwLock<Arc<Snapshot>>,
    refresh_lock: Mutex<()>,
    generation: AtomicU64,
}

impl Cache {
    /// An empty cache. Nothing is listed until the first [`refresh`](Refresh::refresh).
    ///
    /// `backend` is only used to discover which providers exist; their
    /// versions come from `source`.
    pub fn new(backend: BackendHandle, source: Arc<dyn VersionSource>) -> Self {
        Self {
            backend,
            source,
            current: RwLock::new(Arc::new(Snapshot::default())),
            refresh_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// The currently published snapshot.
    pub async fn snapshot(&self) -> Arc<Snapshot> {
        self.current.read().await.clone()
    }

    /// Number of successful refreshes since construction.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Every distinct `namespace/type` with at least one object under it.
    async fn discover(&self) -> Result<BTreeSet<(String, String)>> {
        let mut stream = self.backend.list_stream(None);
        let mut providers = BTreeSet::new();
        while let Some(info) = stream.try_next().await.or_raise(|| ErrorKind::Listing)? {
            match ProviderKey::parse(&info.key) {
                Some(key) => {
                    providers.insert((key.namespace.to_string(), key.provider_type.to_string()));
                },
                None => trace!(key = %info.key, "Ignoring key outside of any provider"),
            }
        }
        Ok(providers)
    }

    async fn lookup(&self, namespace: String, provider_type: String) -> Result<(String, String, ProviderVersions)> {
        let versions = self
            .source
            .list_versions(&namespace, &provider_type)
            .await
            .or_raise(|| ErrorKind::Lookup(namespace.clone(), provider_type.clone()))?;
        Ok((namespace, provider_type, versions))
    }

    async fn build(&self) -> Result<Snapshot> {
        let providers = self.discover().await?;
        let mut pending = providers.into_iter().map(|(namespace, provider_type)| self.lookup(namespace, provider_type));
        let mut processing: FuturesUnordered<_> = pending.by_ref().take(MAX_REFRESH_CONCURRENCY).collect();
        let mut snapshot = Snapshot::default();
        // Returning early drops whatever is still in flight.
        while let Some(result) = processing.next().await {
            let (namespace, provider_type, versions) = result?;
            snapshot.insert(namespace, provider_type, versions);
            if let Some(next) = pending.next() {
                processing.push(next);
            }
        }
        Ok(snapshot)
    }
}

#[async_trait]
impl VersionIndex for Cache {
    async fn list_versions(&self, namespace: &str, provider_type: &str) -> Result<ProviderVersions> {
        let snapshot = self.snapshot().await;
        Ok(snapshot.get(namespace, provider_type)?.clone())
    }
}

#[async_trait]
impl Refresh for Cache {
    #[instrument(skip(self), fields(backend = self.backend.name()))]
    async fn refresh(&self) -> Result<RefreshSummary> {
        let _guard = self.refresh_lock.lock().await;
        let started = Instant::now();
        let snapshot = match self.build().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = ?err, "Refresh failed, keeping previous snapshot");
                return Err(err);
            },
        };
        if snapshot.is_empty() {
            warn!("Refresh found no providers");
        }
        let (providers, versions) = (snapshot.provider_count(), snapshot.version_count());
        *self.current.write().await = Arc::new(snapshot);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(providers, versions, generation, elapsed_ms, "Refreshed provider index");
        Ok(RefreshSummary {
            providers,
            versions,
            generation,
        })
    }
}
