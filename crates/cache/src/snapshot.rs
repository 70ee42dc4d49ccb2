use crate::error::{ErrorKind, Result};
use s3reg_registry::ProviderVersions;
use std::collections::BTreeMap;

/// An immutable view of every provider known at the time of a refresh.
///
/// Built privately by a refresh and only published once complete; after
/// that it is shared read-only behind an [`Arc`](std::sync::Arc).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    providers: BTreeMap<String, BTreeMap<String, ProviderVersions>>,
}

impl Snapshot {
    pub(crate) fn insert(&mut self, namespace: String, provider_type: String, versions: ProviderVersions) {
        self.providers.entry(namespace).or_default().insert(provider_type, versions);
    }

    pub fn get(&self, namespace: &str, provider_type: &str) -> Result<&ProviderVersions> {
        let Some(types) = self.providers.get(namespace) else {
            exn::bail!(ErrorKind::NamespaceNotFound(namespace.to_string()));
        };
        match types.get(provider_type) {
            Some(versions) => Ok(versions),
            None => exn::bail!(ErrorKind::TypeNotFound(namespace.to_string(), provider_type.to_string())),
        }
    }

    /// Number of distinct `namespace/type` providers.
    pub fn provider_count(&self) -> usize {
        self.providers.values().map(BTreeMap::len).sum()
    }

    /// Number of versions across all providers.
    pub fn version_count(&self) -> usize {
        self.providers.values().flat_map(BTreeMap::values).map(|v| v.versions.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
