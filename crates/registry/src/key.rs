//! Parsing of flat object keys into provider coordinates.
//!
//! Artifact keys follow the layout
//! `namespace/type/version/name_version_os_arch.zip`. Anything else in the
//! bucket (checksums, signatures, key files, directory markers, stray uploads)
//! simply doesn't parse; that is never an error.

use crate::models::Platform;

const ARTIFACT_EXTENSION: &str = ".zip";

/// A provider build archive, borrowed from the object key it was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactKey<'a> {
    pub namespace: &'a str,
    pub provider_type: &'a str,
    /// Version taken from the path segment. The copy embedded in the file
    /// name is not checked against it.
    pub version: &'a str,
    pub name: &'a str,
    pub os: &'a str,
    pub arch: &'a str,
    pub filename: &'a str,
}

impl<'a> ArtifactKey<'a> {
    /// Parse an object key, returning `None` if it isn't a provider archive.
    ///
    /// # Examples
    ///
    /// ```
    /// use s3reg_registry::ArtifactKey;
    ///
    /// let key = ArtifactKey::parse("black/lodge/1.0.1/provider_1.0.1_windows_amd64.zip").unwrap();
    /// assert_eq!(key.version, "1.0.1");
    /// assert_eq!(key.os, "windows");
    ///
    /// assert!(ArtifactKey::parse("black/lodge/1.0.1/shasum").is_none());
    /// ```
    pub fn parse(key: &'a str) -> Option<Self> {
        let mut segments = key.split('/');
        let (namespace, provider_type, version, filename) =
            (segments.next()?, segments.next()?, segments.next()?, segments.next()?);
        if segments.next().is_some() || [namespace, provider_type, version].iter().any(|s| s.is_empty()) {
            return None;
        }
        let stem = filename.strip_suffix(ARTIFACT_EXTENSION)?;
        // From the right, so the provider name itself may contain underscores.
        let mut parts = stem.rsplitn(4, '_');
        let (arch, os, file_version, name) = (parts.next()?, parts.next()?, parts.next()?, parts.next()?);
        if [name, file_version, os, arch].iter().any(|s| s.is_empty()) {
            return None;
        }
        Some(Self {
            namespace,
            provider_type,
            version,
            name,
            os,
            arch,
            filename,
        })
    }

    pub fn platform(&self) -> Platform {
        Platform::new(self.os, self.arch)
    }

    /// Whether this archive belongs to the given provider.
    pub fn is_for(&self, namespace: &str, provider_type: &str) -> bool {
        self.namespace == namespace && self.provider_type == provider_type
    }
}

/// The `namespace/type` prefix of any object key, used to discover which
/// providers exist before looking at their versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProviderKey<'a> {
    pub namespace: &'a str,
    pub provider_type: &'a str,
}

impl<'a> ProviderKey<'a> {
    /// Parse the leading `namespace/type/` of a key. At least one `/` must
    /// follow the type; `black/lodge` on its own is not a provider key, but
    /// the directory marker `black/lodge/` is.
    pub fn parse(key: &'a str) -> Option<Self> {
        let (namespace, rest) = key.split_once('/')?;
        let (provider_type, _) = rest.split_once('/')?;
        if namespace.is_empty() || provider_type.is_empty() {
            return None;
        }
        Some(Self {
            namespace,
            provider_type,
        })
    }
}
