use crate::error::{ErrorKind, Result, from_storage};
use crate::key::ArtifactKey;
use crate::models::{DownloadData, GpgPublicKey, Platform, ProviderVersion, ProviderVersions, SigningKeys, protocols};
use async_trait::async_trait;
use futures::TryStreamExt;
use s3reg_storage::{BackendHandle, Object};
use std::collections::BTreeMap;
use tracing::{debug, instrument, trace};

const CHECKSUM_FILE: &str = "shasum";
const SIGNATURE_FILE: &str = "shasum.sig";
const KEY_ID_FILE: &str = "key_id";
const KEY_FILE: &str = "keyfile";

/// Anything that can enumerate the versions of one provider.
#[async_trait]
pub trait VersionSource: Send + Sync {
    async fn list_versions(&self, namespace: &str, provider_type: &str) -> Result<ProviderVersions>;
}

/// Answers registry protocol queries straight from the blob store.
///
/// Nothing is cached here; every call goes to storage.
#[derive(Clone)]
pub struct RegistryClient {
    backend: BackendHandle,
    hostname: String,
}

impl RegistryClient {
    /// `hostname` is the public host name used to build download URLs
    /// (`https://<hostname>/proxy/...`).
    pub fn new(backend: BackendHandle, hostname: impl Into<String>) -> Self {
        Self {
            backend,
            hostname: hostname.into(),
        }
    }

    /// Every version of `namespace/type` found in the blob store, with the
    /// platforms each was built for.
    ///
    /// A provider with no archives yields an empty (but valid) listing.
    #[instrument(skip(self), fields(backend = self.backend.name()))]
    pub async fn list_versions(&self, namespace: &str, provider_type: &str) -> Result<ProviderVersions> {
        let prefix = format!("{namespace}/{provider_type}/");
        let mut stream = self.backend.list_stream(Some(prefix.as_str()));
        let mut versions: BTreeMap<String, Vec<Platform>> = BTreeMap::new();
        while let Some(info) = from_storage(stream.try_next().await, &prefix)? {
            let Some(artifact) = ArtifactKey::parse(&info.key) else {
                continue;
            };
            if !artifact.is_for(namespace, provider_type) {
                continue;
            }
            trace!(key = %info.key, "Adding provider archive");
            versions.entry(artifact.version.to_string()).or_default().push(artifact.platform());
        }
        debug!(count = versions.len(), "Listed provider versions");
        Ok(ProviderVersions {
            versions: versions
                .into_iter()
                .map(|(version, platforms)| ProviderVersion {
                    version,
                    protocols: protocols(),
                    platforms,
                })
                .collect(),
            ..ProviderVersions::empty(namespace, provider_type)
        })
    }

    /// Download metadata for one provider build, assembled from the
    /// `shasum`, `key_id` and `keyfile` objects stored next to the archives.
    #[instrument(skip(self), fields(backend = self.backend.name()))]
    pub async fn download_data(
        &self,
        namespace: &str,
        provider_type: &str,
        version: &str,
        os: &str,
        arch: &str,
    ) -> Result<DownloadData> {
        let base_path = format!("{namespace}/{provider_type}/{version}");
        require_plain_segments(&base_path, &[namespace, provider_type, version, os, arch])?;
        let base_url = format!("https://{}/proxy/{base_path}", self.hostname);
        let (checksum_key, key_id_key, keyfile_key) =
            (format!("{base_path}/{CHECKSUM_FILE}"), format!("{base_path}/{KEY_ID_FILE}"), format!("{base_path}/{KEY_FILE}"));

        debug!(key = %checksum_key, "Fetching checksum and signing key");
        let (checksum, key_id, keyfile) = futures::try_join!(
            self.read_text(&checksum_key),
            self.read_text(&key_id_key),
            self.read_text(&keyfile_key),
        )?;

        let shasum = extract_checksum(&checksum);
        if shasum.is_empty() {
            exn::bail!(ErrorKind::MalformedMetadata(checksum_key));
        }
        let key_id = key_id.trim();
        if key_id.is_empty() {
            exn::bail!(ErrorKind::MalformedMetadata(key_id_key));
        }
        if keyfile.trim().is_empty() {
            exn::bail!(ErrorKind::MalformedMetadata(keyfile_key));
        }

        let filename = format!("terraform-provider-{provider_type}_{version}_{os}_{arch}.zip");
        Ok(DownloadData {
            protocols: protocols(),
            os: os.to_string(),
            arch: arch.to_string(),
            download_url: format!("{base_url}/{filename}"),
            shasums_url: format!("{base_url}/{CHECKSUM_FILE}"),
            shasums_signature_url: format!("{base_url}/{SIGNATURE_FILE}"),
            shasum: shasum.to_string(),
            signing_keys: SigningKeys {
                gpg_public_keys: vec![GpgPublicKey {
                    key_id: key_id.to_string(),
                    ascii_armor: keyfile,
                    ..Default::default()
                }],
            },
            filename,
        })
    }

    /// Open `namespace/type/version/filename` for streaming. The body is
    /// returned unread.
    #[instrument(skip(self), fields(backend = self.backend.name()))]
    pub async fn proxy(&self, namespace: &str, provider_type: &str, version: &str, filename: &str) -> Result<Object> {
        let key = format!("{namespace}/{provider_type}/{version}/{filename}");
        require_plain_segments(&key, &[namespace, provider_type, version, filename])?;
        debug!(%key, "Proxying object");
        from_storage(self.backend.get(&key).await, &key)
    }

    async fn read_text(&self, key: &str) -> Result<String> {
        let bytes = from_storage(self.backend.read(key).await, key)?;
        String::from_utf8(bytes).map_err(|_| exn::Exn::from(ErrorKind::MalformedMetadata(key.to_string())))
    }
}

#[async_trait]
impl VersionSource for RegistryClient {
    async fn list_versions(&self, namespace: &str, provider_type: &str) -> Result<ProviderVersions> {
        RegistryClient::list_versions(self, namespace, provider_type).await
    }
}

/// Request parameters become key segments verbatim. Anything the backends
/// would resolve to a different directory is reported as missing `key`.
fn require_plain_segments(key: &str, segments: &[&str]) -> Result<()> {
    if segments.iter().any(|s| matches!(*s, "" | "." | "..") || s.contains('/')) {
        exn::bail!(ErrorKind::NotFound(key.to_string()));
    }
    Ok(())
}

/// The digest is the first token of a `sha256sum`-style line; a file holding
/// only the digest works too.
fn extract_checksum(content: &str) -> &str {
    content.split(char::is_whitespace).next().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use s3reg_storage::backend::MockBackend;
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;

    fn lodge_backend() -> MockBackend {
        MockBackend::with_files([
            ("black/lodge/", ""),
            ("black/lodge/1.0.0/", ""),
            ("black/lodge/1.0.0/provider_1.0.0_linux_amd64.zip", "zip-1.0.0-linux"),
            ("black/lodge/1.0.1/provider_1.0.1_linux_amd64.zip", "zip-1.0.1-linux"),
            ("black/lodge/1.0.1/provider_1.0.1_windows_amd64.zip", "zip-1.0.1-windows"),
            ("black/lodge/1.0.1/shasum", "315 coffee"),
            ("black/lodge/1.0.1/shasum.sig", "signature"),
            ("black/lodge/1.0.1/key_id", "315\n"),
            ("black/lodge/1.0.1/keyfile", "Great Northern Hotel Room Key"),
            ("white/lodge/1.0.0/provider_1.0.0_linux_amd64.zip", "elsewhere"),
        ])
    }

    fn client(backend: MockBackend) -> RegistryClient {
        RegistryClient::new(Arc::new(backend), "twin.peaks")
    }

    #[rstest]
    #[case("abc123  terraform-provider-foo_1.0.0_linux_amd64.zip", "abc123")]
    #[case("315 coffee", "315")]
    #[case("abc123\n", "abc123")]
    #[case("abc123", "abc123")]
    #[case("", "")]
    fn test_extract_checksum(#[case] content: &str, #[case] expected: &str) {
        assert_eq!(extract_checksum(content), expected);
    }

    #[tokio::test]
    async fn test_list_versions() {
        let versions = client(lodge_backend()).list_versions("black", "lodge").await.unwrap();
        assert_eq!(
            versions,
            ProviderVersions {
                id: "black/lodge".to_string(),
                versions: vec![
                    ProviderVersion {
                        version: "1.0.0".to_string(),
                        protocols: vec!["4.0".to_string(), "5.0".to_string()],
                        platforms: vec![Platform::new("linux", "amd64")],
                    },
                    ProviderVersion {
                        version: "1.0.1".to_string(),
                        protocols: vec!["4.0".to_string(), "5.0".to_string()],
                        platforms: vec![Platform::new("linux", "amd64"), Platform::new("windows", "amd64")],
                    },
                ],
                warnings: None,
            }
        );
    }

    #[tokio::test]
    async fn test_list_versions_plain_string_order() {
        let backend = MockBackend::with_keys([
            "a/b/1.9.0/p_1.9.0_linux_amd64.zip",
            "a/b/1.10.0/p_1.10.0_linux_amd64.zip",
            "a/b/1.10.0/p_1.10.0_linux_amd64.zip.bak",
        ]);
        let versions = client(backend).list_versions("a", "b").await.unwrap();
        let listed: Vec<_> = versions.versions.iter().map(|v| v.version.as_str()).collect();
        assert_eq!(listed, vec!["1.10.0", "1.9.0"]);
    }

    #[tokio::test]
    async fn test_list_versions_keeps_duplicate_platforms() {
        let backend = MockBackend::with_keys([
            "a/b/1.0.0/p_1.0.0_linux_amd64.zip",
            "a/b/1.0.0/other_1.0.0_linux_amd64.zip",
        ]);
        let versions = client(backend).list_versions("a", "b").await.unwrap();
        assert_eq!(versions.versions.len(), 1);
        assert_eq!(versions.versions[0].platforms.len(), 2);
    }

    #[tokio::test]
    async fn test_list_versions_unknown_provider_is_empty() {
        let versions = client(lodge_backend()).list_versions("red", "room").await.unwrap();
        assert_eq!(versions, ProviderVersions::empty("red", "room"));
    }

    #[tokio::test]
    async fn test_list_versions_storage_failure() {
        let backend = lodge_backend();
        backend.set_unavailable(true);
        let err = client(backend).list_versions("black", "lodge").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Storage(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_download_data() {
        let data = client(lodge_backend()).download_data("black", "lodge", "1.0.1", "linux", "amd64").await.unwrap();
        assert_eq!(
            data,
            DownloadData {
                protocols: vec!["4.0".to_string(), "5.0".to_string()],
                os: "linux".to_string(),
                arch: "amd64".to_string(),
                filename: "terraform-provider-lodge_1.0.1_linux_amd64.zip".to_string(),
                download_url: "https://twin.peaks/proxy/black/lodge/1.0.1/terraform-provider-lodge_1.0.1_linux_amd64.zip"
                    .to_string(),
                shasums_url: "https://twin.peaks/proxy/black/lodge/1.0.1/shasum".to_string(),
                shasums_signature_url: "https://twin.peaks/proxy/black/lodge/1.0.1/shasum.sig".to_string(),
                shasum: "315".to_string(),
                signing_keys: SigningKeys {
                    gpg_public_keys: vec![GpgPublicKey {
                        key_id: "315".to_string(),
                        ascii_armor: "Great Northern Hotel Room Key".to_string(),
                        trust_signature: String::new(),
                        source: String::new(),
                        source_url: String::new(),
                    }],
                },
            }
        );
    }

    #[rstest]
    #[case::checksum("black/lodge/1.0.1/shasum")]
    #[case::key_id("black/lodge/1.0.1/key_id")]
    #[case::keyfile("black/lodge/1.0.1/keyfile")]
    #[tokio::test]
    async fn test_download_data_missing_sibling(#[case] missing: &str) {
        let backend = lodge_backend();
        backend.remove(missing).await;
        let err = client(backend).download_data("black", "lodge", "1.0.1", "linux", "amd64").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(key) if key == missing));
    }

    #[tokio::test]
    async fn test_download_data_failing_sibling() {
        let backend = lodge_backend();
        backend.fail_key("black/lodge/1.0.1/keyfile").await;
        let err = client(backend).download_data("black", "lodge", "1.0.1", "linux", "amd64").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Storage(_)));
    }

    #[rstest]
    #[case::empty_checksum("black/lodge/1.0.1/shasum", Vec::new())]
    #[case::leading_space_checksum("black/lodge/1.0.1/shasum", b" 315 coffee".to_vec())]
    #[case::blank_key_id("black/lodge/1.0.1/key_id", b"  \n".to_vec())]
    #[case::blank_keyfile("black/lodge/1.0.1/keyfile", b"\n\n".to_vec())]
    #[case::binary_keyfile("black/lodge/1.0.1/keyfile", vec![0xff, 0xfe, 0x00])]
    #[tokio::test]
    async fn test_download_data_malformed(#[case] key: &str, #[case] content: Vec<u8>) {
        let backend = lodge_backend();
        backend.insert(key, content).await;
        let err = client(backend).download_data("black", "lodge", "1.0.1", "linux", "amd64").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::MalformedMetadata(k) if k == key));
    }

    #[rstest]
    #[case::parent_version("black", "lodge", "..", "linux", "amd64")]
    #[case::current_version("black", "lodge", ".", "linux", "amd64")]
    #[case::parent_type("black", "..", "1.0.1", "linux", "amd64")]
    #[case::nested_namespace("black/lodge", "lodge", "1.0.1", "linux", "amd64")]
    #[case::empty_os("black", "lodge", "1.0.1", "", "amd64")]
    #[case::parent_arch("black", "lodge", "1.0.1", "linux", "..")]
    #[tokio::test]
    async fn test_download_data_rejects_relative_segments(
        #[case] namespace: &str,
        #[case] provider_type: &str,
        #[case] version: &str,
        #[case] os: &str,
        #[case] arch: &str,
    ) {
        // Signing metadata one level up must never be served for another provider.
        let backend = lodge_backend();
        backend.insert("black/shasum", "deadbeef").await;
        backend.insert("black/key_id", "666").await;
        backend.insert("black/keyfile", "Bob's key").await;
        backend.insert("black/lodge/shasum", "deadbeef").await;
        backend.insert("black/lodge/key_id", "666").await;
        backend.insert("black/lodge/keyfile", "Bob's key").await;
        let err = client(backend).download_data(namespace, provider_type, version, os, arch).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_proxy() {
        let client = client(lodge_backend());
        let mut object = client.proxy("black", "lodge", "1.0.1", "provider_1.0.1_windows_amd64.zip").await.unwrap();
        assert_eq!(object.content_type, "application/zip");
        assert_eq!(object.content_length, 17);
        let mut body = String::new();
        object.body.read_to_string(&mut body).await.unwrap();
        assert_eq!(body, "zip-1.0.1-windows");
    }

    #[tokio::test]
    async fn test_proxy_not_found() {
        let err = client(lodge_backend()).proxy("black", "lodge", "9.9.9", "nothing.zip").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(key) if key == "black/lodge/9.9.9/nothing.zip"));
    }

    #[rstest]
    #[case("..", "lodge", "1.0.1", "shasum")]
    #[case("black", "lodge", ".", "shasum")]
    #[case("black", "lodge", "1.0.1", "")]
    #[tokio::test]
    async fn test_proxy_rejects_relative_segments(
        #[case] namespace: &str,
        #[case] provider_type: &str,
        #[case] version: &str,
        #[case] filename: &str,
    ) {
        let err = client(lodge_backend()).proxy(namespace, provider_type, version, filename).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_version_source() {
        let source: Arc<dyn VersionSource> = Arc::new(client(lodge_backend()));
        let versions = source.list_versions("white", "lodge").await.unwrap();
        assert_eq!(versions.id, "white/lodge");
        assert_eq!(versions.versions.len(), 1);
    }
}
