//! Wire types of the Terraform provider registry protocol.

use serde::{Deserialize, Serialize};

/// Plugin protocol versions advertised for every provider build.
pub const PROTOCOLS: [&str; 2] = ["4.0", "5.0"];

pub(crate) fn protocols() -> Vec<String> {
    PROTOCOLS.iter().map(|p| p.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}
impl Platform {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderVersion {
    pub version: String,
    pub protocols: Vec<String>,
    pub platforms: Vec<Platform>,
}

/// Every known version of one `namespace/type` provider.
///
/// Versions are ordered by plain string comparison, so `"1.10.0"` sorts
/// before `"1.9.0"`. Terraform does its own semver resolution client-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderVersions {
    pub id: String,
    pub versions: Vec<ProviderVersion>,
    /// Always serialized; `null` when there is nothing to report.
    pub warnings: Option<Vec<String>>,
}
impl ProviderVersions {
    pub fn empty(namespace: &str, provider_type: &str) -> Self {
        Self {
            id: format!("{namespace}/{provider_type}"),
            versions: Vec::new(),
            warnings: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpgPublicKey {
    pub key_id: String,
    pub ascii_armor: String,
    pub trust_signature: String,
    pub source: String,
    pub source_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningKeys {
    pub gpg_public_keys: Vec<GpgPublicKey>,
}

/// Everything Terraform needs to fetch and verify one provider build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadData {
    pub protocols: Vec<String>,
    pub os: String,
    pub arch: String,
    pub filename: String,
    pub download_url: String,
    pub shasums_url: String,
    pub shasums_signature_url: String,
    pub shasum: String,
    pub signing_keys: SigningKeys,
}

/// Service discovery document served at `/.well-known/terraform.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discovery {
    #[serde(rename = "providers.v1")]
    pub providers_v1: String,
}
impl Default for Discovery {
    fn default() -> Self {
        Self {
            providers_v1: "/v1/providers/".to_string(),
        }
    }
}
