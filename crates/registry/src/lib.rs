//! Terraform provider registry protocol on top of a flat blob store.
//!
//! Object keys encode everything: `namespace/type/version/` holds one
//! `name_version_os_arch.zip` archive per platform, plus the `shasum`,
//! `shasum.sig`, `key_id` and `keyfile` objects shared by all of them.
//! [`RegistryClient`] turns that layout into protocol responses.

mod client;
pub mod error;
mod key;
pub mod models;

pub use crate::client::{RegistryClient, VersionSource};
pub use crate::key::{ArtifactKey, ProviderKey};
pub use crate::models::{DownloadData, Discovery, Platform, ProviderVersion, ProviderVersions};
