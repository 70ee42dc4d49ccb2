//! Configuration loading and validation.
//!
//! Sources are layered, later ones winning:
//!
//! 1. built-in defaults,
//! 2. the per-user file `<config dir>/s3reg/config.toml`, if present,
//! 3. an explicitly given file (TOML, YAML or JSON, by extension),
//! 4. `S3REG_*` environment variables, with `__` separating nested keys
//!    (`S3REG_STORAGE__BUCKET=providers`),
//! 5. command line [`Overrides`].

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "S3REG_";
pub const DEFAULT_REGION: &str = "eu-central-1";
pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Public host name used in download URLs.
    pub hostname: String,
    pub bind: IpAddr,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    /// Upper bound for any single blob store call.
    pub timeout_ms: u64,
    /// Seconds between background refreshes; none when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval: Option<u64>,
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            timeout_ms: 30_000,
            refresh_interval: None,
            storage: StorageConfig::S3(S3Config::default()),
        }
    }
}

impl Config {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        self.refresh_interval.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.hostname.trim().is_empty() {
            exn::bail!(ErrorKind::Invalid("hostname must be set".to_string()));
        }
        if self.timeout_ms == 0 {
            exn::bail!(ErrorKind::Invalid("timeout_ms must be greater than zero".to_string()));
        }
        if self.refresh_interval == Some(0) {
            exn::bail!(ErrorKind::Invalid("refresh_interval must be greater than zero".to_string()));
        }
        match &self.storage {
            StorageConfig::S3(s3) if s3.bucket.trim().is_empty() => {
                exn::bail!(ErrorKind::Invalid("storage.bucket must be set".to_string()))
            },
            StorageConfig::Local { root } if !root.is_absolute() => {
                exn::bail!(ErrorKind::Invalid(format!("storage.root must be absolute: {}", root.display())))
            },
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Where provider objects live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    S3(S3Config),
    Local { root: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Config {
    #[serde(default)]
    pub bucket: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, etc.).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Explicit credentials; the AWS credential chain is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_secret: Option<String>,
}
impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            prefix: None,
            region: default_region(),
            endpoint: None,
            key_id: None,
            key_secret: None,
        }
    }
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

/// Values given on the command line. Unset fields leave lower layers alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub hostname: Option<String>,
    pub bucket: Option<String>,
    pub port: Option<u16>,
    pub log_level: Option<String>,
}

/// Builder for the layered configuration.
#[derive(Debug, Clone)]
pub struct Loader {
    user_file: Option<PathBuf>,
    file: Option<PathBuf>,
    overrides: Overrides,
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

impl Loader {
    pub fn new() -> Self {
        Self {
            user_file: user_config_file(),
            file: None,
            overrides: Overrides::default(),
        }
    }

    /// Skip the per-user config file.
    pub fn without_user_file(mut self) -> Self {
        self.user_file = None;
        self
    }

    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    pub fn overrides(mut self, overrides: Overrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn figment(&self) -> Result<Figment> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));
        if let Some(user_file) = &self.user_file {
            tracing::debug!(path = %user_file.display(), "Merging user configuration file (if present)");
            figment = figment.merge(Toml::file(user_file));
        }
        if let Some(file) = &self.file {
            figment = merge_file(figment, file)?;
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let Overrides {
            hostname,
            bucket,
            port,
            log_level,
        } = &self.overrides;
        if let Some(hostname) = hostname {
            figment = figment.merge(("hostname", hostname));
        }
        if let Some(bucket) = bucket {
            figment = figment.merge(("storage.bucket", bucket));
        }
        if let Some(port) = port {
            figment = figment.merge(("port", port));
        }
        if let Some(log_level) = log_level {
            figment = figment.merge(("log_level", log_level));
        }
        Ok(figment)
    }

    /// Resolve every layer into a validated [`Config`].
    pub fn load(&self) -> Result<Config> {
        let config: Config = self.figment()?.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }
}

fn user_config_file() -> Option<PathBuf> {
    ProjectDirs::from("", "", "s3reg").map(|dirs| dirs.config_dir().join("config.toml"))
}

fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
    if !path.is_file() {
        exn::bail!(ErrorKind::Invalid(format!("configuration file not found: {}", path.display())));
    }
    let extension = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
    Ok(match extension.as_deref() {
        Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
        Some("json") => figment.merge(Json::file(path)),
        _ => figment.merge(Toml::file(path)),
    })
}
