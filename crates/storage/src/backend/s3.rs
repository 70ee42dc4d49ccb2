//! S3-compatible storage backend.
//!
//! This module provides a storage backend implementation for S3-compatible
//! services including AWS S3, MinIO, Backblaze B2, and others.
//!
//! # Credentials
//!
//! If `key_id` and `key_secret` are provided they are used verbatim. Otherwise
//! the standard AWS credential chain (environment, profile, instance metadata)
//! is consulted.

use crate::{
    Object, ObjectInfo, StorageBackend,
    backend::ObjectInfoStream,
    error::{Error, ErrorKind, Result},
    models::DEFAULT_CONTENT_TYPE,
    validate_key,
};
use async_stream::stream;
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, retry::RetryConfig},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
};
use exn::ResultExt;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, instrument};

/// Generous default for concurrent S3 requests.
const DEFAULT_CONCURRENT_REQUESTS: usize = 100;

/// Explicit access key pair for S3-compatible services.
#[derive(Clone)]
pub struct S3Credentials {
    pub key_id: String,
    pub key_secret: String,
}
impl std::fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Credentials").field("key_id", &self.key_id).finish_non_exhaustive()
    }
}

/// S3-compatible storage backend.
///
/// Reads objects from an S3 bucket, optionally under a key prefix. All keys
/// are relative to the configured prefix (if any).
///
/// # Examples
///
/// ```no_run
/// use s3reg_storage::backend::{S3Backend, S3Credentials};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = S3Backend::new(
///     "providers",
///     "my-provider-bucket",
///     Some("registry/".to_string()),
///     "eu-central-1",
///     Some("http://localhost:9000"),
///     Some(S3Credentials { key_id: "minio".into(), key_secret: "minio123".into() }),
/// ).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3Backend {
    name: String,
    client: Client,
    bucket: String,
    prefix: Option<String>,
    /// Rate limiter for concurrent S3 requests.
    rate_limiter: Arc<Semaphore>,
}

impl S3Backend {
    /// Create a new S3 storage backend.
    ///
    /// # Arguments
    /// * `name` - A name for this backend (used in logging)
    /// * `bucket` - S3 bucket name
    /// * `prefix` - Optional key prefix (acts as virtual directory)
    /// * `region` - AWS region or provider-specific region
    /// * `endpoint` - Custom endpoint URL for S3-compatible services
    /// * `credentials` - Explicit access keys; `None` uses the AWS credential chain
    pub async fn new(
        name: impl Into<String>,
        bucket: impl Into<String>,
        prefix: Option<String>,
        region: impl Into<String>,
        endpoint: Option<impl Into<String>>,
        credentials: Option<S3Credentials>,
    ) -> Result<Self> {
        let region = Region::new(region.into());
        let mut config_builder = match credentials {
            Some(creds) => aws_sdk_s3::Config::builder()
                .behavior_version(BehaviorVersion::latest())
                .credentials_provider(Credentials::new(creds.key_id, creds.key_secret, None, None, "s3reg-config"))
                .region(region),
            None => {
                let shared = aws_config::defaults(BehaviorVersion::latest()).region(region).load().await;
                aws_sdk_s3::config::Builder::from(&shared)
            },
        };
        // Exponential backoff: 1 initial attempt + 3 retries
        config_builder = config_builder.retry_config(RetryConfig::standard().with_max_attempts(4));
        if let Some(endpoint_url) = endpoint {
            // Path-style addressing for S3-compatible services (MinIO, etc.)
            config_builder = config_builder.endpoint_url(endpoint_url).force_path_style(true);
        }
        Self::from_client(name, Client::from_conf(config_builder.build()), bucket, prefix)
    }

    /// Wrap an already configured client.
    pub fn from_client(
        name: impl Into<String>,
        client: Client,
        bucket: impl Into<String>,
        prefix: Option<String>,
    ) -> Result<Self> {
        let prefix = prefix.map(validate_key).transpose()?;
        Ok(Self {
            name: name.into(),
            client,
            bucket: bucket.into(),
            prefix,
            rate_limiter: Arc::new(Semaphore::new(DEFAULT_CONCURRENT_REQUESTS)),
        })
    }

    /// Construct the full S3 key from a relative key.
    fn full_key(&self, key: &str) -> Result<String> {
        let validated = validate_key(key)?;
        Ok(join_prefix(self.prefix.as_deref(), &validated))
    }

    /// Acquire a rate limiter permit before making an S3 API call.
    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        self.rate_limiter
            .clone()
            .acquire_owned()
            .await
            .or_raise(|| ErrorKind::BackendError("S3 rate limiter closed".to_string()))
    }
}

/// Prepend the configured base prefix to a (possibly partial) key.
fn join_prefix(base: Option<&str>, key: &str) -> String {
    match base {
        Some(base) => format!("{}/{}", base.trim_end_matches('/'), key),
        None => key.to_string(),
    }
}

/// Strip the configured base prefix from a listed S3 key. Keys outside the
/// base prefix yield `None`. Trailing slashes are preserved.
fn relative_key<'k>(base: Option<&str>, key: &'k str) -> Option<&'k str> {
    match base {
        Some(base) => key.strip_prefix(base.trim_end_matches('/')).and_then(|s| s.strip_prefix('/')),
        None => Some(key),
    }
}

fn map_sdk_error<E>(err: SdkError<E>, key: &str) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&err).to_string();
    let kind = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => ErrorKind::Network(message),
        SdkError::ServiceError(ctx) => match (err.code(), ctx.raw().status().as_u16()) {
            (Some("NoSuchKey" | "NotFound"), _) | (None, 404) => ErrorKind::NotFound(key.to_string()),
            (Some("AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch"), _) | (None, 403) => {
                ErrorKind::PermissionDenied(key.to_string())
            },
            _ => ErrorKind::BackendError(message),
        },
        _ => ErrorKind::BackendError(message),
    };
    exn::Exn::from(kind)
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a str>) -> ObjectInfoStream<'a> {
        let base = self.prefix.as_deref();
        let full_prefix = match (base, prefix) {
            (None, None) => None,
            (base, prefix) => Some(join_prefix(base, prefix.unwrap_or_default())),
        };
        Box::pin(stream! {
            let mut continuation_token: Option<String> = None;
            let mut page = 0usize;
            loop {
                let _permit = match self.acquire_permit().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        yield Err(e);
                        return;
                    },
                };
                let result = self
                    .client
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .set_prefix(full_prefix.clone())
                    .set_continuation_token(continuation_token.take())
                    .send()
                    .await;
                let output = match result {
                    Ok(output) => output,
                    Err(e) => {
                        yield Err(map_sdk_error(e, full_prefix.as_deref().unwrap_or_default()));
                        return;
                    },
                };
                page += 1;
                debug!(bucket = %self.bucket, page, count = output.contents().len(), "listed S3 page");
                for object in output.contents() {
                    let Some(key) = object.key().and_then(|k| relative_key(base, k)) else {
                        continue;
                    };
                    let size = object.size().and_then(|s| u64::try_from(s).ok()).unwrap_or(0);
                    yield Ok(ObjectInfo::new(key, size));
                }
                match output.next_continuation_token() {
                    Some(token) if output.is_truncated().unwrap_or(false) => {
                        continuation_token = Some(token.to_string());
                    },
                    _ => break,
                }
            }
        })
    }

    #[instrument(skip(self), fields(backend = %self.name))]
    async fn exists(&self, key: &str) -> Result<bool> {
        let full_key = self.full_key(key)?;
        let _permit = self.acquire_permit().await?;
        match self.client.head_object().bucket(&self.bucket).key(&full_key).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let err = map_sdk_error(e, key);
                if err.is_not_found() { Ok(false) } else { Err(err) }
            },
        }
    }

    #[instrument(skip(self), fields(backend = %self.name))]
    async fn get(&self, key: &str) -> Result<Object> {
        let full_key = self.full_key(key)?;
        let _permit = self.acquire_permit().await?;
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;
        let content_length = output.content_length().and_then(|l| u64::try_from(l).ok()).unwrap_or(0);
        let content_type = output.content_type().unwrap_or(DEFAULT_CONTENT_TYPE).to_string();
        Ok(Object::new(output.body.into_async_read(), content_length, content_type))
    }
}
