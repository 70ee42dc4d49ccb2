//! HTTP surface of the registry.
//!
//! Every failure is answered with an empty `500`; the error tree only goes to
//! the logs.

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use s3reg_cache::{Refresh, VersionIndex};
use s3reg_registry::{Discovery, DownloadData, ProviderVersions, RegistryClient};
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub index: Arc<dyn VersionIndex>,
    pub refresher: Arc<dyn Refresh>,
    pub client: Arc<RegistryClient>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/.well-known/terraform.json", get(discovery))
        .route("/v1/providers/:namespace/:type/versions", get(list_versions))
        .route("/v1/providers/:namespace/:type/:version/download/:os/:arch", get(download))
        .route("/proxy/:namespace/:type/:version/:filename", get(proxy))
        .route("/refresh", get(refresh))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Classification of a failed request, for the logs only. Clients always see
/// the same empty `500`.
pub trait Failure {
    fn not_found(&self) -> bool;
    fn retryable(&self) -> bool;
}

impl Failure for s3reg_registry::error::ErrorKind {
    fn not_found(&self) -> bool {
        self.is_not_found()
    }

    fn retryable(&self) -> bool {
        self.is_retryable()
    }
}

impl Failure for s3reg_cache::error::ErrorKind {
    fn not_found(&self) -> bool {
        self.is_not_found()
    }

    fn retryable(&self) -> bool {
        self.is_retryable()
    }
}

/// Logs the error and turns it into an empty `500`.
#[derive(Debug)]
pub struct ApiError;

impl<E> From<exn::Exn<E>> for ApiError
where
    E: Failure + std::error::Error + Send + Sync + 'static,
{
    fn from(err: exn::Exn<E>) -> Self {
        let kind: &E = &err;
        tracing::error!(not_found = kind.not_found(), retryable = kind.retryable(), error = ?err, "Request failed");
        Self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }
}

async fn discovery() -> Json<Discovery> {
    Json(Discovery::default())
}

async fn list_versions(
    State(state): State<AppState>,
    Path((namespace, provider_type)): Path<(String, String)>,
) -> Result<Json<ProviderVersions>, ApiError> {
    Ok(Json(state.index.list_versions(&namespace, &provider_type).await?))
}

async fn download(
    State(state): State<AppState>,
    Path((namespace, provider_type, version, os, arch)): Path<(String, String, String, String, String)>,
) -> Result<Json<DownloadData>, ApiError> {
    Ok(Json(state.client.download_data(&namespace, &provider_type, &version, &os, &arch).await?))
}

async fn proxy(
    State(state): State<AppState>,
    Path((namespace, provider_type, version, filename)): Path<(String, String, String, String)>,
) -> Result<Response, ApiError> {
    let object = state.client.proxy(&namespace, &provider_type, &version, &filename).await?;
    let headers = [
        (header::CONTENT_TYPE, object.content_type),
        (header::CONTENT_LENGTH, object.content_length.to_string()),
    ];
    Ok((headers, Body::from_stream(ReaderStream::new(object.body))).into_response())
}

async fn refresh(State(state): State<AppState>) -> Result<&'static str, ApiError> {
    state.refresher.refresh().await?;
    Ok("refreshed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::Request;
    use s3reg_cache::Cache;
    use s3reg_storage::backend::MockBackend;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn state() -> (Arc<MockBackend>, AppState) {
        let backend = Arc::new(MockBackend::with_files([
            ("black/lodge/1.0.0/provider_1.0.0_linux_amd64.zip", "zip-1.0.0-linux"),
            ("black/lodge/1.0.1/provider_1.0.1_linux_amd64.zip", "zip-1.0.1-linux"),
            ("black/lodge/1.0.1/provider_1.0.1_windows_amd64.zip", "zip-1.0.1-windows"),
            ("black/lodge/1.0.1/shasum", "315 coffee"),
            ("black/lodge/1.0.1/key_id", "315"),
            ("black/lodge/1.0.1/keyfile", "Great Northern Hotel Room Key"),
        ]));
        let client = Arc::new(RegistryClient::new(backend.clone(), "twin.peaks"));
        let cache = Arc::new(Cache::new(backend.clone(), client.clone()));
        let state = AppState {
            index: cache.clone(),
            refresher: cache,
            client,
        };
        (backend, state)
    }

    async fn get(app: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(Request::get(uri).body(Body::empty()).unwrap()).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec();
        (status, body)
    }

    fn json(body: &[u8]) -> Value {
        serde_json::from_slice(body).unwrap()
    }

    #[tokio::test]
    async fn test_discovery() {
        let (_, state) = state();
        let (status, body) = get(&router(state), "/.well-known/terraform.json").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body), json!({"providers.v1": "/v1/providers/"}));
    }

    #[tokio::test]
    async fn test_versions_before_refresh_is_500() {
        let (_, state) = state();
        let (status, body) = get(&router(state), "/v1/providers/black/lodge/versions").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_then_versions() {
        let (_, state) = state();
        let app = router(state);
        let (status, body) = get(&app, "/refresh").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"refreshed");

        let (status, body) = get(&app, "/v1/providers/black/lodge/versions").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json(&body),
            json!({
                "id": "black/lodge",
                "versions": [
                    {"version": "1.0.0", "protocols": ["4.0", "5.0"], "platforms": [{"os": "linux", "arch": "amd64"}]},
                    {"version": "1.0.1", "protocols": ["4.0", "5.0"], "platforms": [
                        {"os": "linux", "arch": "amd64"},
                        {"os": "windows", "arch": "amd64"},
                    ]},
                ],
                "warnings": null,
            })
        );
    }

    #[tokio::test]
    async fn test_refresh_failure_is_500() {
        let (backend, state) = state();
        backend.set_unavailable(true);
        let (status, body) = get(&router(state), "/refresh").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_download() {
        let (_, state) = state();
        let (status, body) = get(&router(state), "/v1/providers/black/lodge/1.0.1/download/linux/amd64").await;
        assert_eq!(status, StatusCode::OK);
        let data = json(&body);
        assert_eq!(data["shasum"], "315");
        assert_eq!(data["filename"], "terraform-provider-lodge_1.0.1_linux_amd64.zip");
        assert_eq!(
            data["download_url"],
            "https://twin.peaks/proxy/black/lodge/1.0.1/terraform-provider-lodge_1.0.1_linux_amd64.zip"
        );
        assert_eq!(data["signing_keys"]["gpg_public_keys"][0]["ascii_armor"], "Great Northern Hotel Room Key");
    }

    #[tokio::test]
    async fn test_download_missing_metadata_is_500() {
        let (_, state) = state();
        let (status, body) = get(&router(state), "/v1/providers/black/lodge/1.0.0/download/linux/amd64").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_download_parent_version_is_500() {
        let (backend, state) = state();
        backend.insert("black/shasum", "deadbeef").await;
        backend.insert("black/key_id", "666").await;
        backend.insert("black/keyfile", "Bob's key").await;
        let (status, body) = get(&router(state), "/v1/providers/black/lodge/%2E%2E/download/linux/amd64").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.is_empty());
    }

    #[test]
    fn test_failure_classification() {
        use s3reg_cache::error::ErrorKind as CacheError;
        use s3reg_registry::error::ErrorKind as RegistryError;
        assert!(CacheError::NamespaceNotFound("red".into()).not_found());
        assert!(!CacheError::NamespaceNotFound("red".into()).retryable());
        assert!(CacheError::Listing.retryable());
        assert!(RegistryError::NotFound("black/lodge/9.9.9/shasum".into()).not_found());
        assert!(RegistryError::Storage("black/lodge/".into()).retryable());
        assert!(!RegistryError::MalformedMetadata("black/lodge/1.0.1/key_id".into()).retryable());
    }

    #[tokio::test]
    async fn test_proxy_streams_object() {
        let (_, state) = state();
        let app = router(state);
        let response = app
            .oneshot(Request::get("/proxy/black/lodge/1.0.1/provider_1.0.1_windows_amd64.zip").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "17");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"zip-1.0.1-windows");
    }

    #[tokio::test]
    async fn test_proxy_missing_is_500() {
        let (_, state) = state();
        let (status, body) = get(&router(state), "/proxy/black/lodge/1.0.1/nothing.zip").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let (_, state) = state();
        let (status, _) = get(&router(state), "/v2/providers").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
