//! s3reg: a Terraform provider registry served straight from a bucket.

mod cli;
mod error;
mod logging;
mod server;

use crate::cli::Args;
use crate::error::{ErrorKind, Result};
use clap::Parser;
use exn::ResultExt;
use s3reg_cache::{Cache, Refresh};
use s3reg_config::{Config, Loader, StorageConfig};
use s3reg_registry::RegistryClient;
use s3reg_storage::BackendHandle;
use s3reg_storage::backend::{LocalBackend, TimeoutBackend};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // Logging may not be up yet.
            eprintln!("{err:?}");
            ExitCode::FAILURE
        },
    }
}

async fn run(args: Args) -> Result<()> {
    let mut loader = Loader::new().overrides(args.overrides());
    if let Some(path) = &args.config {
        loader = loader.file(path);
    }
    let config = loader.load().or_raise(|| ErrorKind::Config)?;
    logging::init(&config)?;

    let backend: BackendHandle =
        Arc::new(TimeoutBackend::new(build_backend(&config).await?, config.timeout()));
    let client = Arc::new(RegistryClient::new(backend.clone(), &config.hostname));
    let cache = Arc::new(Cache::new(backend, client.clone()));

    cache.refresh().await.or_raise(|| ErrorKind::Refresh)?;
    if let Some(interval) = config.refresh_interval() {
        tokio::spawn(refresh_periodically(cache.clone(), interval));
    }

    let app = server::router(server::AppState {
        index: cache.clone(),
        refresher: cache,
        client,
    });
    let listener = TcpListener::bind(config.socket_addr()).await.or_raise(|| ErrorKind::Server)?;
    tracing::info!(addr = %config.socket_addr(), hostname = %config.hostname, "Listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await.or_raise(|| ErrorKind::Server)?;
    tracing::info!("Shut down");
    Ok(())
}

async fn build_backend(config: &Config) -> Result<BackendHandle> {
    match &config.storage {
        #[cfg(feature = "s3")]
        StorageConfig::S3(s3) => {
            use s3reg_storage::backend::{S3Backend, S3Credentials};
            let credentials = match (&s3.key_id, &s3.key_secret) {
                (Some(key_id), Some(key_secret)) => Some(S3Credentials {
                    key_id: key_id.clone(),
                    key_secret: key_secret.clone(),
                }),
                _ => None,
            };
            let backend = S3Backend::new(
                "s3",
                s3.bucket.clone(),
                s3.prefix.clone(),
                s3.region.clone(),
                s3.endpoint.clone(),
                credentials,
            )
            .await
            .or_raise(|| ErrorKind::Storage)?;
            Ok(Arc::new(backend))
        },
        #[cfg(not(feature = "s3"))]
        StorageConfig::S3(_) => exn::bail!(ErrorKind::Storage),
        StorageConfig::Local { root } => {
            Ok(Arc::new(LocalBackend::new("local", root).or_raise(|| ErrorKind::Storage)?))
        },
    }
}

async fn refresh_periodically(cache: Arc<Cache>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; startup already refreshed.
    interval.tick().await;
    loop {
        interval.tick().await;
        if let Err(err) = cache.refresh().await {
            tracing::error!(error = ?err, "Scheduled refresh failed");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Unable to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(err) => {
                tracing::error!(error = %err, "Unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("Shutdown requested");
}
