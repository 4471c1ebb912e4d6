use anyhow::{Context, Result};
use axum::Router;
use config::{AppConfig, OffloadBackend, RunMode};
use context::{OffloadContext, StartOutcome};
use remote::{ObjectStore, local::LocalObjectStore, s3::S3ObjectStore};
use services::{
    application_service::ApplicationService, lock_service::FileLock,
    offload_service::OffloadService, resume_service::ResumeService,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use state::AppState;
use std::{io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod context;
mod db;
mod errors;
mod handlers;
mod models;
mod remote;
mod routes;
mod services;
mod state;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + run mode ---
    let (cfg, mode) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting resume-offload with config: {:?}", cfg);

    // --- Ensure upload directory exists ---
    let upload_root = cfg.offload.upload_root.clone();
    if !upload_root.exists() {
        std::fs::create_dir_all(&upload_root)
            .with_context(|| format!("creating upload directory {}", upload_root.display()))?;
        tracing::info!("Created upload directory at {}", upload_root.display());
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    tracing::debug!("Connecting using raw URL => {}", db_url);

    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent)?;
        tracing::info!("Created missing directory {:?}", parent);
    }

    let connect_options = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("parsing database URL {db_url}"))?
        .create_if_missing(true);
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?,
    );

    // --- Handle migration mode ---
    if mode == RunMode::Migrate {
        db::run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Offload wiring ---
    let store = build_store(&cfg).await;
    let lock = Arc::new(FileLock::new(&cfg.lock_file));
    tracing::debug!("Offload lock file => {}", lock.path().display());
    let offload = Arc::new(OffloadService::new(store.clone()));
    let ctx = Arc::new(OffloadContext::new(lock, offload, cfg.offload.clone()));

    if mode == RunMode::OffloadOnce {
        match ctx.run_once().await? {
            Some(outcome) => tracing::info!(?outcome, "offload cycle finished"),
            None => tracing::info!("no offload cycle was run"),
        }
        return Ok(());
    }

    match ctx.start_scheduler().await {
        StartOutcome::Started => tracing::info!("offload scheduler running in this process"),
        outcome => tracing::debug!(?outcome, "offload scheduler not started here"),
    }

    // --- Initialize core services ---
    let state = AppState {
        applications: ApplicationService::new(db.clone()),
        resumes: ResumeService::new(upload_root, store, cfg.remote_fetch_timeout),
        offload: ctx.clone(),
    };

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the scheduler and hand the lock back before exiting.
    ctx.shutdown().await;
    db.close().await;

    Ok(())
}

/// Pick the bucket backend for offload and remote reads.
async fn build_store(cfg: &AppConfig) -> Arc<dyn ObjectStore> {
    match cfg.backend {
        OffloadBackend::S3 => Arc::new(
            S3ObjectStore::from_env(cfg.s3_endpoint.as_deref(), cfg.remote_fetch_timeout).await,
        ),
        OffloadBackend::Local => {
            tracing::info!(
                "Using local object store at {}",
                cfg.local_store_dir.display()
            );
            Arc::new(LocalObjectStore::new(&cfg.local_store_dir))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
