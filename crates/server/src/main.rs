//! Silo server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use silo_core::config::AppConfig;
use silo_metadata::repos::UserRepo;
use silo_metadata::{MetadataStore, SqliteStore};
use silo_server::workers::{GcWorker, LifecycleWorker};
use silo_server::{AppState, create_router};
use silo_storage::{BlobStore, FilesystemStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Silo - a minimal S3-compatible object store
#[derive(Parser, Debug)]
#[command(name = "silod")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "SILO_CONFIG", default_value = "config/server.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("silo v{}", env!("CARGO_PKG_VERSION"));

    // Configuration: optional TOML file, overridable per field via
    // SILO_-prefixed environment variables.
    let mut figment = Figment::new();
    let config_path = std::path::Path::new(&args.config);
    if config_path.exists() {
        tracing::info!(config_path = %args.config, "loading configuration file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!(config_path = %args.config, "no configuration file, using defaults and environment");
    }
    let config: AppConfig = figment
        .merge(Env::prefixed("SILO_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    // Blob store.
    let storage: Arc<dyn BlobStore> = Arc::new(
        FilesystemStore::new(&config.storage.path)
            .await
            .context("failed to initialize blob storage")?,
    );
    storage
        .health_check()
        .await
        .context("blob storage health check failed")?;
    tracing::info!(path = %config.storage.path.display(), "blob storage initialized");

    // Metadata store (migrations run on open).
    let metadata: Arc<dyn MetadataStore> = Arc::new(
        SqliteStore::new(&config.metadata.path)
            .await
            .context("failed to initialize metadata store")?,
    );
    tracing::info!(path = %config.metadata.path.display(), "metadata store initialized");

    // Root credentials for SigV4 clients.
    if let (Some(access_key), Some(secret_key)) = (
        config.auth.root_access_key.clone(),
        config.auth.root_secret_key.clone(),
    ) {
        let user_id = metadata
            .ensure_user(&access_key, &secret_key)
            .await
            .context("failed to ensure root user")?;
        tracing::info!(access_key, user_id, "root user ensured");
    } else if !config.auth.allow_anonymous {
        tracing::warn!(
            "no root credentials configured and anonymous access disabled; \
             no caller will be able to authenticate"
        );
    }

    let state = AppState::new(config.clone(), storage, metadata)
        .context("invalid configuration")?;

    // Background workers run for the life of the process.
    let _lifecycle_task = if config.lifecycle.enabled {
        Some(LifecycleWorker::new(&state).spawn())
    } else {
        tracing::info!("lifecycle worker disabled");
        None
    };
    let _gc_task = if config.gc.enabled {
        Some(GcWorker::new(&state).spawn())
    } else {
        tracing::info!("gc worker disabled");
        None
    };

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    axum::serve(listener, app).await?;

    Ok(())
}
