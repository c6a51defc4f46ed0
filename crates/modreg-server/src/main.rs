//! Module registry server
//!
//! Main entry point for the module registry HTTP server.
//! This binary sets up storage, services and the HTTP server with graceful shutdown.

mod config;
mod metrics;
mod telemetry;

use anyhow::{Context, Result};
use axum::{middleware, routing::get, Router};
use clap::Parser;
use modreg_api::{build_router, AppState, HeaderIdentity, MiddlewareConfig};
use modreg_db::{
    close_pool, create_pool, mask_password, BlobStore, FilesystemBlobStore, MemoryBlobStore,
    MemoryPackageStore, PackageStore, PgPool, PoolConfig, PostgresPackageStore,
};
use modreg_service::{ServiceRegistry, StaticQuotaPolicy, SystemClock};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

use crate::config::{BlobBackend, ServerConfig, StoreBackend};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration directory
    #[arg(short, long, env = "CONFIG_DIR", default_value = "config")]
    config_dir: String,

    /// Environment (development, production, etc.)
    #[arg(short, long, env = "ENVIRONMENT", default_value = "development")]
    environment: String,

    /// Server host
    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,

    /// Server port
    #[arg(short, long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Database URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Log level
    #[arg(long, env = "RUST_LOG")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let mut config = ServerConfig::load(&args.config_dir, &args.environment)
        .context("Failed to load configuration")?;

    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(database_url) = args.database_url {
        config.database.url = database_url;
    }
    if let Some(log_level) = args.log_level {
        config.logging.level = log_level;
    }

    telemetry::init_with_config(
        telemetry::TelemetryConfig::new()
            .with_log_level(config.logging.level.clone())
            .with_json_format(config.logging.json_format)
            .with_thread_ids(config.logging.include_thread_ids)
            .with_target(config.logging.include_target),
    );
    metrics::init_metrics();

    info!("Starting module registry server");
    info!("Environment: {}", args.environment);
    info!("Server: {}", config.bind_address());

    let blobs = setup_blob_store(&config).await?;
    let (store, pool) = setup_store(&config, blobs).await?;

    let services = ServiceRegistry::new(
        store.clone(),
        Arc::new(SystemClock),
        Arc::new(StaticQuotaPolicy(config.quota.limits())),
    );

    let identity = HeaderIdentity::new(&config.identity.header)
        .with_context(|| format!("Invalid identity header: {}", config.identity.header))?;

    let state = AppState::new(services, store)
        .with_identity(Arc::new(identity))
        .with_memory_threshold(config.upload.memory_threshold_bytes);

    let app = build_app(state, &config);

    let http_addr: SocketAddr = config
        .bind_address()
        .parse()
        .context("Invalid HTTP bind address")?;

    let listener = tokio::net::TcpListener::bind(http_addr)
        .await
        .context("Failed to bind HTTP server")?;

    info!("HTTP Server listening on http://{}", http_addr);

    if config.server.graceful_shutdown {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("HTTP Server error")?;
    } else {
        axum::serve(listener, app).await.context("HTTP Server error")?;
    }

    if let Some(pool) = pool {
        close_pool(pool).await;
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Assemble the protocol routes, the metrics endpoint and middleware
fn build_app(state: AppState, config: &ServerConfig) -> Router {
    let router = build_router(state)
        .route("/metrics", get(metrics::metrics_handler))
        .layer(middleware::from_fn(metrics::track_metrics));

    MiddlewareConfig::new()
        .with_cors(config.cors.to_middleware())
        .apply(router)
}

async fn setup_blob_store(config: &ServerConfig) -> Result<Arc<dyn BlobStore>> {
    match config.storage.backend {
        BlobBackend::Filesystem => {
            info!(dir = %config.storage.blob_dir.display(), "Using filesystem blob store");
            let blobs = FilesystemBlobStore::new(&config.storage.blob_dir)
                .await
                .context("Failed to open blob directory")?;
            Ok(Arc::new(blobs))
        }
        BlobBackend::Memory => {
            info!("Using in-memory blob store");
            Ok(Arc::new(MemoryBlobStore::new()))
        }
    }
}

async fn setup_store(
    config: &ServerConfig,
    blobs: Arc<dyn BlobStore>,
) -> Result<(Arc<dyn PackageStore>, Option<PgPool>)> {
    match config.database.backend {
        StoreBackend::Memory => {
            info!("Using in-memory package store");
            Ok((Arc::new(MemoryPackageStore::new(blobs)), None))
        }
        StoreBackend::Postgres => {
            let pool = setup_database(config).await?;
            let store = PostgresPackageStore::new(pool.clone(), blobs);
            Ok((Arc::new(store), Some(pool)))
        }
    }
}

/// Setup database connection pool
async fn setup_database(config: &ServerConfig) -> Result<PgPool> {
    info!("Database: {}", mask_password(&config.database.url));

    let pool_config = PoolConfig::new(&config.database.url)
        .min_connections(config.database.min_connections)
        .max_connections(config.database.max_connections)
        .connect_timeout(Duration::from_secs(config.database.connect_timeout_seconds))
        .idle_timeout(Duration::from_secs(config.database.idle_timeout_seconds))
        .max_lifetime(Duration::from_secs(config.database.max_lifetime_seconds))
        .run_migrations(config.database.run_migrations)
        .enable_logging(config.logging.level == "trace");

    let pool = create_pool(&pool_config)
        .await
        .context("Failed to create database connection pool")?;

    info!("Database connection established");
    Ok(pool)
}

/// Graceful shutdown signal handler
///
/// Waits for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
