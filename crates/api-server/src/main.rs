//! API server for the task manager
//!
//! Serves the task REST API under `/api/v1` plus health endpoints.

mod config;
mod error;
mod rate_limit;
mod response;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tm_core::cache::{Cache, MemoryCache, NoopCache, RedisCache};
use tm_core::task::{FileTaskStore, SqliteTaskStore, TaskRepository, TaskService};

use crate::config::{AppConfig, CacheBackend, CacheConfig, StoreBackend};
use crate::state::AppState;

const CACHE_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "api_server=debug,tm_core=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env().context("Invalid configuration")?;
    tracing::info!("Environment: {}", config.environment);
    tracing::info!("Using data directory: {:?}", config.data_dir);

    let repository = open_store(&config).await?;
    let cache = connect_cache(&config.cache).await;
    let service = TaskService::new(repository, cache, config.cache.settings());

    let addr = config.listen_addr();
    let app = routes::router(AppState::new(config, service));

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    tracing::info!("REST API listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn TaskRepository>> {
    let repository: Arc<dyn TaskRepository> = match config.store {
        StoreBackend::Sqlite => {
            let path = config.data_dir.join("tasks.db");
            tracing::info!("Opening SQLite store at {:?}", path);
            Arc::new(SqliteTaskStore::open(&path).context("Failed to open SQLite store")?)
        }
        StoreBackend::File => {
            let path = config.data_dir.join("tasks.json");
            tracing::info!("Opening JSON file store at {:?}", path);
            Arc::new(
                FileTaskStore::new(path)
                    .await
                    .context("Failed to open file store")?,
            )
        }
    };
    Ok(repository)
}

/// A cache that cannot be reached leaves the service running uncached
async fn connect_cache(config: &CacheConfig) -> Arc<dyn Cache> {
    match (config.backend, config.redis_url.as_deref()) {
        (CacheBackend::Redis, Some(url)) => {
            match RedisCache::connect(url, config.key_prefix.clone(), CACHE_CONNECT_TIMEOUT).await
            {
                Ok(cache) => Arc::new(cache),
                Err(e) => {
                    tracing::warn!("Redis unavailable, continuing without cache: {}", e);
                    Arc::new(NoopCache)
                }
            }
        }
        (CacheBackend::Memory, _) => {
            tracing::info!("Using in-process cache");
            Arc::new(MemoryCache::new())
        }
        _ => {
            tracing::info!("Caching disabled");
            Arc::new(NoopCache)
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
