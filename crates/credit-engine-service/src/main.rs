//! Credit engine service entry point.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use credit_engine::HoldSweeper;
use credit_engine_service::{create_router, AppState, ServiceConfig, StorageBackend};
use credit_engine_store::{LedgerStore, MemoryStore, PgStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,credit_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting credit engine service");

    let config = ServiceConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        storage_backend = %config.storage_backend,
        api_key_configured = config.service_api_key.is_some(),
        run_sweeper = config.run_sweeper,
        "Service configuration loaded"
    );

    let store = open_store(&config).await?;
    let state = AppState::new(store, config.clone());

    let cancel = CancellationToken::new();
    let sweeper = config.run_sweeper.then(|| {
        HoldSweeper::new(state.holds.clone())
            .with_operation_cache(state.operations.clone())
            .spawn(cancel.clone())
    });

    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    cancel.cancel();
    if let Some(handle) = sweeper {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Hold sweeper task ended abnormally");
        }
    }

    tracing::info!("Service stopped");
    Ok(())
}

async fn open_store(config: &ServiceConfig) -> Result<Arc<dyn LedgerStore>, Box<dyn std::error::Error>> {
    match config.storage_backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory store; balances are lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StorageBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or("DATABASE_URL is required for the postgres backend")?;
            tracing::info!(max_connections = config.database_max_connections, "Connecting to PostgreSQL");
            let store = PgStore::connect(url, config.database_max_connections).await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
        #[cfg(feature = "rocksdb-backend")]
        StorageBackend::Rocksdb => {
            tracing::info!(path = %config.data_dir, "Opening RocksDB store");
            Ok(Arc::new(credit_engine_store::RocksStore::open(&config.data_dir)?))
        }
        #[cfg(not(feature = "rocksdb-backend"))]
        StorageBackend::Rocksdb => {
            Err("this build has no RocksDB support; rebuild with --features rocksdb-backend".into())
        }
    }
}

/// Resolve on Ctrl-C, or when `cancel` fires.
async fn shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        }
        () = cancel.cancelled() => {}
    }
    cancel.cancel();
}
