//! Service configuration.

use std::fmt;
use std::str::FromStr;

use credit_engine::EngineConfig;

/// Which [`credit_engine_store::LedgerStore`] backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// Process-local maps. Data is lost on restart.
    Memory,
    /// `PostgreSQL` at `DATABASE_URL`.
    Postgres,
    /// `RocksDB` under `DATA_DIR` (feature `rocksdb-backend`).
    Rocksdb,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "rocksdb" | "rocks" => Ok(Self::Rocksdb),
            other => Err(format!("unknown storage backend: {other}")),
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Memory => "memory",
            Self::Postgres => "postgres",
            Self::Rocksdb => "rocksdb",
        })
    }
}

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Storage backend (default: postgres when `DATABASE_URL` is set, memory otherwise).
    pub storage_backend: StorageBackend,

    /// `PostgreSQL` connection string.
    pub database_url: Option<String>,

    /// Maximum `PostgreSQL` pool size (default: 10).
    pub database_max_connections: u32,

    /// Path to `RocksDB` data directory (default: "/data/credit-engine").
    pub data_dir: String,

    /// Service API key for service-to-service auth.
    pub service_api_key: Option<String>,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Run the expiry sweep in this process (default: true).
    pub run_sweeper: bool,

    /// Engine configuration.
    pub engine: EngineConfig,
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL").ok();
        let default_backend = if database_url.is_some() {
            StorageBackend::Postgres
        } else {
            StorageBackend::Memory
        };

        let storage_backend = match std::env::var("STORAGE_BACKEND") {
            Ok(raw) => raw.parse().unwrap_or_else(|e: String| {
                tracing::warn!(error = %e, fallback = %default_backend, "Invalid STORAGE_BACKEND");
                default_backend
            }),
            Err(_) => default_backend,
        };

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            storage_backend,
            database_url,
            database_max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            data_dir: std::env::var("DATA_DIR").unwrap_or_else(|_| "/data/credit-engine".into()),
            service_api_key: std::env::var("SERVICE_API_KEY").ok(),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: std::env::var("MAX_BODY_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(64 * 1024), // 64KB
            request_timeout_seconds: std::env::var("REQUEST_TIMEOUT_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
            run_sweeper: std::env::var("RUN_SWEEPER")
                .map(|s| !matches!(s.trim(), "0" | "false" | "no"))
                .unwrap_or(true),
            engine: EngineConfig::from_env(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            storage_backend: StorageBackend::Memory,
            database_url: None,
            database_max_connections: 10,
            data_dir: "/data/credit-engine".into(),
            service_api_key: None,
            cors_origins: vec!["*".into()],
            max_body_bytes: 64 * 1024,
            request_timeout_seconds: 30,
            run_sweeper: true,
            engine: EngineConfig::default(),
        }
    }
}
