//! Application state.

use std::sync::Arc;

use credit_engine::{
    BalanceEngine, Clock, OperationCache, ReservationManager, SystemClock,
};
use credit_engine_store::LedgerStore;

use crate::config::ServiceConfig;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn LedgerStore>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Balance engine.
    pub engine: BalanceEngine,

    /// Hold lifecycle on top of `engine`.
    pub holds: ReservationManager,

    /// Non-durable operation status records.
    pub operations: OperationCache,
}

impl AppState {
    /// Create a new application state using the system clock.
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>, config: ServiceConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Create a new application state with an explicit clock.
    #[must_use]
    pub fn with_clock(
        store: Arc<dyn LedgerStore>,
        config: ServiceConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let engine = BalanceEngine::new(store.clone(), config.engine.clone(), clock.clone());
        let holds = ReservationManager::new(engine.clone());
        let operations = OperationCache::new(config.engine.operation_cache_ttl, clock);

        if config.service_api_key.is_none() {
            tracing::warn!("SERVICE_API_KEY not configured - all /v1 requests will be refused");
        }

        Self {
            store,
            config,
            engine,
            holds,
            operations,
        }
    }
}
