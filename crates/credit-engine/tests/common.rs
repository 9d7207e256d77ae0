//! Common test utilities for credit engine integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use chrono::{TimeZone, Utc};

use credit_engine::{BalanceEngine, EngineConfig, ManualClock, ReservationManager};
use credit_engine_core::{LedgerEntry, LedgerReason, Plan, UserId};
use credit_engine_store::MemoryStore;

/// Test harness wiring an engine to a fresh in-memory store and a manual clock.
pub struct TestHarness {
    /// The balance engine.
    pub engine: BalanceEngine,
    /// The reservation manager sharing the engine.
    pub holds: ReservationManager,
    /// The clock every component reads.
    pub clock: Arc<ManualClock>,
}

impl TestHarness {
    /// Create a harness with default configuration.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create a harness with custom configuration.
    pub fn with_config(config: EngineConfig) -> Self {
        // Mid-morning so short TTLs never cross a cap day by accident.
        let start = Utc.with_ymd_and_hms(2026, 5, 1, 10, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let engine = BalanceEngine::new(Arc::new(MemoryStore::new()), config, clock.clone());
        let holds = ReservationManager::new(engine.clone());
        Self {
            engine,
            holds,
            clock,
        }
    }

    /// Open an account and grant it `balance` credits.
    pub async fn account(&self, plan: Plan, balance: i64) -> UserId {
        let user_id = UserId::generate();
        self.engine
            .open_account(user_id, plan)
            .await
            .expect("Failed to open account");
        if balance > 0 {
            self.engine
                .apply_delta(&user_id, balance, LedgerReason::CreditPack, None, None)
                .await
                .expect("Failed to grant credits");
        }
        user_id
    }

    /// Current balance.
    pub async fn balance(&self, user_id: &UserId) -> i64 {
        self.engine
            .get_balance(user_id)
            .await
            .expect("Failed to read balance")
            .balance
    }

    /// Trial credits used today.
    pub async fn daily_used(&self, user_id: &UserId) -> i64 {
        self.engine
            .get_balance(user_id)
            .await
            .expect("Failed to read balance")
            .daily
            .expect("Account has no daily counter")
            .used
    }

    /// Full ledger, newest first.
    pub async fn ledger(&self, user_id: &UserId) -> Vec<LedgerEntry> {
        self.engine
            .ledger(user_id, 10_000, 0)
            .await
            .expect("Failed to list ledger")
    }

    /// Ledger entries with the given reason.
    pub async fn entries_with(&self, user_id: &UserId, reason: LedgerReason) -> Vec<LedgerEntry> {
        self.ledger(user_id)
            .await
            .into_iter()
            .filter(|entry| entry.reason == reason)
            .collect()
    }
}

/// Engine configuration with a custom trial daily cap.
pub fn config_with_trial_cap(cap: i64) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.policy.trial_daily_cap = cap;
    config
}
