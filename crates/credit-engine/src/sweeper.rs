//! Background expiry sweep.
//!
//! Runs [`ReservationManager::sweep_expired_holds`] on a fixed interval so holds
//! whose callers crashed or timed out are refunded without intervention.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::operations::OperationCache;
use crate::reservation::ReservationManager;

/// Periodic task cancelling expired holds.
pub struct HoldSweeper {
    manager: ReservationManager,
    interval: Duration,
    operations: Option<OperationCache>,
}

impl HoldSweeper {
    /// Create a sweeper using the engine's configured interval.
    #[must_use]
    pub fn new(manager: ReservationManager) -> Self {
        let interval = manager.engine().config().sweep_interval;
        Self {
            manager,
            interval,
            operations: None,
        }
    }

    /// Override the sweep interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Also purge expired operation records on every tick.
    #[must_use]
    pub fn with_operation_cache(mut self, operations: OperationCache) -> Self {
        self.operations = Some(operations);
        self
    }

    /// Run one sweep now.
    pub async fn tick(&self) {
        if let Err(e) = self.manager.sweep_expired_holds().await {
            warn!(error = %e, "Expired hold sweep failed");
        }
        if let Some(operations) = &self.operations {
            operations.purge_expired();
        }
    }

    /// Sweep every interval until `cancel` fires.
    ///
    /// The first sweep happens one full interval after start.
    pub async fn run(self, cancel: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Hold sweeper started");
        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("Hold sweeper shutting down");
                    return;
                }
                _ = interval.tick() => self.tick().await,
            }
        }
    }

    /// Spawn [`Self::run`] on the current runtime.
    #[must_use]
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use credit_engine_core::{HoldStatus, LedgerReason, Plan, UserId};
    use credit_engine_store::MemoryStore;

    use crate::balance::BalanceEngine;
    use crate::clock::ManualClock;
    use crate::config::EngineConfig;
    use crate::reservation::ReserveRequest;

    #[tokio::test(start_paused = true)]
    async fn sweeps_on_interval_until_cancelled() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = BalanceEngine::new(
            Arc::new(MemoryStore::new()),
            EngineConfig::default(),
            clock.clone(),
        );
        let user_id = UserId::generate();
        engine.open_account(user_id, Plan::Basic).await.unwrap();
        engine
            .apply_delta(&user_id, 5, LedgerReason::CreditPack, None, None)
            .await
            .unwrap();

        let manager = ReservationManager::new(engine);
        let reservation = manager
            .reserve(ReserveRequest::new(user_id, 5).with_ttl(Duration::from_secs(30)))
            .await
            .unwrap();
        clock.advance(chrono::Duration::seconds(31));

        let cancel = CancellationToken::new();
        let handle = HoldSweeper::new(manager.clone())
            .with_interval(Duration::from_secs(10))
            .spawn(cancel.clone());

        tokio::time::sleep(Duration::from_secs(11)).await;
        cancel.cancel();
        handle.await.unwrap();

        let hold = manager.get_hold(&reservation.hold_id).await.unwrap();
        assert_eq!(hold.status, HoldStatus::Canceled);
        assert_eq!(
            manager.engine().get_balance(&user_id).await.unwrap().balance,
            5
        );
    }

    #[tokio::test]
    async fn shuts_down_promptly() {
        let engine = BalanceEngine::new(
            Arc::new(MemoryStore::new()),
            EngineConfig::default(),
            Arc::new(ManualClock::new(Utc::now())),
        );
        let cancel = CancellationToken::new();
        let handle = HoldSweeper::new(ReservationManager::new(engine))
            .with_interval(Duration::from_secs(3600))
            .spawn(cancel.clone());

        cancel.cancel();
        handle.await.unwrap();
    }
}
