//! Reservation manager.
//!
//! A reservation takes credits from the account and records a `reserved` hold in
//! one conditional write. The hold then settles exactly once: `commit` keeps the
//! credits, `cancel` (or the expiry sweep) returns them with a single
//! `refund_hold` entry keyed `refund_<hold_id>`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use credit_engine_core::{
    EngineError, Hold, HoldId, HoldSplit, HoldStatus, LedgerEntry, LedgerReason, Result, UserId,
};
use credit_engine_store::HoldWrite;

use crate::balance::{BalanceEngine, ChangeOutcome, ChangeRequest, PlannedChange};

/// Parameters for [`ReservationManager::reserve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveRequest {
    /// The account to debit.
    pub user_id: UserId,

    /// Credits to hold. Must be positive.
    pub amount: i64,

    /// Hold lifetime. Defaults to the engine's `default_hold_ttl`.
    pub ttl: Option<Duration>,

    /// Caller-chosen hold id, doubling as the idempotency key. Generated if absent.
    pub hold_id: Option<HoldId>,

    /// Free-form context stored on the `reserve` ledger entry.
    pub metadata: Option<serde_json::Value>,
}

impl ReserveRequest {
    /// A request with the default TTL and a generated hold id.
    #[must_use]
    pub const fn new(user_id: UserId, amount: i64) -> Self {
        Self {
            user_id,
            amount,
            ttl: None,
            hold_id: None,
            metadata: None,
        }
    }

    /// Use a caller-chosen hold id.
    #[must_use]
    pub fn with_hold_id(mut self, hold_id: HoldId) -> Self {
        self.hold_id = Some(hold_id);
        self
    }

    /// Override the hold lifetime.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Result of [`ReservationManager::reserve`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// The hold.
    pub hold_id: HoldId,
    /// Balance right after the reserve entry was written.
    pub balance_after: i64,
    /// When the sweep may cancel the hold.
    pub expires_at: DateTime<Utc>,
    /// Where the held credits came from.
    pub split: HoldSplit,
    /// The hold's current status (not `reserved` only for a replay).
    pub status: HoldStatus,
    /// `true` if the hold id had already been reserved.
    pub replayed: bool,
}

/// Result of one [`ReservationManager::sweep_expired_holds`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Expired holds examined.
    pub scanned: usize,
    /// Holds this pass canceled and refunded.
    pub canceled: usize,
    /// Holds that settled concurrently before this pass reached them.
    pub already_settled: usize,
    /// Holds whose cancel failed; they stay `reserved` for the next pass.
    pub failed: usize,
}

/// How a cancel attempt ended.
enum CancelResult {
    /// This call wrote the refund.
    Refunded,
    /// The hold was already terminal.
    AlreadySettled(HoldStatus),
}

/// Creates and settles holds on top of the balance engine.
#[derive(Clone)]
pub struct ReservationManager {
    engine: BalanceEngine,
}

impl ReservationManager {
    /// Create a manager sharing `engine`'s store, clock and configuration.
    #[must_use]
    pub const fn new(engine: BalanceEngine) -> Self {
        Self { engine }
    }

    /// The underlying balance engine.
    #[must_use]
    pub const fn engine(&self) -> &BalanceEngine {
        &self.engine
    }

    // ===== Reserve =====

    /// Hold `amount` credits for an operation that is about to start.
    ///
    /// Trial accounts draw from today's daily cap first; the rest (or all of it,
    /// for other plans) comes from the balance. Reusing a hold id returns the
    /// existing hold without a second debit.
    ///
    /// # Errors
    ///
    /// - `EngineError::InvalidAmount` for a non-positive amount or zero TTL.
    /// - `EngineError::AccountNotFound` if the account doesn't exist.
    /// - `EngineError::InsufficientCredits` if the balance cannot cover its portion.
    /// - `EngineError::DailyCapExceeded` if trial overflow is set to reject.
    /// - `EngineError::IdempotencyConflict` if the hold id is taken by another
    ///   account or by an entry that is not a reservation.
    /// - `EngineError::ConcurrencyConflict` after exhausting write attempts.
    pub async fn reserve(&self, request: ReserveRequest) -> Result<Reservation> {
        if request.amount <= 0 {
            return Err(EngineError::InvalidAmount(format!(
                "reserve amount must be positive, got {}",
                request.amount
            )));
        }
        let ttl = request.ttl.unwrap_or(self.engine.config().default_hold_ttl);
        if ttl.is_zero() {
            return Err(EngineError::InvalidAmount("hold ttl must be positive".into()));
        }
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|_| EngineError::InvalidAmount("hold ttl out of range".into()))?;

        let user_id = request.user_id;
        let amount = request.amount;
        let hold_id = request.hold_id.unwrap_or_else(HoldId::generate);
        let tracker = *self.engine.tracker();

        let change = ChangeRequest {
            user_id,
            reason: LedgerReason::Reserve,
            idempotency_key: Some(hold_id.reserve_key()),
            metadata: request.metadata.unwrap_or(serde_json::Value::Null),
        };

        let outcome = self
            .engine
            .apply_change(change, |account, now| {
                let is_trial = account.plan.is_trial();
                let split = match account.daily.as_mut() {
                    Some(daily) if is_trial => {
                        let today = tracker.today(now);
                        tracker.rollover(daily, today);
                        let split = tracker.plan_debit(daily, amount, today)?;
                        daily.used += split.daily_portion;
                        split
                    }
                    _ => HoldSplit::balance_only(amount),
                };

                let hold = Hold {
                    id: hold_id.clone(),
                    user_id,
                    amount,
                    split: split.clone(),
                    status: HoldStatus::Reserved,
                    created_at: now,
                    expires_at: now + ttl,
                    settled_at: None,
                };

                Ok(PlannedChange {
                    delta: -split.balance_portion,
                    daily_delta: split.daily_portion,
                    hold: Some(HoldWrite::Insert(hold)),
                })
            })
            .await?;

        match outcome {
            ChangeOutcome::Applied { account, entry } => {
                let hold = self.load_hold(&hold_id).await?;
                info!(
                    user_id = %user_id,
                    hold_id = %hold_id,
                    amount,
                    daily_portion = hold.split.daily_portion,
                    balance = account.balance,
                    "Credits reserved"
                );
                Ok(Reservation {
                    hold_id,
                    balance_after: entry.balance_after,
                    expires_at: hold.expires_at,
                    split: hold.split,
                    status: hold.status,
                    replayed: false,
                })
            }
            ChangeOutcome::Replayed { entry } => {
                if entry.reason != LedgerReason::Reserve {
                    return Err(EngineError::IdempotencyConflict {
                        key: hold_id.to_string(),
                    });
                }
                let hold = self.load_hold(&hold_id).await?;
                debug!(user_id = %user_id, hold_id = %hold_id, status = %hold.status, "Reserve replayed");
                Ok(Reservation {
                    hold_id,
                    balance_after: entry.balance_after,
                    expires_at: hold.expires_at,
                    split: hold.split,
                    status: hold.status,
                    replayed: true,
                })
            }
            ChangeOutcome::HoldConflict => Err(EngineError::IdempotencyConflict {
                key: hold_id.to_string(),
            }),
        }
    }

    // ===== Settlement =====

    /// Keep the held credits. No balance change.
    ///
    /// Committing a hold that already settled (including one the sweep canceled)
    /// returns its current status unchanged.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::HoldNotFound` if the hold doesn't exist.
    pub async fn commit(&self, hold_id: &HoldId) -> Result<HoldStatus> {
        let hold = self.require_hold(hold_id).await?;
        if hold.status != HoldStatus::Reserved {
            debug!(hold_id = %hold_id, status = %hold.status, "Commit on settled hold");
            return Ok(hold.status);
        }

        let now = self.engine.clock().now();
        let moved = self
            .engine
            .store()
            .transition_hold(hold_id, HoldStatus::Reserved, HoldStatus::Committed, now)
            .await?;

        if moved {
            info!(user_id = %hold.user_id, hold_id = %hold_id, amount = hold.amount, "Hold committed");
            return Ok(HoldStatus::Committed);
        }

        let current = self.require_hold(hold_id).await?;
        debug!(hold_id = %hold_id, status = %current.status, "Commit lost a race");
        Ok(current.status)
    }

    /// Return the held credits and mark the hold `canceled`.
    ///
    /// Whatever the interleaving of cancels, commits and sweeps, a hold gets at most
    /// one refund; calls that lose return the status that won.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::HoldNotFound` if the hold doesn't exist,
    /// `EngineError::IdempotencyConflict` if the hold's refund key holds some
    /// other entry, or `EngineError::ConcurrencyConflict` after exhausting write
    /// attempts.
    pub async fn cancel(&self, hold_id: &HoldId) -> Result<HoldStatus> {
        let hold = self.require_hold(hold_id).await?;
        match self.cancel_hold(&hold).await? {
            CancelResult::Refunded => Ok(HoldStatus::Canceled),
            CancelResult::AlreadySettled(status) => Ok(status),
        }
    }

    async fn cancel_hold(&self, hold: &Hold) -> Result<CancelResult> {
        if hold.status != HoldStatus::Reserved {
            debug!(hold_id = %hold.id, status = %hold.status, "Cancel on settled hold");
            return Ok(CancelResult::AlreadySettled(hold.status));
        }

        let tracker = *self.engine.tracker();
        let split = hold.split.clone();
        let hold_id = hold.id.clone();

        let change = ChangeRequest {
            user_id: hold.user_id,
            reason: LedgerReason::RefundHold,
            idempotency_key: Some(hold.id.refund_key()),
            metadata: serde_json::json!({ "hold_id": hold.id.as_str() }),
        };

        let outcome = self
            .engine
            .apply_change(change, |account, now| {
                let mut restored = 0;
                if let Some(daily) = account.daily.as_mut() {
                    let today = tracker.today(now);
                    tracker.rollover(daily, today);
                    restored = tracker.plan_refund(daily, &split, today);
                }

                Ok(PlannedChange {
                    delta: split.balance_portion,
                    daily_delta: -restored,
                    hold: Some(HoldWrite::Transition {
                        id: hold_id.clone(),
                        from: HoldStatus::Reserved,
                        to: HoldStatus::Canceled,
                        at: now,
                    }),
                })
            })
            .await?;

        match outcome {
            ChangeOutcome::Applied { account, entry } => {
                info!(
                    user_id = %hold.user_id,
                    hold_id = %hold.id,
                    refunded = entry.delta,
                    daily_restored = -entry.daily_delta,
                    balance = account.balance,
                    "Hold canceled"
                );
                Ok(CancelResult::Refunded)
            }
            ChangeOutcome::Replayed { entry } if !is_refund_of(&entry, &hold.id) => {
                error!(
                    hold_id = %hold.id,
                    reason = %entry.reason,
                    "Refund key taken by an unrelated entry"
                );
                Err(EngineError::IdempotencyConflict {
                    key: hold.id.refund_key().to_string(),
                })
            }
            ChangeOutcome::Replayed { .. } | ChangeOutcome::HoldConflict => {
                let current = self.require_hold(&hold.id).await?;
                debug!(hold_id = %hold.id, status = %current.status, "Cancel lost a race");
                Ok(CancelResult::AlreadySettled(current.status))
            }
        }
    }

    // ===== Queries =====

    /// Look up a hold.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::HoldNotFound` if the hold doesn't exist.
    pub async fn get_hold(&self, hold_id: &HoldId) -> Result<Hold> {
        self.load_hold(hold_id).await
    }

    /// Holds for an account, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn holds_for_user(
        &self,
        user_id: &UserId,
        status: Option<HoldStatus>,
        limit: usize,
    ) -> Result<Vec<Hold>> {
        Ok(self
            .engine
            .store()
            .list_holds_by_user(user_id, status, limit)
            .await?)
    }

    async fn load_hold(&self, hold_id: &HoldId) -> Result<Hold> {
        self.engine
            .store()
            .get_hold(hold_id)
            .await?
            .ok_or_else(|| EngineError::HoldNotFound {
                hold_id: hold_id.to_string(),
            })
    }

    /// Like `load_hold`, but a miss is logged as a caller error.
    async fn require_hold(&self, hold_id: &HoldId) -> Result<Hold> {
        let result = self.load_hold(hold_id).await;
        if let Err(EngineError::HoldNotFound { .. }) = &result {
            error!(hold_id = %hold_id, "Settlement for unknown hold");
        }
        result
    }

    // ===== Expiry =====

    /// Cancel every `reserved` hold past its expiry.
    ///
    /// Each hold goes through the same refund path as [`Self::cancel`], so the end
    /// state is identical and concurrent sweeps or cancels never double-refund.
    ///
    /// # Errors
    ///
    /// Returns an error only if listing expired holds fails; per-hold failures are
    /// counted in the report.
    pub async fn sweep_expired_holds(&self) -> Result<SweepReport> {
        let batch_size = self.engine.config().sweep_batch_size.max(1);
        let mut report = SweepReport::default();

        loop {
            let now = self.engine.clock().now();
            let batch = self
                .engine
                .store()
                .list_expired_holds(now, batch_size)
                .await?;
            let batch_len = batch.len();
            let mut settled = 0;

            for hold in batch {
                report.scanned += 1;
                match self.cancel_hold(&hold).await {
                    Ok(CancelResult::Refunded) => {
                        report.canceled += 1;
                        settled += 1;
                    }
                    Ok(CancelResult::AlreadySettled(_)) => {
                        report.already_settled += 1;
                        settled += 1;
                    }
                    Err(e) => {
                        warn!(hold_id = %hold.id, user_id = %hold.user_id, error = %e, "Failed to cancel expired hold");
                        report.failed += 1;
                    }
                }
            }

            // A short batch is the last one; a batch with no progress would repeat forever.
            if batch_len < batch_size || settled == 0 {
                break;
            }
        }

        if report.canceled > 0 || report.failed > 0 {
            info!(
                scanned = report.scanned,
                canceled = report.canceled,
                already_settled = report.already_settled,
                failed = report.failed,
                "Expired hold sweep finished"
            );
        } else {
            debug!(scanned = report.scanned, "Expired hold sweep found nothing to cancel");
        }

        Ok(report)
    }
}

/// Whether `entry` is the refund written for `hold_id`.
fn is_refund_of(entry: &LedgerEntry, hold_id: &HoldId) -> bool {
    let refunded = entry
        .metadata
        .get("hold_id")
        .and_then(serde_json::Value::as_str);
    entry.reason == LedgerReason::RefundHold && refunded == Some(hold_id.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::clock::ManualClock;
    use crate::config::EngineConfig;
    use credit_engine_core::Plan;
    use credit_engine_store::MemoryStore;

    async fn funded(balance: i64) -> (ReservationManager, Arc<ManualClock>, UserId) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = BalanceEngine::new(
            Arc::new(MemoryStore::new()),
            EngineConfig::default(),
            clock.clone(),
        );
        let user_id = UserId::generate();
        engine.open_account(user_id, Plan::Basic).await.unwrap();
        if balance > 0 {
            engine
                .apply_delta(&user_id, balance, LedgerReason::CreditPack, None, None)
                .await
                .unwrap();
        }
        (ReservationManager::new(engine), clock, user_id)
    }

    #[tokio::test]
    async fn reserve_debits_and_records_hold() {
        let (manager, _clock, user_id) = funded(10).await;
        let reservation = manager
            .reserve(ReserveRequest::new(user_id, 4))
            .await
            .unwrap();
        assert_eq!(reservation.balance_after, 6);
        assert_eq!(reservation.status, HoldStatus::Reserved);
        assert!(!reservation.replayed);

        let hold = manager.get_hold(&reservation.hold_id).await.unwrap();
        assert_eq!(hold.amount, 4);
        assert_eq!(hold.split, HoldSplit::balance_only(4));
    }

    #[tokio::test]
    async fn reserve_rejects_non_positive_amounts() {
        let (manager, _clock, user_id) = funded(10).await;
        for amount in [0, -3] {
            let result = manager.reserve(ReserveRequest::new(user_id, amount)).await;
            assert!(matches!(result, Err(EngineError::InvalidAmount(_))));
        }
    }

    #[tokio::test]
    async fn reserve_replay_returns_existing_hold() {
        let (manager, _clock, user_id) = funded(10).await;
        let hold_id: HoldId = "op-42".parse().unwrap();
        let request = ReserveRequest::new(user_id, 4).with_hold_id(hold_id.clone());

        let first = manager.reserve(request.clone()).await.unwrap();
        let second = manager.reserve(request).await.unwrap();
        assert!(second.replayed);
        assert_eq!(second.balance_after, first.balance_after);
        assert_eq!(
            manager.engine().get_balance(&user_id).await.unwrap().balance,
            6
        );
    }

    #[tokio::test]
    async fn commit_after_commit_is_noop() {
        let (manager, _clock, user_id) = funded(10).await;
        let reservation = manager.reserve(ReserveRequest::new(user_id, 4)).await.unwrap();

        assert_eq!(
            manager.commit(&reservation.hold_id).await.unwrap(),
            HoldStatus::Committed
        );
        assert_eq!(
            manager.commit(&reservation.hold_id).await.unwrap(),
            HoldStatus::Committed
        );
        assert_eq!(
            manager.cancel(&reservation.hold_id).await.unwrap(),
            HoldStatus::Committed
        );
        assert_eq!(
            manager.engine().get_balance(&user_id).await.unwrap().balance,
            6
        );
    }

    #[tokio::test]
    async fn unknown_hold() {
        let (manager, _clock, _user_id) = funded(0).await;
        let missing = HoldId::generate();
        assert!(matches!(
            manager.commit(&missing).await,
            Err(EngineError::HoldNotFound { .. })
        ));
        assert!(matches!(
            manager.cancel(&missing).await,
            Err(EngineError::HoldNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn sweep_ignores_live_holds() {
        let (manager, clock, user_id) = funded(10).await;
        let short = manager
            .reserve(ReserveRequest::new(user_id, 2).with_ttl(Duration::from_secs(60)))
            .await
            .unwrap();
        let long = manager
            .reserve(ReserveRequest::new(user_id, 3).with_ttl(Duration::from_secs(3600)))
            .await
            .unwrap();

        clock.advance(chrono::Duration::seconds(61));
        let report = manager.sweep_expired_holds().await.unwrap();
        assert_eq!(report.canceled, 1);
        assert_eq!(report.failed, 0);

        assert_eq!(
            manager.get_hold(&short.hold_id).await.unwrap().status,
            HoldStatus::Canceled
        );
        assert_eq!(
            manager.get_hold(&long.hold_id).await.unwrap().status,
            HoldStatus::Reserved
        );
        assert_eq!(
            manager.engine().get_balance(&user_id).await.unwrap().balance,
            7
        );
    }

    /// Writes an unrelated grant under `hold_id`'s refund key, bypassing the
    /// public `apply_delta` check.
    async fn occupy_refund_key(manager: &ReservationManager, user_id: UserId, hold_id: &HoldId) {
        let change = ChangeRequest {
            user_id,
            reason: LedgerReason::AdminCorrection,
            idempotency_key: Some(hold_id.refund_key()),
            metadata: serde_json::Value::Null,
        };
        manager
            .engine()
            .apply_change(change, |_account, _now| {
                Ok(PlannedChange {
                    delta: 1,
                    daily_delta: 0,
                    hold: None,
                })
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cancel_rejects_foreign_entry_on_refund_key() {
        let (manager, _clock, user_id) = funded(10).await;
        let hold_id: HoldId = "op-1".parse().unwrap();
        occupy_refund_key(&manager, user_id, &hold_id).await;

        manager
            .reserve(ReserveRequest::new(user_id, 4).with_hold_id(hold_id.clone()))
            .await
            .unwrap();

        let result = manager.cancel(&hold_id).await;
        assert!(matches!(
            result,
            Err(EngineError::IdempotencyConflict { ref key }) if key == "refund_op-1"
        ));
        assert_eq!(
            manager.get_hold(&hold_id).await.unwrap().status,
            HoldStatus::Reserved
        );
    }

    #[tokio::test]
    async fn sweep_stops_on_holds_it_cannot_cancel() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let config = EngineConfig {
            sweep_batch_size: 2,
            ..EngineConfig::default()
        };
        let engine = BalanceEngine::new(Arc::new(MemoryStore::new()), config, clock.clone());
        let user_id = UserId::generate();
        engine.open_account(user_id, Plan::Basic).await.unwrap();
        engine
            .apply_delta(&user_id, 10, LedgerReason::CreditPack, None, None)
            .await
            .unwrap();
        let manager = ReservationManager::new(engine);

        for raw in ["stuck-a", "stuck-b"] {
            let hold_id: HoldId = raw.parse().unwrap();
            occupy_refund_key(&manager, user_id, &hold_id).await;
            manager
                .reserve(
                    ReserveRequest::new(user_id, 1)
                        .with_hold_id(hold_id)
                        .with_ttl(Duration::from_secs(60)),
                )
                .await
                .unwrap();
        }

        clock.advance(chrono::Duration::seconds(61));
        let report = manager.sweep_expired_holds().await.unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(report.already_settled, 0);
    }
}
