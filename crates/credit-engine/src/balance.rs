//! Balance engine.
//!
//! Every balance change is a read of the account row followed by one conditional
//! write of the new row and its ledger entry. A lost race re-reads and tries
//! again, up to `max_cas_retries` attempts; there are no sleeps and no in-process
//! locks, so correctness rests entirely on the store's conditional write and its
//! unique idempotency key.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use credit_engine_core::{
    Account, BalanceSnapshot, CostPolicy, DailyUsage, EngineError, IdError, IdempotencyKey,
    LedgerEntry, LedgerEntryId, LedgerReason, Plan, Result, UserId,
};
use credit_engine_store::{
    AccountMutation, HoldWrite, LedgerStore, MutationOutcome, StoreError,
};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::daily_cap::DailyCapTracker;

/// Result of [`BalanceEngine::apply_delta`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedDelta {
    /// Balance after the change (the current balance for a replay).
    pub balance: i64,
    /// Account version after the change.
    pub version: i64,
    /// The ledger entry recording the change.
    pub entry_id: LedgerEntryId,
    /// `true` if the idempotency key had already been applied.
    pub replayed: bool,
}

/// What a change does to an account, computed from a fresh read.
#[derive(Debug)]
pub(crate) struct PlannedChange {
    /// Signed balance change.
    pub delta: i64,
    /// Signed change to the trial daily counter.
    pub daily_delta: i64,
    /// Hold written in the same transaction.
    pub hold: Option<HoldWrite>,
}

/// How a conditional change ended.
#[derive(Debug)]
pub(crate) enum ChangeOutcome {
    /// Written. `account` carries the new version.
    Applied {
        account: Account,
        entry: LedgerEntry,
    },
    /// The idempotency key was already in the ledger.
    Replayed { entry: LedgerEntry },
    /// The paired hold write did not apply.
    HoldConflict,
}

/// A balance change request, before the account is read.
pub(crate) struct ChangeRequest {
    pub user_id: UserId,
    pub reason: LedgerReason,
    pub idempotency_key: Option<IdempotencyKey>,
    pub metadata: serde_json::Value,
}

/// Serializes balance mutations per account through optimistic writes.
#[derive(Clone)]
pub struct BalanceEngine {
    store: Arc<dyn LedgerStore>,
    config: Arc<EngineConfig>,
    clock: Arc<dyn Clock>,
    tracker: DailyCapTracker,
}

impl BalanceEngine {
    /// Create an engine over a store.
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>, config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let tracker = DailyCapTracker::new(config.cap_utc_offset, config.trial_overflow);
        Self {
            store,
            config: Arc::new(config),
            clock,
            tracker,
        }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Cost and entitlement tables.
    #[must_use]
    pub fn policy(&self) -> &CostPolicy {
        &self.config.policy
    }

    /// The engine's clock.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) const fn tracker(&self) -> &DailyCapTracker {
        &self.tracker
    }

    fn fresh_daily(&self, plan: Plan, now: DateTime<Utc>) -> Option<DailyUsage> {
        self.policy()
            .daily_credits_cap(plan)
            .map(|cap| DailyUsage::new(cap, self.tracker.today(now)))
    }

    async fn load(&self, user_id: &UserId) -> Result<Account> {
        self.store
            .get_account(user_id)
            .await?
            .ok_or_else(|| EngineError::AccountNotFound {
                user_id: user_id.to_string(),
            })
    }

    /// Create a zero-balance account.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::AccountAlreadyExists` if the user already has one.
    pub async fn open_account(&self, user_id: UserId, plan: Plan) -> Result<Account> {
        let now = self.clock.now();
        let account = Account::new(user_id, plan, self.fresh_daily(plan, now), now);

        match self.store.create_account(&account).await {
            Ok(()) => {
                info!(user_id = %user_id, plan = %plan, "Account opened");
                Ok(account)
            }
            Err(StoreError::AlreadyExists) => Err(EngineError::AccountAlreadyExists {
                user_id: user_id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Current balance, version, plan and trial usage.
    ///
    /// The trial counter is reported as of today; a stale day reads as unused.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::AccountNotFound` if the account doesn't exist.
    pub async fn get_balance(&self, user_id: &UserId) -> Result<BalanceSnapshot> {
        let account = self.load(user_id).await?;
        let mut snapshot = account.snapshot();
        if let Some(daily) = snapshot.daily.as_mut() {
            self.tracker.rollover(daily, self.tracker.today(self.clock.now()));
        }
        Ok(snapshot)
    }

    /// Apply a signed credit change exactly once per idempotency key.
    ///
    /// Grants use positive deltas, corrections either sign. Holds are created and
    /// refunded by the reservation manager, never through this call.
    ///
    /// # Errors
    ///
    /// - `EngineError::InvalidAmount` for a zero delta, a hold reason, or a delta
    ///   whose sign the reason does not allow.
    /// - `EngineError::InvalidId` for a key in the reserved refund namespace.
    /// - `EngineError::AccountNotFound` if the account doesn't exist.
    /// - `EngineError::InsufficientCredits` if the balance would go negative.
    /// - `EngineError::IdempotencyConflict` if the key belongs to another account.
    /// - `EngineError::ConcurrencyConflict` after exhausting write attempts.
    pub async fn apply_delta(
        &self,
        user_id: &UserId,
        delta: i64,
        reason: LedgerReason,
        idempotency_key: Option<IdempotencyKey>,
        metadata: Option<serde_json::Value>,
    ) -> Result<AppliedDelta> {
        self.apply_keyed(user_id, delta, reason, idempotency_key, metadata, None)
            .await
    }

    /// Credit a paid subscription and move the account onto its plan.
    ///
    /// The plan switch rides on the same keyed write as the credits, so
    /// redelivering an old event is a pure replay and never reverts a newer plan.
    ///
    /// # Errors
    ///
    /// - `EngineError::InvalidPlan` for the trial plan.
    /// - Otherwise as [`Self::apply_delta`].
    pub async fn grant_subscription(
        &self,
        user_id: &UserId,
        plan: Plan,
        event_key: IdempotencyKey,
        metadata: Option<serde_json::Value>,
    ) -> Result<AppliedDelta> {
        if plan.is_trial() {
            return Err(EngineError::InvalidPlan(
                "trial is not a paid subscription".into(),
            ));
        }
        self.apply_keyed(
            user_id,
            plan.monthly_credits(),
            LedgerReason::SubscriptionGrant,
            Some(event_key),
            metadata,
            Some(plan),
        )
        .await
    }

    async fn apply_keyed(
        &self,
        user_id: &UserId,
        delta: i64,
        reason: LedgerReason,
        idempotency_key: Option<IdempotencyKey>,
        metadata: Option<serde_json::Value>,
        switch_to: Option<Plan>,
    ) -> Result<AppliedDelta> {
        if delta == 0 {
            return Err(EngineError::InvalidAmount("delta must be non-zero".into()));
        }
        if reason.is_hold_reason() {
            return Err(EngineError::InvalidAmount(format!(
                "{reason} entries are written by holds"
            )));
        }
        if !reason.allows_delta(delta) {
            return Err(EngineError::InvalidAmount(format!(
                "{reason} does not allow a delta of {delta}"
            )));
        }
        if idempotency_key
            .as_ref()
            .is_some_and(IdempotencyKey::is_refund_key)
        {
            return Err(EngineError::InvalidId(IdError::ReservedPrefix));
        }

        let request = ChangeRequest {
            user_id: *user_id,
            reason,
            idempotency_key,
            metadata: metadata.unwrap_or(serde_json::Value::Null),
        };

        let tracker = self.tracker;
        let daily_cap = switch_to.and_then(|plan| self.policy().daily_credits_cap(plan));
        let outcome = self
            .apply_change(request, |account, now| {
                if let Some(plan) = switch_to {
                    let fresh = daily_cap.map(|cap| DailyUsage::new(cap, tracker.today(now)));
                    switch_plan(account, plan, fresh);
                }
                Ok(PlannedChange {
                    delta,
                    daily_delta: 0,
                    hold: None,
                })
            })
            .await?;

        match outcome {
            ChangeOutcome::Applied { account, entry } => {
                info!(
                    user_id = %user_id,
                    delta,
                    reason = %reason,
                    plan = %account.plan,
                    balance = account.balance,
                    "Balance updated"
                );
                Ok(AppliedDelta {
                    balance: account.balance,
                    version: account.version,
                    entry_id: entry.id,
                    replayed: false,
                })
            }
            ChangeOutcome::Replayed { entry } => {
                let current = self.load(user_id).await?;
                Ok(AppliedDelta {
                    balance: current.balance,
                    version: current.version,
                    entry_id: entry.id,
                    replayed: true,
                })
            }
            ChangeOutcome::HoldConflict => Err(EngineError::Storage(
                "hold conflict on a change without a hold".into(),
            )),
        }
    }

    /// Switch an account's plan.
    ///
    /// Entering trial installs a fresh daily counter; leaving it drops the counter.
    /// No ledger entry is written.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::AccountNotFound` or `EngineError::ConcurrencyConflict`.
    pub async fn set_plan(&self, user_id: &UserId, plan: Plan) -> Result<BalanceSnapshot> {
        for attempt in 1..=self.config.max_cas_retries {
            let current = self.load(user_id).await?;
            if current.plan == plan {
                return Ok(current.snapshot());
            }

            let now = self.clock.now();
            let mut next = current.clone();
            switch_plan(&mut next, plan, self.fresh_daily(plan, now));
            next.updated_at = now;

            let mutation = AccountMutation {
                expected_version: current.version,
                account: next.clone(),
                entry: None,
                hold: None,
            };
            match self.store.apply_mutation(&mutation).await {
                Ok(MutationOutcome::Applied) => {
                    next.version = current.version + 1;
                    info!(user_id = %user_id, from = %current.plan, to = %plan, "Plan changed");
                    return Ok(next.snapshot());
                }
                Ok(MutationOutcome::VersionConflict) => {
                    debug!(user_id = %user_id, attempt, "Plan change lost a race, retrying");
                }
                Ok(outcome) => {
                    return Err(EngineError::Storage(format!(
                        "unexpected outcome {outcome:?} for a plan change"
                    )))
                }
                Err(StoreError::NotFound) => {
                    return Err(EngineError::AccountNotFound {
                        user_id: user_id.to_string(),
                    })
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(user_id = %user_id, attempts = self.config.max_cas_retries, "Plan change exhausted retries");
        Err(EngineError::ConcurrencyConflict {
            user_id: user_id.to_string(),
            attempts: self.config.max_cas_retries,
        })
    }

    /// Ledger history for an account, newest first.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::AccountNotFound` if the account doesn't exist.
    pub async fn ledger(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        self.load(user_id).await?;
        Ok(self
            .store
            .list_ledger_entries(user_id, limit, offset)
            .await?)
    }

    /// Look up a prior application of `key`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::IdempotencyConflict` if the entry belongs to another account.
    pub(crate) async fn find_replay(
        &self,
        user_id: &UserId,
        key: &IdempotencyKey,
    ) -> Result<Option<LedgerEntry>> {
        match self.store.find_ledger_entry(key).await? {
            Some(entry) if entry.user_id != *user_id => Err(EngineError::IdempotencyConflict {
                key: key.to_string(),
            }),
            found => Ok(found),
        }
    }

    /// The optimistic write loop.
    ///
    /// `plan` is called with a fresh copy of the account on every attempt. It may
    /// change the trial counter; the balance itself is moved by the returned delta.
    pub(crate) async fn apply_change<F>(
        &self,
        request: ChangeRequest,
        mut plan: F,
    ) -> Result<ChangeOutcome>
    where
        F: FnMut(&mut Account, DateTime<Utc>) -> Result<PlannedChange> + Send,
    {
        let user_id = request.user_id;

        if let Some(key) = &request.idempotency_key {
            if let Some(entry) = self.find_replay(&user_id, key).await? {
                debug!(user_id = %user_id, key = %key, "Idempotent replay");
                return Ok(ChangeOutcome::Replayed { entry });
            }
        }

        for attempt in 1..=self.config.max_cas_retries {
            let current = self.load(&user_id).await?;
            let now = self.clock.now();

            let mut next = current.clone();
            let planned = plan(&mut next, now)?;

            let balance = current
                .balance
                .checked_add(planned.delta)
                .ok_or_else(|| EngineError::InvalidAmount("balance overflow".into()))?;
            if balance < 0 {
                return Err(EngineError::InsufficientCredits {
                    balance: current.balance,
                    required: -planned.delta,
                });
            }
            next.balance = balance;
            next.updated_at = now;

            let entry = LedgerEntry::new(user_id, request.reason, planned.delta, balance, now)
                .with_idempotency_key(request.idempotency_key.clone())
                .with_daily_delta(planned.daily_delta)
                .with_metadata(request.metadata.clone());

            let mutation = AccountMutation {
                expected_version: current.version,
                account: next,
                entry: Some(entry),
                hold: planned.hold,
            };

            match self.store.apply_mutation(&mutation).await {
                Ok(MutationOutcome::Applied) => {
                    let AccountMutation {
                        mut account, entry, ..
                    } = mutation;
                    account.version = current.version + 1;
                    let entry = entry.ok_or_else(|| {
                        EngineError::LedgerInsertFailed("entry missing after write".into())
                    })?;
                    return Ok(ChangeOutcome::Applied { account, entry });
                }
                Ok(MutationOutcome::VersionConflict) => {
                    debug!(user_id = %user_id, attempt, "Version conflict, retrying");
                }
                Ok(MutationOutcome::DuplicateIdempotencyKey) => {
                    // A concurrent writer with the same key won.
                    let key = request.idempotency_key.as_ref().ok_or_else(|| {
                        EngineError::LedgerInsertFailed("duplicate key without a key".into())
                    })?;
                    let entry = self.find_replay(&user_id, key).await?.ok_or_else(|| {
                        EngineError::LedgerInsertFailed(format!(
                            "key {key} reported duplicate but not found"
                        ))
                    })?;
                    debug!(user_id = %user_id, key = %key, "Idempotent replay after race");
                    return Ok(ChangeOutcome::Replayed { entry });
                }
                Ok(MutationOutcome::HoldConflict) => return Ok(ChangeOutcome::HoldConflict),
                Err(StoreError::NotFound) => {
                    return Err(EngineError::AccountNotFound {
                        user_id: user_id.to_string(),
                    })
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(
            user_id = %user_id,
            attempts = self.config.max_cas_retries,
            reason = %request.reason,
            "Optimistic write exhausted retries"
        );
        Err(EngineError::ConcurrencyConflict {
            user_id: user_id.to_string(),
            attempts: self.config.max_cas_retries,
        })
    }
}

/// Move `account` to `plan`. Entering trial installs `fresh` unless a counter
/// already exists; leaving trial drops the counter.
fn switch_plan(account: &mut Account, plan: Plan, fresh: Option<DailyUsage>) {
    account.daily = match (account.daily.take(), plan.is_trial()) {
        (Some(daily), true) => Some(daily),
        (None, true) => fresh,
        (_, false) => None,
    };
    account.plan = plan;
}
