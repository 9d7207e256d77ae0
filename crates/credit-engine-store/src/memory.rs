//! In-memory storage implementation.
//!
//! All maps sit behind a single async mutex, so every [`AccountMutation`] is
//! checked and applied under one critical section.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use credit_engine_core::{
    Account, Hold, HoldId, HoldStatus, IdempotencyKey, LedgerEntry, LedgerEntryId, UserId,
};

use crate::error::{Result, StoreError};
use crate::{AccountMutation, HoldWrite, LedgerStore, MutationOutcome};

#[derive(Default)]
struct Inner {
    accounts: HashMap<UserId, Account>,
    entries: HashMap<LedgerEntryId, LedgerEntry>,
    /// Entry ids per user in write order.
    entries_by_user: HashMap<UserId, Vec<LedgerEntryId>>,
    idempotency_keys: HashMap<IdempotencyKey, LedgerEntryId>,
    holds: HashMap<HoldId, Hold>,
}

impl Inner {
    fn check(&self, mutation: &AccountMutation) -> Result<MutationOutcome> {
        let current = self
            .accounts
            .get(&mutation.account.user_id)
            .ok_or(StoreError::NotFound)?;
        if current.version != mutation.expected_version {
            return Ok(MutationOutcome::VersionConflict);
        }

        if let Some(key) = mutation
            .entry
            .as_ref()
            .and_then(|entry| entry.idempotency_key.as_ref())
        {
            if self.idempotency_keys.contains_key(key) {
                return Ok(MutationOutcome::DuplicateIdempotencyKey);
            }
        }

        match &mutation.hold {
            Some(HoldWrite::Insert(hold)) if self.holds.contains_key(&hold.id) => {
                Ok(MutationOutcome::HoldConflict)
            }
            Some(HoldWrite::Transition { id, from, .. })
                if self.holds.get(id).map(|h| h.status) != Some(*from) =>
            {
                Ok(MutationOutcome::HoldConflict)
            }
            _ => Ok(MutationOutcome::Applied),
        }
    }

    fn insert_entry(&mut self, entry: &LedgerEntry) {
        if let Some(key) = &entry.idempotency_key {
            self.idempotency_keys.insert(key.clone(), entry.id);
        }
        self.entries_by_user
            .entry(entry.user_id)
            .or_default()
            .push(entry.id);
        self.entries.insert(entry.id, entry.clone());
    }

    fn apply_hold(&mut self, write: &HoldWrite) {
        match write {
            HoldWrite::Insert(hold) => {
                self.holds.insert(hold.id.clone(), hold.clone());
            }
            HoldWrite::Transition { id, to, at, .. } => {
                if let Some(hold) = self.holds.get_mut(id) {
                    hold.status = *to;
                    hold.settled_at = Some(*at);
                }
            }
        }
    }
}

/// In-memory storage implementation.
///
/// Cloning is cheap; clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn create_account(&self, account: &Account) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.accounts.contains_key(&account.user_id) {
            return Err(StoreError::AlreadyExists);
        }
        inner.accounts.insert(account.user_id, account.clone());
        Ok(())
    }

    async fn get_account(&self, user_id: &UserId) -> Result<Option<Account>> {
        Ok(self.inner.lock().await.accounts.get(user_id).cloned())
    }

    async fn apply_mutation(&self, mutation: &AccountMutation) -> Result<MutationOutcome> {
        let mut inner = self.inner.lock().await;

        let outcome = inner.check(mutation)?;
        if outcome != MutationOutcome::Applied {
            return Ok(outcome);
        }

        let mut account = mutation.account.clone();
        account.version = mutation.expected_version + 1;
        inner.accounts.insert(account.user_id, account);

        if let Some(entry) = &mutation.entry {
            inner.insert_entry(entry);
        }
        if let Some(hold) = &mutation.hold {
            inner.apply_hold(hold);
        }

        Ok(MutationOutcome::Applied)
    }

    async fn find_ledger_entry(&self, key: &IdempotencyKey) -> Result<Option<LedgerEntry>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .idempotency_keys
            .get(key)
            .and_then(|id| inner.entries.get(id))
            .cloned())
    }

    async fn list_ledger_entries(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let inner = self.inner.lock().await;
        let Some(ids) = inner.entries_by_user.get(user_id) else {
            return Ok(Vec::new());
        };

        Ok(ids
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .filter_map(|id| inner.entries.get(id).cloned())
            .collect())
    }

    async fn get_hold(&self, hold_id: &HoldId) -> Result<Option<Hold>> {
        Ok(self.inner.lock().await.holds.get(hold_id).cloned())
    }

    async fn transition_hold(
        &self,
        hold_id: &HoldId,
        from: HoldStatus,
        to: HoldStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let hold = inner.holds.get_mut(hold_id).ok_or(StoreError::NotFound)?;
        if hold.status != from {
            return Ok(false);
        }
        hold.status = to;
        hold.settled_at = Some(at);
        Ok(true)
    }

    async fn list_expired_holds(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Hold>> {
        let inner = self.inner.lock().await;
        let mut expired: Vec<Hold> = inner
            .holds
            .values()
            .filter(|hold| hold.is_expired(now))
            .cloned()
            .collect();
        expired.sort_by_key(|hold| hold.expires_at);
        expired.truncate(limit);
        Ok(expired)
    }

    async fn list_holds_by_user(
        &self,
        user_id: &UserId,
        status: Option<HoldStatus>,
        limit: usize,
    ) -> Result<Vec<Hold>> {
        let inner = self.inner.lock().await;
        let mut holds: Vec<Hold> = inner
            .holds
            .values()
            .filter(|hold| hold.user_id == *user_id)
            .filter(|hold| status.map_or(true, |s| hold.status == s))
            .cloned()
            .collect();
        holds.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        holds.truncate(limit);
        Ok(holds)
    }
}
