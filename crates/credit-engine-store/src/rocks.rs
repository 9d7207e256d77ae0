//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `LedgerStore` trait.
//! Conditional writes use optimistic transactions: every key a mutation depends on
//! is read with `get_for_update`, and a commit that races another writer fails
//! with `Busy`, which is reported as a version conflict.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, Direction, ErrorKind, IteratorMode, MultiThreaded,
    OptimisticTransactionDB, Options,
};
use tracing::debug;

use credit_engine_core::{
    Account, Hold, HoldId, HoldStatus, IdempotencyKey, LedgerEntry, UserId,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{AccountMutation, HoldWrite, LedgerStore, MutationOutcome};

/// Attempts for a standalone hold transition that races another commit.
const TRANSITION_ATTEMPTS: u32 = 3;

type Db = OptimisticTransactionDB<MultiThreaded>;
type Txn<'a> = rocksdb::Transaction<'a, Db>;

fn db_err(err: rocksdb::Error) -> StoreError {
    StoreError::Database(err.to_string())
}

fn is_write_conflict(err: &rocksdb::Error) -> bool {
    matches!(err.kind(), ErrorKind::Busy | ErrorKind::TryAgain)
}

/// RocksDB-backed storage implementation.
#[derive(Clone)]
pub struct RocksStore {
    db: Arc<Db>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = Db::open_cf_descriptors(&opts, path, cf_descriptors).map_err(db_err)?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Run a synchronous database call on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Self) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || f(&this))
            .await
            .map_err(|e| StoreError::Database(format!("blocking task failed: {e}")))?
    }

    fn get_cbor<T: serde::de::DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(db_err)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    /// Collect the keys under `prefix` in ascending order.
    fn prefix_keys(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<Box<[u8]>>> {
        let cf = self.cf(cf_name)?;
        let mut found = Vec::new();
        for item in self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, _) = item.map_err(db_err)?;
            if !key.starts_with(prefix) {
                break;
            }
            found.push(key);
        }
        Ok(found)
    }

    fn create_account_sync(&self, account: &Account) -> Result<()> {
        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let key = keys::account_key(&account.user_id);
        let value = Self::serialize(account)?;

        let txn = self.db.transaction();
        if txn
            .get_for_update_cf(&cf_accounts, &key, true)
            .map_err(db_err)?
            .is_some()
        {
            return Err(StoreError::AlreadyExists);
        }
        txn.put_cf(&cf_accounts, &key, value).map_err(db_err)?;

        match txn.commit() {
            Ok(()) => Ok(()),
            Err(e) if is_write_conflict(&e) => Err(StoreError::AlreadyExists),
            Err(e) => Err(db_err(e)),
        }
    }

    fn write_entry(&self, txn: &Txn<'_>, entry: &LedgerEntry, version: i64) -> Result<bool> {
        let cf_entries = self.cf(cf::LEDGER_ENTRIES)?;
        let cf_by_user = self.cf(cf::LEDGER_BY_USER)?;
        let cf_keys = self.cf(cf::IDEMPOTENCY_KEYS)?;
        let entry_id = entry.id.to_bytes();

        if let Some(key) = &entry.idempotency_key {
            let index_key = keys::idempotency_key(key);
            if txn
                .get_for_update_cf(&cf_keys, &index_key, true)
                .map_err(db_err)?
                .is_some()
            {
                return Ok(false);
            }
            txn.put_cf(&cf_keys, &index_key, entry_id).map_err(db_err)?;
        }

        let value = Self::serialize(entry)?;
        txn.put_cf(&cf_entries, keys::entry_key(&entry.id), value)
            .map_err(|e| StoreError::LedgerWrite(e.to_string()))?;
        txn.put_cf(
            &cf_by_user,
            keys::user_entry_key(&entry.user_id, version),
            entry_id,
        )
        .map_err(|e| StoreError::LedgerWrite(e.to_string()))?;

        Ok(true)
    }

    fn insert_hold(&self, txn: &Txn<'_>, hold: &Hold) -> Result<bool> {
        let cf_holds = self.cf(cf::HOLDS)?;
        let cf_expiry = self.cf(cf::HOLDS_BY_EXPIRY)?;
        let cf_by_user = self.cf(cf::HOLDS_BY_USER)?;
        let key = keys::hold_key(&hold.id);

        if txn
            .get_for_update_cf(&cf_holds, &key, true)
            .map_err(db_err)?
            .is_some()
        {
            return Ok(false);
        }

        txn.put_cf(&cf_holds, &key, Self::serialize(hold)?)
            .map_err(db_err)?;
        if hold.status == HoldStatus::Reserved {
            txn.put_cf(&cf_expiry, keys::hold_expiry_key(hold.expires_at, &hold.id), [])
                .map_err(db_err)?;
        }
        txn.put_cf(
            &cf_by_user,
            keys::user_hold_key(&hold.user_id, hold.created_at, &hold.id),
            [],
        )
        .map_err(db_err)?;

        Ok(true)
    }

    /// Returns `None` if the hold is missing, `Some(false)` if it was not in `from`.
    fn transition_in(
        &self,
        txn: &Txn<'_>,
        hold_id: &HoldId,
        from: HoldStatus,
        to: HoldStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<bool>> {
        let cf_holds = self.cf(cf::HOLDS)?;
        let cf_expiry = self.cf(cf::HOLDS_BY_EXPIRY)?;
        let key = keys::hold_key(hold_id);

        let Some(data) = txn.get_for_update_cf(&cf_holds, &key, true).map_err(db_err)? else {
            return Ok(None);
        };
        let mut hold: Hold = Self::deserialize(&data)?;
        if hold.status != from {
            return Ok(Some(false));
        }

        hold.status = to;
        hold.settled_at = Some(at);
        txn.put_cf(&cf_holds, &key, Self::serialize(&hold)?)
            .map_err(db_err)?;
        if from == HoldStatus::Reserved {
            txn.delete_cf(&cf_expiry, keys::hold_expiry_key(hold.expires_at, hold_id))
                .map_err(db_err)?;
        }

        Ok(Some(true))
    }

    fn apply_mutation_sync(&self, mutation: &AccountMutation) -> Result<MutationOutcome> {
        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let user_id = mutation.account.user_id;
        let account_key = keys::account_key(&user_id);
        let next_version = mutation.expected_version + 1;

        let txn = self.db.transaction();
        let current: Account = match txn
            .get_for_update_cf(&cf_accounts, &account_key, true)
            .map_err(db_err)?
        {
            Some(data) => Self::deserialize(&data)?,
            None => return Err(StoreError::NotFound),
        };
        if current.version != mutation.expected_version {
            return Ok(MutationOutcome::VersionConflict);
        }

        if let Some(entry) = &mutation.entry {
            if !self.write_entry(&txn, entry, next_version)? {
                return Ok(MutationOutcome::DuplicateIdempotencyKey);
            }
        }

        match &mutation.hold {
            Some(HoldWrite::Insert(hold)) => {
                if !self.insert_hold(&txn, hold)? {
                    return Ok(MutationOutcome::HoldConflict);
                }
            }
            Some(HoldWrite::Transition { id, from, to, at }) => {
                if self.transition_in(&txn, id, *from, *to, *at)? != Some(true) {
                    return Ok(MutationOutcome::HoldConflict);
                }
            }
            None => {}
        }

        let mut account = mutation.account.clone();
        account.version = next_version;
        txn.put_cf(&cf_accounts, &account_key, Self::serialize(&account)?)
            .map_err(db_err)?;

        match txn.commit() {
            Ok(()) => Ok(MutationOutcome::Applied),
            Err(e) if is_write_conflict(&e) => {
                debug!(user_id = %user_id, "optimistic commit lost a race");
                Ok(MutationOutcome::VersionConflict)
            }
            Err(e) => Err(db_err(e)),
        }
    }

    fn transition_hold_sync(
        &self,
        hold_id: &HoldId,
        from: HoldStatus,
        to: HoldStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        for _ in 0..TRANSITION_ATTEMPTS {
            let txn = self.db.transaction();
            let Some(applied) = self.transition_in(&txn, hold_id, from, to, at)? else {
                return Err(StoreError::NotFound);
            };
            if !applied {
                return Ok(false);
            }
            match txn.commit() {
                Ok(()) => return Ok(true),
                // Someone else settled it first; re-read and report.
                Err(e) if is_write_conflict(&e) => continue,
                Err(e) => return Err(db_err(e)),
            }
        }
        Err(StoreError::Database(format!(
            "hold {hold_id} transition kept conflicting"
        )))
    }

    fn find_ledger_entry_sync(&self, key: &IdempotencyKey) -> Result<Option<LedgerEntry>> {
        let cf_keys = self.cf(cf::IDEMPOTENCY_KEYS)?;
        let Some(value) = self
            .db
            .get_cf(&cf_keys, keys::idempotency_key(key))
            .map_err(db_err)?
        else {
            return Ok(None);
        };
        let entry_id = keys::decode_entry_id(&value)
            .ok_or_else(|| StoreError::Serialization("malformed idempotency index".into()))?;
        self.get_cbor(cf::LEDGER_ENTRIES, &keys::entry_key(&entry_id))
    }

    fn list_ledger_entries_sync(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let cf_by_user = self.cf(cf::LEDGER_BY_USER)?;
        let prefix = keys::user_prefix(user_id);

        let mut entries = Vec::new();
        let mut skipped = 0;

        // Versions are increasing, so walking the prefix backwards is newest first.
        let mut upper = prefix.clone();
        upper.extend_from_slice(&[0xFF; 8]);
        let iter = self
            .db
            .iterator_cf(&cf_by_user, IteratorMode::From(&upper, Direction::Reverse));

        for item in iter {
            let (key, value) = item.map_err(db_err)?;
            if !key.starts_with(&prefix) {
                break;
            }
            if skipped < offset {
                skipped += 1;
                continue;
            }
            if entries.len() >= limit {
                break;
            }

            let entry_id = keys::decode_entry_id(&value)
                .ok_or_else(|| StoreError::Serialization("malformed ledger index".into()))?;
            if let Some(entry) = self.get_cbor(cf::LEDGER_ENTRIES, &keys::entry_key(&entry_id))? {
                entries.push(entry);
            }
        }

        Ok(entries)
    }

    fn list_expired_holds_sync(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Hold>> {
        let cf_expiry = self.cf(cf::HOLDS_BY_EXPIRY)?;
        let cutoff = now.timestamp_millis();

        let mut holds = Vec::new();
        for item in self.db.iterator_cf(&cf_expiry, IteratorMode::Start) {
            let (key, _) = item.map_err(db_err)?;
            let (expires_millis, hold_id) = keys::split_hold_expiry_key(&key)
                .ok_or_else(|| StoreError::Serialization("malformed expiry index".into()))?;
            if expires_millis >= cutoff || holds.len() >= limit {
                break;
            }

            let hold: Option<Hold> = self.get_cbor(cf::HOLDS, &keys::hold_key(&hold_id))?;
            if let Some(hold) = hold.filter(|h| h.is_expired(now)) {
                holds.push(hold);
            }
        }

        Ok(holds)
    }

    fn list_holds_by_user_sync(
        &self,
        user_id: &UserId,
        status: Option<HoldStatus>,
        limit: usize,
    ) -> Result<Vec<Hold>> {
        let mut holds = Vec::new();
        for key in self
            .prefix_keys(cf::HOLDS_BY_USER, &keys::user_prefix(user_id))?
            .into_iter()
            .rev()
        {
            if holds.len() >= limit {
                break;
            }
            let hold_id = keys::hold_id_from_user_key(&key)
                .ok_or_else(|| StoreError::Serialization("malformed hold index".into()))?;
            let hold: Option<Hold> = self.get_cbor(cf::HOLDS, &keys::hold_key(&hold_id))?;
            if let Some(hold) = hold.filter(|h| status.map_or(true, |s| h.status == s)) {
                holds.push(hold);
            }
        }
        Ok(holds)
    }
}

#[async_trait]
impl LedgerStore for RocksStore {
    async fn create_account(&self, account: &Account) -> Result<()> {
        let account = account.clone();
        self.blocking(move |store| store.create_account_sync(&account))
            .await
    }

    async fn get_account(&self, user_id: &UserId) -> Result<Option<Account>> {
        let key = keys::account_key(user_id);
        self.blocking(move |store| store.get_cbor(cf::ACCOUNTS, &key))
            .await
    }

    async fn apply_mutation(&self, mutation: &AccountMutation) -> Result<MutationOutcome> {
        let mutation = mutation.clone();
        self.blocking(move |store| store.apply_mutation_sync(&mutation))
            .await
    }

    async fn find_ledger_entry(&self, key: &IdempotencyKey) -> Result<Option<LedgerEntry>> {
        let key = key.clone();
        self.blocking(move |store| store.find_ledger_entry_sync(&key))
            .await
    }

    async fn list_ledger_entries(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let user_id = *user_id;
        self.blocking(move |store| store.list_ledger_entries_sync(&user_id, limit, offset))
            .await
    }

    async fn get_hold(&self, hold_id: &HoldId) -> Result<Option<Hold>> {
        let key = keys::hold_key(hold_id);
        self.blocking(move |store| store.get_cbor(cf::HOLDS, &key))
            .await
    }

    async fn transition_hold(
        &self,
        hold_id: &HoldId,
        from: HoldStatus,
        to: HoldStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let hold_id = hold_id.clone();
        self.blocking(move |store| store.transition_hold_sync(&hold_id, from, to, at))
            .await
    }

    async fn list_expired_holds(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Hold>> {
        self.blocking(move |store| store.list_expired_holds_sync(now, limit))
            .await
    }

    async fn list_holds_by_user(
        &self,
        user_id: &UserId,
        status: Option<HoldStatus>,
        limit: usize,
    ) -> Result<Vec<Hold>> {
        let user_id = *user_id;
        self.blocking(move |store| store.list_holds_by_user_sync(&user_id, status, limit))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use credit_engine_core::{HoldSplit, LedgerReason, Plan};
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    async fn seeded(store: &RocksStore, balance: i64) -> Account {
        let mut account = Account::new(UserId::generate(), Plan::Basic, None, Utc::now());
        account.balance = balance;
        store.create_account(&account).await.unwrap();
        account
    }

    fn debit(account: &Account, amount: i64, key: &str) -> AccountMutation {
        let mut next = account.clone();
        next.balance -= amount;
        AccountMutation {
            expected_version: account.version,
            entry: Some(
                LedgerEntry::new(
                    account.user_id,
                    LedgerReason::AdminCorrection,
                    -amount,
                    next.balance,
                    Utc::now(),
                )
                .with_idempotency_key(Some(key.parse().unwrap())),
            ),
            account: next,
            hold: None,
        }
    }

    #[tokio::test]
    async fn account_create_and_read() {
        let (store, _dir) = create_test_store();
        let account = seeded(&store, 50).await;

        let retrieved = store.get_account(&account.user_id).await.unwrap().unwrap();
        assert_eq!(retrieved.balance, 50);

        let again = store.create_account(&account).await;
        assert!(matches!(again, Err(StoreError::AlreadyExists)));
    }

    #[tokio::test]
    async fn mutation_outcomes() {
        let (store, _dir) = create_test_store();
        let account = seeded(&store, 10).await;

        assert_eq!(
            store.apply_mutation(&debit(&account, 4, "k1")).await.unwrap(),
            MutationOutcome::Applied
        );
        // Stale snapshot.
        assert_eq!(
            store.apply_mutation(&debit(&account, 4, "k2")).await.unwrap(),
            MutationOutcome::VersionConflict
        );
        // Fresh snapshot, reused key.
        let fresh = store.get_account(&account.user_id).await.unwrap().unwrap();
        assert_eq!(fresh.version, 1);
        assert_eq!(
            store.apply_mutation(&debit(&fresh, 4, "k1")).await.unwrap(),
            MutationOutcome::DuplicateIdempotencyKey
        );

        let stored = store.get_account(&account.user_id).await.unwrap().unwrap();
        assert_eq!(stored.balance, 6);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn ledger_newest_first() {
        let (store, _dir) = create_test_store();
        let mut current = seeded(&store, 10).await;
        for key in ["a", "b", "c"] {
            store.apply_mutation(&debit(&current, 1, key)).await.unwrap();
            current = store.get_account(&current.user_id).await.unwrap().unwrap();
        }

        let entries = store
            .list_ledger_entries(&current.user_id, 10, 0)
            .await
            .unwrap();
        let balances: Vec<i64> = entries.iter().map(|e| e.balance_after).collect();
        assert_eq!(balances, vec![7, 8, 9]);

        let page = store
            .list_ledger_entries(&current.user_id, 1, 2)
            .await
            .unwrap();
        assert_eq!(page[0].balance_after, 9);

        let found = store
            .find_ledger_entry(&"b".parse().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.balance_after, 8);
    }

    #[tokio::test]
    async fn hold_lifecycle_and_expiry_index() {
        let (store, _dir) = create_test_store();
        let account = seeded(&store, 10).await;
        let now = Utc::now();

        let hold = Hold {
            id: HoldId::generate(),
            user_id: account.user_id,
            amount: 3,
            split: HoldSplit::balance_only(3),
            status: HoldStatus::Reserved,
            created_at: now - Duration::minutes(20),
            expires_at: now - Duration::minutes(5),
            settled_at: None,
        };
        let mut mutation = debit(&account, 3, hold.id.as_str());
        mutation.hold = Some(HoldWrite::Insert(hold.clone()));
        assert_eq!(
            store.apply_mutation(&mutation).await.unwrap(),
            MutationOutcome::Applied
        );

        let expired = store.list_expired_holds(now, 10).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, hold.id);

        assert!(store
            .transition_hold(&hold.id, HoldStatus::Reserved, HoldStatus::Committed, now)
            .await
            .unwrap());
        assert!(!store
            .transition_hold(&hold.id, HoldStatus::Reserved, HoldStatus::Canceled, now)
            .await
            .unwrap());

        assert!(store.list_expired_holds(now, 10).await.unwrap().is_empty());
        let by_user = store
            .list_holds_by_user(&account.user_id, None, 10)
            .await
            .unwrap();
        assert_eq!(by_user.len(), 1);
        assert_eq!(by_user[0].status, HoldStatus::Committed);
    }

    #[tokio::test]
    async fn missing_hold_transition_is_not_found() {
        let (store, _dir) = create_test_store();
        let result = store
            .transition_hold(
                &HoldId::generate(),
                HoldStatus::Reserved,
                HoldStatus::Committed,
                Utc::now(),
            )
            .await;
        assert!(matches!(result, Err(StoreError::NotFound)));
    }
}
