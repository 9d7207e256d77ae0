//! Storage layer for the credit engine.
//!
//! This crate persists accounts, the append-only ledger and holds. Three backends
//! implement the [`LedgerStore`] trait:
//!
//! - [`MemoryStore`]: in-process maps behind one lock, used by tests and the
//!   `memory` service backend
//! - [`PgStore`]: `PostgreSQL` via `sqlx`, with embedded migrations
//! - `RocksStore`: `RocksDB` optimistic transactions with column families
//!   (feature `rocksdb-backend`)
//!
//! # Atomicity
//!
//! Every balance change goes through [`LedgerStore::apply_mutation`], which
//! writes the account row, its ledger entry and an optional hold change as one
//! unit, conditional on the account version the caller read. Nothing is written
//! unless the outcome is [`MutationOutcome::Applied`].
//!
//! # Example
//!
//! ```no_run
//! use chrono::Utc;
//! use credit_engine_core::{Account, Plan, UserId};
//! use credit_engine_store::{LedgerStore, MemoryStore};
//!
//! # async fn run() -> credit_engine_store::Result<()> {
//! let store = MemoryStore::new();
//! let user_id = UserId::generate();
//! store
//!     .create_account(&Account::new(user_id, Plan::Basic, None, Utc::now()))
//!     .await?;
//!
//! let account = store.get_account(&user_id).await?;
//! assert!(account.is_some());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
pub mod postgres;

#[cfg(feature = "rocksdb-backend")]
pub mod keys;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
#[cfg(feature = "rocksdb-backend")]
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use postgres::PgStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use credit_engine_core::{
    Account, Hold, HoldId, HoldStatus, IdempotencyKey, LedgerEntry, UserId,
};

/// A conditional write of one account row.
///
/// The store writes `account` with `version = expected_version + 1`, appends
/// `entry` and applies `hold`, all or nothing.
#[derive(Debug, Clone)]
pub struct AccountMutation {
    /// The version the caller read. The write fails if the row moved on.
    pub expected_version: i64,

    /// The new account state. Its `version` field is ignored.
    pub account: Account,

    /// The ledger entry recording the change.
    ///
    /// `None` only for changes that do not touch the balance (a plan switch).
    pub entry: Option<LedgerEntry>,

    /// A hold created or settled together with the balance change.
    pub hold: Option<HoldWrite>,
}

/// A hold change written inside an [`AccountMutation`].
#[derive(Debug, Clone)]
pub enum HoldWrite {
    /// Insert a new hold. Fails if the id exists.
    Insert(Hold),

    /// Move a hold between statuses. Fails unless the hold is in `from`.
    Transition {
        /// The hold to settle.
        id: HoldId,
        /// Required current status.
        from: HoldStatus,
        /// Target status.
        to: HoldStatus,
        /// Settlement time.
        at: DateTime<Utc>,
    },
}

/// Result of [`LedgerStore::apply_mutation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// Everything was written.
    Applied,

    /// The account version no longer matches; nothing was written.
    VersionConflict,

    /// The entry's idempotency key is already in the ledger; nothing was written.
    DuplicateIdempotencyKey,

    /// The hold insert or transition did not apply; nothing was written.
    HoldConflict,
}

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (`PostgreSQL`, `RocksDB`, in-memory for testing).
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // =========================================================================
    // Account Operations
    // =========================================================================

    /// Insert a new account record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the user already has an account.
    async fn create_account(&self, account: &Account) -> Result<()>;

    /// Get an account by user ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_account(&self, user_id: &UserId) -> Result<Option<Account>>;

    /// Conditionally write an account row together with its ledger entry and hold change.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account doesn't exist. Races are
    /// reported through the returned [`MutationOutcome`].
    async fn apply_mutation(&self, mutation: &AccountMutation) -> Result<MutationOutcome>;

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    /// Find the ledger entry written with an idempotency key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn find_ledger_entry(&self, key: &IdempotencyKey) -> Result<Option<LedgerEntry>>;

    /// List ledger entries for a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_ledger_entries(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>>;

    // =========================================================================
    // Hold Operations
    // =========================================================================

    /// Get a hold by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_hold(&self, hold_id: &HoldId) -> Result<Option<Hold>>;

    /// Move a hold from `from` to `to` without touching the balance.
    ///
    /// Returns `false` if the hold was not in `from`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the hold doesn't exist.
    async fn transition_hold(
        &self,
        hold_id: &HoldId,
        from: HoldStatus,
        to: HoldStatus,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// List `reserved` holds whose expiry is before `now`, oldest expiry first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_expired_holds(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Hold>>;

    /// List holds for a user, newest first, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_holds_by_user(
        &self,
        user_id: &UserId,
        status: Option<HoldStatus>,
        limit: usize,
    ) -> Result<Vec<Hold>>;

    // =========================================================================
    // Health
    // =========================================================================

    /// Check that the backend is reachable.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot serve requests.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
