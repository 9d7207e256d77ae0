//! `PostgreSQL` storage implementation.
//!
//! Conditional writes run inside one transaction: the account `UPDATE ... WHERE
//! version = $expected` takes the row lock, so concurrent writers for the same
//! account serialize and all but the first see a version conflict. Unique
//! constraints on the idempotency key and hold id turn duplicates into
//! rollbacks.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, info, instrument};

use credit_engine_core::{
    Account, DailyUsage, Hold, HoldId, HoldSplit, HoldStatus, IdempotencyKey, LedgerEntry,
    LedgerEntryId, LedgerReason, Plan, UserId,
};

use crate::error::{Result, StoreError};
use crate::{AccountMutation, HoldWrite, LedgerStore, MutationOutcome};

const IDEMPOTENCY_KEY_CONSTRAINT: &str = "ledger_entries_idempotency_key_unique";
const HOLDS_PRIMARY_KEY: &str = "holds_pkey";

const ACCOUNT_COLUMNS: &str = "user_id, balance, version, plan, daily_used, daily_cap, \
     daily_reset_date, created_at, updated_at";
const LEDGER_COLUMNS: &str = "id, user_id, delta, daily_delta, reason, idempotency_key, \
     balance_after, metadata, created_at";
const HOLD_COLUMNS: &str = "id, user_id, amount, balance_portion, daily_portion, cap_date, \
     status, created_at, expires_at, settled_at";

/// PostgreSQL-backed storage implementation.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to the database and build a pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Database(format!("failed to connect: {e}")))?;

        info!(max_connections, "PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the embedded schema migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("migration failed: {e}")))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn update_account(
        tx: &mut Transaction<'_, Postgres>,
        mutation: &AccountMutation,
    ) -> Result<u64> {
        let account = &mutation.account;
        let daily = account.daily.as_ref();
        let result = sqlx::query(
            r"
            UPDATE accounts
            SET balance = $2, version = $3, plan = $4, daily_used = $5, daily_cap = $6,
                daily_reset_date = $7, updated_at = $8
            WHERE user_id = $1 AND version = $9
            ",
        )
        .bind(account.user_id.as_uuid())
        .bind(account.balance)
        .bind(mutation.expected_version + 1)
        .bind(account.plan.as_str())
        .bind(daily.map(|d| d.used))
        .bind(daily.map(|d| d.cap))
        .bind(daily.map(|d| d.last_reset_date))
        .bind(account.updated_at)
        .bind(mutation.expected_version)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn insert_entry(
        tx: &mut Transaction<'_, Postgres>,
        entry: &LedgerEntry,
        account_version: i64,
    ) -> std::result::Result<(), sqlx::Error> {
        sqlx::query(
            r"
            INSERT INTO ledger_entries (id, user_id, account_version, delta, daily_delta, reason,
                                        idempotency_key, balance_after, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(entry.id.to_string())
        .bind(entry.user_id.as_uuid())
        .bind(account_version)
        .bind(entry.delta)
        .bind(entry.daily_delta)
        .bind(entry.reason.as_str())
        .bind(entry.idempotency_key.as_ref().map(IdempotencyKey::as_str))
        .bind(entry.balance_after)
        .bind(&entry.metadata)
        .bind(entry.created_at)
        .execute(&mut **tx)
        .await
        .map(|_| ())
    }

    async fn insert_hold(
        tx: &mut Transaction<'_, Postgres>,
        hold: &Hold,
    ) -> std::result::Result<(), sqlx::Error> {
        sqlx::query(
            r"
            INSERT INTO holds (id, user_id, amount, balance_portion, daily_portion, cap_date,
                               status, created_at, expires_at, settled_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(hold.id.as_str())
        .bind(hold.user_id.as_uuid())
        .bind(hold.amount)
        .bind(hold.split.balance_portion)
        .bind(hold.split.daily_portion)
        .bind(hold.split.cap_date)
        .bind(hold.status.as_str())
        .bind(hold.created_at)
        .bind(hold.expires_at)
        .bind(hold.settled_at)
        .execute(&mut **tx)
        .await
        .map(|_| ())
    }

    async fn update_hold_status<'e, E>(
        executor: E,
        hold_id: &HoldId,
        from: HoldStatus,
        to: HoldStatus,
        at: DateTime<Utc>,
    ) -> Result<u64>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let result = sqlx::query(
            "UPDATE holds SET status = $3, settled_at = $4 WHERE id = $1 AND status = $2",
        )
        .bind(hold_id.as_str())
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(at)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }

    async fn account_exists(&self, user_id: &UserId) -> Result<bool> {
        Ok(sqlx::query("SELECT 1 FROM accounts WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .is_some())
    }
}

fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.is_unique_violation() && db_err.constraint() == Some(constraint)
        }
        _ => false,
    }
}

fn decode_err(err: impl std::fmt::Display) -> StoreError {
    StoreError::Serialization(err.to_string())
}

fn account_from_row(row: &PgRow) -> Result<Account> {
    let plan: String = row.try_get("plan")?;
    let daily_used: Option<i64> = row.try_get("daily_used")?;
    let daily_cap: Option<i64> = row.try_get("daily_cap")?;
    let daily_reset_date: Option<NaiveDate> = row.try_get("daily_reset_date")?;

    let daily = match (daily_used, daily_cap, daily_reset_date) {
        (Some(used), Some(cap), Some(last_reset_date)) => Some(DailyUsage {
            used,
            cap,
            last_reset_date,
        }),
        _ => None,
    };

    Ok(Account {
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        balance: row.try_get("balance")?,
        version: row.try_get("version")?,
        plan: plan.parse::<Plan>().map_err(decode_err)?,
        daily,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn entry_from_row(row: &PgRow) -> Result<LedgerEntry> {
    let id: String = row.try_get("id")?;
    let reason: String = row.try_get("reason")?;
    let key: Option<String> = row.try_get("idempotency_key")?;

    Ok(LedgerEntry {
        id: id.parse::<LedgerEntryId>().map_err(decode_err)?,
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        delta: row.try_get("delta")?,
        daily_delta: row.try_get("daily_delta")?,
        reason: LedgerReason::parse(&reason)
            .ok_or_else(|| decode_err(format!("unknown ledger reason: {reason}")))?,
        idempotency_key: key
            .map(|k| k.parse::<IdempotencyKey>())
            .transpose()
            .map_err(decode_err)?,
        balance_after: row.try_get("balance_after")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
    })
}

fn hold_from_row(row: &PgRow) -> Result<Hold> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;

    Ok(Hold {
        id: id.parse::<HoldId>().map_err(decode_err)?,
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        amount: row.try_get("amount")?,
        split: HoldSplit {
            balance_portion: row.try_get("balance_portion")?,
            daily_portion: row.try_get("daily_portion")?,
            cap_date: row.try_get("cap_date")?,
        },
        status: HoldStatus::parse(&status)
            .ok_or_else(|| decode_err(format!("unknown hold status: {status}")))?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        settled_at: row.try_get("settled_at")?,
    })
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl LedgerStore for PgStore {
    #[instrument(skip(self, account), fields(user_id = %account.user_id))]
    async fn create_account(&self, account: &Account) -> Result<()> {
        let daily = account.daily.as_ref();
        let result = sqlx::query(
            r"
            INSERT INTO accounts (user_id, balance, version, plan, daily_used, daily_cap,
                                  daily_reset_date, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(account.user_id.as_uuid())
        .bind(account.balance)
        .bind(account.version)
        .bind(account.plan.as_str())
        .bind(daily.map(|d| d.used))
        .bind(daily.map(|d| d.cap))
        .bind(daily.map(|d| d.last_reset_date))
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::AlreadyExists)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_account(&self, user_id: &UserId) -> Result<Option<Account>> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE user_id = $1");
        sqlx::query(&query)
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(account_from_row)
            .transpose()
    }

    #[instrument(
        skip(self, mutation),
        fields(user_id = %mutation.account.user_id, expected_version = mutation.expected_version)
    )]
    async fn apply_mutation(&self, mutation: &AccountMutation) -> Result<MutationOutcome> {
        let mut tx = self.pool.begin().await?;

        if Self::update_account(&mut tx, mutation).await? == 0 {
            tx.rollback().await?;
            return if self.account_exists(&mutation.account.user_id).await? {
                debug!("version conflict");
                Ok(MutationOutcome::VersionConflict)
            } else {
                Err(StoreError::NotFound)
            };
        }

        if let Some(entry) = &mutation.entry {
            if let Err(e) =
                Self::insert_entry(&mut tx, entry, mutation.expected_version + 1).await
            {
                tx.rollback().await?;
                if is_unique_violation(&e, IDEMPOTENCY_KEY_CONSTRAINT) {
                    return Ok(MutationOutcome::DuplicateIdempotencyKey);
                }
                return Err(StoreError::LedgerWrite(e.to_string()));
            }
        }

        match &mutation.hold {
            Some(HoldWrite::Insert(hold)) => {
                if let Err(e) = Self::insert_hold(&mut tx, hold).await {
                    tx.rollback().await?;
                    if is_unique_violation(&e, HOLDS_PRIMARY_KEY) {
                        return Ok(MutationOutcome::HoldConflict);
                    }
                    return Err(e.into());
                }
            }
            Some(HoldWrite::Transition { id, from, to, at }) => {
                if Self::update_hold_status(&mut *tx, id, *from, *to, *at).await? == 0 {
                    tx.rollback().await?;
                    return Ok(MutationOutcome::HoldConflict);
                }
            }
            None => {}
        }

        tx.commit().await?;
        Ok(MutationOutcome::Applied)
    }

    async fn find_ledger_entry(&self, key: &IdempotencyKey) -> Result<Option<LedgerEntry>> {
        let query = format!("SELECT {LEDGER_COLUMNS} FROM ledger_entries WHERE idempotency_key = $1");
        sqlx::query(&query)
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(entry_from_row)
            .transpose()
    }

    async fn list_ledger_entries(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let query = format!(
            "SELECT {LEDGER_COLUMNS} FROM ledger_entries WHERE user_id = $1 \
             ORDER BY account_version DESC LIMIT $2 OFFSET $3"
        );
        sqlx::query(&query)
            .bind(user_id.as_uuid())
            .bind(to_i64(limit))
            .bind(to_i64(offset))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(entry_from_row)
            .collect()
    }

    async fn get_hold(&self, hold_id: &HoldId) -> Result<Option<Hold>> {
        let query = format!("SELECT {HOLD_COLUMNS} FROM holds WHERE id = $1");
        sqlx::query(&query)
            .bind(hold_id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(hold_from_row)
            .transpose()
    }

    #[instrument(skip(self), fields(hold_id = %hold_id))]
    async fn transition_hold(
        &self,
        hold_id: &HoldId,
        from: HoldStatus,
        to: HoldStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        if Self::update_hold_status(&self.pool, hold_id, from, to, at).await? == 1 {
            return Ok(true);
        }
        match self.get_hold(hold_id).await? {
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound),
        }
    }

    async fn list_expired_holds(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Hold>> {
        let query = format!(
            "SELECT {HOLD_COLUMNS} FROM holds WHERE status = 'reserved' AND expires_at < $1 \
             ORDER BY expires_at ASC LIMIT $2"
        );
        sqlx::query(&query)
            .bind(now)
            .bind(to_i64(limit))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(hold_from_row)
            .collect()
    }

    async fn list_holds_by_user(
        &self,
        user_id: &UserId,
        status: Option<HoldStatus>,
        limit: usize,
    ) -> Result<Vec<Hold>> {
        let query = format!(
            "SELECT {HOLD_COLUMNS} FROM holds WHERE user_id = $1 \
             AND ($2::TEXT IS NULL OR status = $2) ORDER BY created_at DESC LIMIT $3"
        );
        sqlx::query(&query)
            .bind(user_id.as_uuid())
            .bind(status.map(|s| s.as_str()))
            .bind(to_i64(limit))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(hold_from_row)
            .collect()
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
