//! Request and response types for the credit engine client.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use credit_engine_core::{
    HoldId, HoldSplit, HoldStatus, IdempotencyKey, LedgerEntryId, LedgerReason, OperationId,
    OperationKind, Plan, UserId,
};

pub use credit_engine_core::Hold;

/// Trial usage for the current cap day.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DailyUsage {
    /// Credits used today.
    pub used: i64,
    /// Daily cap.
    pub cap: i64,
    /// Credits left today.
    pub remaining: i64,
    /// Day the counter refers to.
    pub last_reset_date: NaiveDate,
}

/// Account balance snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Balance {
    /// User ID.
    pub user_id: UserId,
    /// Spendable balance in credits.
    pub balance: i64,
    /// Optimistic concurrency version.
    pub version: i64,
    /// Current plan.
    pub plan: Plan,
    /// Trial usage (trial accounts only).
    pub daily: Option<DailyUsage>,
}

/// Reserve request.
#[derive(Debug, Clone, Serialize)]
pub struct ReserveRequest {
    /// The account to debit.
    pub user_id: UserId,
    /// Credits to hold. Mutually exclusive with `operation`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    /// Operation for the service to price. Mutually exclusive with `amount`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<OperationKind>,
    /// Hold lifetime in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
    /// Caller-chosen hold id. Retrying with the same id never double-debits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hold_id: Option<HoldId>,
    /// Registers a pollable operation record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<OperationId>,
    /// Free-form context stored on the reserve entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ReserveRequest {
    /// Hold a fixed amount.
    #[must_use]
    pub const fn amount(user_id: UserId, amount: i64) -> Self {
        Self {
            user_id,
            amount: Some(amount),
            operation: None,
            ttl_seconds: None,
            hold_id: None,
            operation_id: None,
            metadata: None,
        }
    }

    /// Hold whatever `operation` costs on the account's plan.
    #[must_use]
    pub const fn operation(user_id: UserId, operation: OperationKind) -> Self {
        Self {
            user_id,
            amount: None,
            operation: Some(operation),
            ttl_seconds: None,
            hold_id: None,
            operation_id: None,
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
    pub fn with_ttl_seconds(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = Some(ttl_seconds);
        self
    }

    /// Register an operation status record for this hold.
    #[must_use]
    pub fn with_operation_id(mut self, operation_id: OperationId) -> Self {
        self.operation_id = Some(operation_id);
        self
    }
}

/// Operation status as tracked by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Registered, not started.
    Pending,
    /// Running at the provider.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Failed or timed out.
    Failed,
}

/// Operation status record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OperationRecord {
    /// The operation.
    pub operation_id: OperationId,
    /// The account paying for it.
    pub user_id: UserId,
    /// The hold covering its cost.
    pub hold_id: HoldId,
    /// Current status.
    pub status: OperationStatus,
    /// Progress or error detail.
    pub detail: Option<String>,
    /// Last change.
    pub updated_at: DateTime<Utc>,
}

/// Reserve response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Reservation {
    /// The hold.
    pub hold_id: HoldId,
    /// Credits held.
    pub amount: i64,
    /// Balance right after the reserve.
    pub balance_after: i64,
    /// When the hold expires.
    pub expires_at: DateTime<Utc>,
    /// Where the held credits came from.
    pub split: HoldSplit,
    /// Current hold status.
    pub status: HoldStatus,
    /// `true` if the hold id had already been reserved.
    pub replayed: bool,
    /// The registered operation record, if any.
    pub operation: Option<OperationRecord>,
}

/// Commit or cancel response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settlement {
    /// The hold.
    pub hold_id: HoldId,
    /// Status after the call.
    pub status: HoldStatus,
}

/// Apply delta request.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyDeltaRequest {
    /// The account to change.
    pub user_id: UserId,
    /// Signed credit change.
    pub delta: i64,
    /// Why the balance changes.
    pub reason: LedgerReason,
    /// Makes the change at-most-once.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<IdempotencyKey>,
    /// Free-form context stored on the entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Result of a balance change.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AppliedDelta {
    /// Balance after the change.
    pub balance: i64,
    /// Account version after the change.
    pub version: i64,
    /// The ledger entry.
    pub entry_id: LedgerEntryId,
    /// `true` if the idempotency key had already been applied.
    pub replayed: bool,
}

/// Quote request.
#[derive(Debug, Clone, Serialize)]
pub struct QuoteRequest {
    /// Account to quote for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    /// Plan to quote for when no account is given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    /// The operation to price.
    pub operation: OperationKind,
}

/// Quote response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Quote {
    /// Plan the quote was priced for.
    pub plan: Plan,
    /// Credits the operation costs.
    pub cost: i64,
    /// Whether the plan may run the operation.
    pub entitled: bool,
    /// Why not, if `entitled` is false.
    pub reason: Option<String>,
    /// Current balance (account quotes only).
    pub balance: Option<i64>,
    /// Trial credits left today.
    pub daily_remaining: Option<i64>,
    /// Whether a reserve would succeed right now (account quotes only).
    pub affordable: Option<bool>,
}

/// API error response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    /// Error details.
    pub error: ApiErrorBody,
}

/// API error body.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    /// Error code.
    pub code: String,
    /// Error message.
    pub message: String,
    /// Additional details.
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub(crate) struct OpenAccountBody {
    pub user_id: UserId,
    pub plan: Plan,
}

#[derive(Debug, Serialize)]
pub(crate) struct UpdateOperationBody {
    pub status: OperationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
