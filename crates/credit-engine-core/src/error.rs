//! Error types for the credit engine.

use crate::ids::IdError;
use crate::Plan;

/// Result type for credit engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur in credit engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Account not found.
    #[error("account not found: {user_id}")]
    AccountNotFound {
        /// The user ID that was not found.
        user_id: String,
    },

    /// Account already exists.
    #[error("account already exists: {user_id}")]
    AccountAlreadyExists {
        /// The user ID that already exists.
        user_id: String,
    },

    /// The durable balance cannot cover the debit.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current balance.
        balance: i64,
        /// Credits the operation needed from the balance.
        required: i64,
    },

    /// The trial daily cap cannot cover the debit and overflow is disabled.
    #[error("daily cap exceeded: remaining={remaining}, required={required}")]
    DailyCapExceeded {
        /// Credits left under today's cap.
        remaining: i64,
        /// Credits the operation needed.
        required: i64,
    },

    /// The optimistic write lost the race too many times.
    #[error("concurrency conflict on {user_id} after {attempts} attempts")]
    ConcurrencyConflict {
        /// The contended account.
        user_id: String,
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// Hold not found.
    #[error("hold not found: {hold_id}")]
    HoldNotFound {
        /// The hold ID that was not found.
        hold_id: String,
    },

    /// The ledger write failed after the balance was validated.
    #[error("ledger insert failed: {0}")]
    LedgerInsertFailed(String),

    /// An idempotency key was reused for a different account.
    #[error("idempotency key {key} already used by another account")]
    IdempotencyConflict {
        /// The reused key.
        key: String,
    },

    /// Invalid amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// Unknown plan name.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// The plan does not include the requested feature.
    #[error("plan {plan} is not entitled: {reason}")]
    NotEntitled {
        /// The account's plan.
        plan: Plan,
        /// What was refused.
        reason: String,
    },

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl EngineError {
    /// Whether the caller may retry the same request unchanged.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }

    /// Stable machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::AccountNotFound { .. } => "ACCOUNT_NOT_FOUND",
            Self::AccountAlreadyExists { .. } => "ACCOUNT_ALREADY_EXISTS",
            Self::InsufficientCredits { .. } => "INSUFFICIENT_CREDITS",
            Self::DailyCapExceeded { .. } => "DAILY_CAP_EXCEEDED",
            Self::ConcurrencyConflict { .. } => "CONCURRENCY_CONFLICT",
            Self::HoldNotFound { .. } => "HOLD_NOT_FOUND",
            Self::LedgerInsertFailed(_) => "LEDGER_INSERT_FAILED",
            Self::IdempotencyConflict { .. } => "IDEMPOTENCY_CONFLICT",
            Self::InvalidAmount(_) => "INVALID_AMOUNT",
            Self::InvalidId(_) => "INVALID_ID",
            Self::InvalidPlan(_) => "INVALID_PLAN",
            Self::NotEntitled { .. } => "NOT_ENTITLED",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
        }
    }
}
