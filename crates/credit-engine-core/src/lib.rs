//! Core types for the credit engine.
//!
//! This crate provides the foundational types shared by the store, the engine and
//! the service:
//!
//! - **Identifiers**: `UserId`, `HoldId`, `IdempotencyKey`, `LedgerEntryId`, `OperationId`
//! - **Accounts**: `Account`, `Plan`, `DailyUsage`, `BalanceSnapshot`
//! - **Ledger**: `LedgerEntry`, `LedgerReason`
//! - **Holds**: `Hold`, `HoldSplit`, `HoldStatus`
//! - **Policy**: `CostPolicy`, `OperationKind`, `Entitlement`
//!
//! # Credit Unit
//!
//! Credits are whole numbers stored as `i64`. Fractional rates (video models
//! priced per second) are kept in millicredits and rounded up when a cost is
//! computed, so balances never hold fractions.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod error;
pub mod hold;
pub mod ids;
pub mod ledger;
pub mod policy;

pub use account::{
    Account, BalanceSnapshot, DailyUsage, Plan, ADVANCED_PLAN_CREDITS, BASIC_PLAN_CREDITS,
    PREMIUM_PLAN_CREDITS,
};
pub use error::{EngineError, Result};
pub use hold::{Hold, HoldSplit, HoldStatus};
pub use ids::{
    HoldId, IdError, IdempotencyKey, LedgerEntryId, OperationId, UserId, MAX_HOLD_ID_LEN,
    MAX_IDEMPOTENCY_KEY_LEN, REFUND_KEY_PREFIX,
};
pub use ledger::{LedgerEntry, LedgerReason};
pub use policy::{
    CostPolicy, CreditPack, DownloadFormat, Entitlement, ImagePricing, OperationKind,
    QualityMode, VideoModel, DEFAULT_TRIAL_DAILY_CAP,
};
