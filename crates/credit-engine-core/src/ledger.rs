//! Ledger entry types for the credit engine.
//!
//! This module defines the append-only ledger that records every balance change.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{IdempotencyKey, LedgerEntryId, UserId};

/// A ledger entry representing one applied balance mutation.
///
/// Entries are written in the same storage transaction as the account update
/// they describe and are never mutated or deleted afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique entry ID (ULID for time-ordering).
    pub id: LedgerEntryId,

    /// The user whose balance was affected.
    pub user_id: UserId,

    /// Signed change to the durable balance.
    pub delta: i64,

    /// Signed change to the trial daily usage counter (0 for paid plans).
    pub daily_delta: i64,

    /// Why the balance changed.
    pub reason: LedgerReason,

    /// Idempotency key, unique across the ledger when present.
    pub idempotency_key: Option<IdempotencyKey>,

    /// Balance after this entry was applied.
    pub balance_after: i64,

    /// Opaque caller metadata (webhook event payload, operation id, etc.).
    pub metadata: serde_json::Value,

    /// When the entry was created.
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Create a new entry with no key, no daily component and null metadata.
    #[must_use]
    pub fn new(
        user_id: UserId,
        reason: LedgerReason,
        delta: i64,
        balance_after: i64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: LedgerEntryId::generate(),
            user_id,
            delta,
            daily_delta: 0,
            reason,
            idempotency_key: None,
            balance_after,
            metadata: serde_json::Value::Null,
            created_at,
        }
    }

    /// Set the idempotency key.
    #[must_use]
    pub fn with_idempotency_key(mut self, key: Option<IdempotencyKey>) -> Self {
        self.idempotency_key = key;
        self
    }

    /// Set the daily usage change.
    #[must_use]
    pub fn with_daily_delta(mut self, daily_delta: i64) -> Self {
        self.daily_delta = daily_delta;
        self
    }

    /// Set metadata on the entry.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Reason for a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerReason {
    /// One-time credit pack purchase.
    CreditPack,

    /// Subscription renewal allotment.
    SubscriptionGrant,

    /// Credits held for an operation that is about to start.
    Reserve,

    /// Credits returned when a hold is canceled or expires.
    RefundHold,

    /// Post-commit adjustment (e.g. fewer output variants than requested).
    CommitAdjustment,

    /// Manual correction by an operator.
    AdminCorrection,
}

impl LedgerReason {
    /// Whether entries with this reason are written only by the reservation manager.
    #[must_use]
    pub const fn is_hold_reason(&self) -> bool {
        matches!(self, Self::Reserve | Self::RefundHold)
    }

    /// Whether `delta` has an acceptable sign for this reason.
    ///
    /// Grants and refunds only add credits, reserves only remove them, and
    /// adjustments may go either way.
    #[must_use]
    pub const fn allows_delta(&self, delta: i64) -> bool {
        match self {
            Self::CreditPack | Self::SubscriptionGrant | Self::RefundHold => delta >= 0,
            Self::Reserve => delta <= 0,
            Self::CommitAdjustment | Self::AdminCorrection => true,
        }
    }

    /// Reason name as stored.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CreditPack => "credit_pack",
            Self::SubscriptionGrant => "subscription_grant",
            Self::Reserve => "reserve",
            Self::RefundHold => "refund_hold",
            Self::CommitAdjustment => "commit_adjustment",
            Self::AdminCorrection => "admin_correction",
        }
    }

    /// Parse a stored reason name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "credit_pack" => Some(Self::CreditPack),
            "subscription_grant" => Some(Self::SubscriptionGrant),
            "reserve" => Some(Self::Reserve),
            "refund_hold" => Some(Self::RefundHold),
            "commit_adjustment" => Some(Self::CommitAdjustment),
            "admin_correction" => Some(Self::AdminCorrection),
            _ => None,
        }
    }
}

impl fmt::Display for LedgerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
