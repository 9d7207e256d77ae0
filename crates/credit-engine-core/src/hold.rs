//! Hold types for the credit engine.
//!
//! A hold is an in-flight reservation: credits are taken from the account when the
//! hold is created and either kept (commit) or returned (cancel) when it settles.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{HoldId, UserId};

/// An in-flight reservation of credits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    /// Hold ID, also the idempotency key of the originating `reserve` entry.
    pub id: HoldId,

    /// The account the credits were taken from.
    pub user_id: UserId,

    /// Total credits held.
    pub amount: i64,

    /// Where the held credits came from.
    pub split: HoldSplit,

    /// Current status.
    pub status: HoldStatus,

    /// When the hold was created.
    pub created_at: DateTime<Utc>,

    /// After this instant the sweep may cancel the hold.
    pub expires_at: DateTime<Utc>,

    /// When the hold reached a terminal state.
    pub settled_at: Option<DateTime<Utc>>,
}

impl Hold {
    /// Whether the hold is still `reserved` past its expiry.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == HoldStatus::Reserved && self.expires_at < now
    }
}

/// The per-operation split between the trial daily cap and the durable balance.
///
/// Recorded on the hold so a refund restores exactly what was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldSplit {
    /// Credits taken from the durable balance.
    pub balance_portion: i64,

    /// Credits taken from the trial daily cap.
    pub daily_portion: i64,

    /// The cap day the daily portion was drawn against.
    pub cap_date: Option<NaiveDate>,
}

impl HoldSplit {
    /// A split drawn entirely from the durable balance.
    #[must_use]
    pub const fn balance_only(amount: i64) -> Self {
        Self {
            balance_portion: amount,
            daily_portion: 0,
            cap_date: None,
        }
    }

    /// Total credits in the split.
    #[must_use]
    pub const fn total(&self) -> i64 {
        self.balance_portion + self.daily_portion
    }
}

/// Status of a hold.
///
/// `Reserved` moves to exactly one of the two terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldStatus {
    /// Credits are held, settlement pending.
    Reserved,

    /// The operation succeeded; the credits stay spent.
    Committed,

    /// The operation failed, timed out or expired; the credits were refunded.
    Canceled,
}

impl HoldStatus {
    /// Whether the status is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Reserved)
    }

    /// Whether `self → next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Reserved, Self::Committed | Self::Canceled)
        )
    }

    /// Status name as stored.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Reserved => "reserved",
            Self::Committed => "committed",
            Self::Canceled => "canceled",
        }
    }

    /// Parse a stored status name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reserved" => Some(Self::Reserved),
            "committed" => Some(Self::Committed),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }
}

impl fmt::Display for HoldStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
