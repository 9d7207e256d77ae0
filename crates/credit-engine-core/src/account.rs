//! Account types for the credit engine.
//!
//! This module defines the per-user account row: durable balance, the optimistic
//! concurrency version, the plan, and the trial-only daily usage counter.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

// ============================================================================
// Constants
// ============================================================================

/// Basic plan monthly credit allowance.
pub const BASIC_PLAN_CREDITS: i64 = 200;

/// Advanced plan monthly credit allowance.
pub const ADVANCED_PLAN_CREDITS: i64 = 600;

/// Premium plan monthly credit allowance.
pub const PREMIUM_PLAN_CREDITS: i64 = 1500;

/// A credit account for a user.
///
/// The balance is only ever mutated through the balance engine, which bumps
/// `version` on every successful write. Accounts are never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// The user ID.
    pub user_id: UserId,

    /// Spendable credits (subscription allotment plus purchased packs).
    ///
    /// Never negative.
    pub balance: i64,

    /// Optimistic concurrency token, incremented on every mutation.
    pub version: i64,

    /// Current plan.
    pub plan: Plan,

    /// Daily usage counter, present only on trial accounts.
    pub daily: Option<DailyUsage>,

    /// When the account was created.
    pub created_at: DateTime<Utc>,

    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new account with zero balance.
    ///
    /// `daily` must be provided for trial accounts; it is ignored otherwise.
    #[must_use]
    pub fn new(user_id: UserId, plan: Plan, daily: Option<DailyUsage>, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            balance: 0,
            version: 0,
            daily: if plan.is_trial() { daily } else { None },
            plan,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the account has sufficient balance for a deduction.
    #[must_use]
    pub fn has_sufficient_credits(&self, amount: i64) -> bool {
        self.balance >= amount
    }

    /// Point-in-time view of the account.
    #[must_use]
    pub fn snapshot(&self) -> BalanceSnapshot {
        BalanceSnapshot {
            user_id: self.user_id,
            balance: self.balance,
            version: self.version,
            plan: self.plan,
            daily: self.daily.clone(),
        }
    }
}

/// Trial daily usage counter.
///
/// Lives on the account row so that a rollover reset and the debit that
/// follows it are written by the same conditional update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyUsage {
    /// Credits drawn from the cap on `last_reset_date`.
    pub used: i64,

    /// Credits allowed per calendar day.
    pub cap: i64,

    /// The cap day `used` refers to.
    pub last_reset_date: NaiveDate,
}

impl DailyUsage {
    /// Create a fresh counter for the given day.
    #[must_use]
    pub const fn new(cap: i64, today: NaiveDate) -> Self {
        Self {
            used: 0,
            cap,
            last_reset_date: today,
        }
    }

    /// Credits still available today, never negative.
    #[must_use]
    pub fn remaining(&self) -> i64 {
        (self.cap - self.used).max(0)
    }
}

/// Point-in-time balance view returned by `get_balance`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    /// The user ID.
    pub user_id: UserId,
    /// Spendable balance.
    pub balance: i64,
    /// Current version.
    pub version: i64,
    /// Current plan.
    pub plan: Plan,
    /// Trial daily usage, if any.
    pub daily: Option<DailyUsage>,
}

/// Available plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    /// Trial: no monthly grant, usage limited by a daily cap.
    Trial,

    /// Basic subscription.
    Basic,

    /// Advanced subscription.
    Advanced,

    /// Premium subscription.
    Premium,
}

impl Plan {
    /// All plans, cheapest first.
    pub const ALL: [Self; 4] = [Self::Trial, Self::Basic, Self::Advanced, Self::Premium];

    /// Whether this is the trial plan.
    #[must_use]
    pub const fn is_trial(&self) -> bool {
        matches!(self, Self::Trial)
    }

    /// Monthly credit allowance granted on subscription renewal.
    #[must_use]
    pub const fn monthly_credits(&self) -> i64 {
        match self {
            Self::Trial => 0,
            Self::Basic => BASIC_PLAN_CREDITS,
            Self::Advanced => ADVANCED_PLAN_CREDITS,
            Self::Premium => PREMIUM_PLAN_CREDITS,
        }
    }

    /// Plan name as stored and sent over the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trial => "trial",
            Self::Basic => "basic",
            Self::Advanced => "advanced",
            Self::Premium => "premium",
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = crate::EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trial" => Ok(Self::Trial),
            "basic" => Ok(Self::Basic),
            "advanced" => Ok(Self::Advanced),
            "premium" => Ok(Self::Premium),
            other => Err(crate::EngineError::InvalidPlan(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 14).unwrap()
    }

    #[test]
    fn new_account_has_zero_balance() {
        let account = Account::new(UserId::generate(), Plan::Basic, None, Utc::now());
        assert_eq!(account.balance, 0);
        assert_eq!(account.version, 0);
        assert!(account.daily.is_none());
    }

    #[test]
    fn daily_usage_dropped_for_paid_plans() {
        let daily = DailyUsage::new(10, today());
        let account = Account::new(UserId::generate(), Plan::Premium, Some(daily), Utc::now());
        assert!(account.daily.is_none());
    }

    #[test]
    fn trial_account_keeps_daily_usage() {
        let daily = DailyUsage::new(10, today());
        let account = Account::new(UserId::generate(), Plan::Trial, Some(daily.clone()), Utc::now());
        assert_eq!(account.daily, Some(daily));
    }

    #[test]
    fn daily_remaining_never_negative() {
        let mut daily = DailyUsage::new(10, today());
        daily.used = 12;
        assert_eq!(daily.remaining(), 0);
        daily.used = 7;
        assert_eq!(daily.remaining(), 3);
    }

    #[test]
    fn account_sufficient_credits() {
        let mut account = Account::new(UserId::generate(), Plan::Basic, None, Utc::now());
        account.balance = 10;
        assert!(account.has_sufficient_credits(10));
        assert!(!account.has_sufficient_credits(11));
    }

    #[test]
    fn plan_parse_and_display() {
        for plan in Plan::ALL {
            assert_eq!(plan.as_str().parse::<Plan>().unwrap(), plan);
        }
        assert!("enterprise".parse::<Plan>().is_err());
    }

    #[test]
    fn plan_monthly_credits() {
        assert_eq!(Plan::Trial.monthly_credits(), 0);
        assert_eq!(Plan::Basic.monthly_credits(), 200);
        assert_eq!(Plan::Premium.monthly_credits(), 1500);
    }
}
