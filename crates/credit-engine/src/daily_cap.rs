//! Daily trial cap tracker.
//!
//! Pure arithmetic over [`DailyUsage`]. The balance engine calls it inside its
//! optimistic write loop, so a day rollover and the debit that triggered it are
//! committed by the same conditional update.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

use credit_engine_core::{DailyUsage, EngineError, HoldSplit, Result};

use crate::config::TrialOverflow;

/// Splits trial debits between the daily cap and the durable balance.
#[derive(Debug, Clone, Copy)]
pub struct DailyCapTracker {
    offset: FixedOffset,
    overflow: TrialOverflow,
}

impl DailyCapTracker {
    /// Create a tracker using `offset` as the reference for calendar days.
    #[must_use]
    pub const fn new(offset: FixedOffset, overflow: TrialOverflow) -> Self {
        Self { offset, overflow }
    }

    /// The cap day containing `now`.
    #[must_use]
    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.offset).date_naive()
    }

    /// Reset the counter if `today` is a later day than the one it tracks.
    ///
    /// Returns `true` if a reset happened.
    pub fn rollover(&self, usage: &mut DailyUsage, today: NaiveDate) -> bool {
        if usage.last_reset_date < today {
            usage.used = 0;
            usage.last_reset_date = today;
            return true;
        }
        false
    }

    /// Decide how much of `amount` comes from the cap and how much from the balance.
    ///
    /// `usage` must already be rolled over to `today`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::DailyCapExceeded` if the debit overflows the cap and
    /// overflow is configured to reject.
    pub fn plan_debit(&self, usage: &DailyUsage, amount: i64, today: NaiveDate) -> Result<HoldSplit> {
        let remaining = usage.remaining();
        let daily_portion = amount.min(remaining);
        let balance_portion = amount - daily_portion;

        if balance_portion > 0 && self.overflow == TrialOverflow::Reject {
            return Err(EngineError::DailyCapExceeded {
                remaining,
                required: amount,
            });
        }

        Ok(HoldSplit {
            balance_portion,
            daily_portion,
            cap_date: (daily_portion > 0).then_some(today),
        })
    }

    /// Give back the daily portion of a refunded hold.
    ///
    /// Only a portion drawn against `today` is restored; an earlier day's counter
    /// has already been reset. Returns the amount removed from `used`.
    pub fn plan_refund(&self, usage: &mut DailyUsage, split: &HoldSplit, today: NaiveDate) -> i64 {
        if split.daily_portion <= 0 || split.cap_date != Some(today) || usage.last_reset_date != today {
            return 0;
        }
        let restored = split.daily_portion.min(usage.used);
        usage.used -= restored;
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Offset, TimeZone};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, d).unwrap()
    }

    fn tracker(overflow: TrialOverflow) -> DailyCapTracker {
        DailyCapTracker::new(Utc.fix(), overflow)
    }

    #[test]
    fn today_respects_offset() {
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 23, 30, 0).unwrap();
        assert_eq!(tracker(TrialOverflow::Reject).today(now), day(1));

        let plus_one = DailyCapTracker::new(
            FixedOffset::east_opt(3600).unwrap(),
            TrialOverflow::Reject,
        );
        assert_eq!(plus_one.today(now), day(2));
    }

    #[test]
    fn rollover_resets_once_per_day() {
        let t = tracker(TrialOverflow::SpillToBalance);
        let mut usage = DailyUsage {
            used: 9,
            cap: 10,
            last_reset_date: day(1),
        };
        assert!(!t.rollover(&mut usage, day(1)));
        assert_eq!(usage.used, 9);

        assert!(t.rollover(&mut usage, day(2)));
        assert_eq!(usage.used, 0);
        assert_eq!(usage.last_reset_date, day(2));
    }

    #[test]
    fn debit_within_cap_is_all_daily() {
        let t = tracker(TrialOverflow::Reject);
        let usage = DailyUsage::new(10, day(1));
        let split = t.plan_debit(&usage, 4, day(1)).unwrap();
        assert_eq!(split.daily_portion, 4);
        assert_eq!(split.balance_portion, 0);
        assert_eq!(split.cap_date, Some(day(1)));
    }

    #[test]
    fn overflow_spills_to_balance() {
        let t = tracker(TrialOverflow::SpillToBalance);
        let usage = DailyUsage {
            used: 48,
            cap: 50,
            last_reset_date: day(1),
        };
        let split = t.plan_debit(&usage, 4, day(1)).unwrap();
        assert_eq!(split.daily_portion, 2);
        assert_eq!(split.balance_portion, 2);
    }

    #[test]
    fn overflow_rejected_when_configured() {
        let t = tracker(TrialOverflow::Reject);
        let usage = DailyUsage {
            used: 8,
            cap: 10,
            last_reset_date: day(1),
        };
        let err = t.plan_debit(&usage, 4, day(1)).unwrap_err();
        assert!(matches!(
            err,
            EngineError::DailyCapExceeded {
                remaining: 2,
                required: 4
            }
        ));
    }

    #[test]
    fn exhausted_cap_records_no_cap_date() {
        let t = tracker(TrialOverflow::SpillToBalance);
        let usage = DailyUsage {
            used: 10,
            cap: 10,
            last_reset_date: day(1),
        };
        let split = t.plan_debit(&usage, 3, day(1)).unwrap();
        assert_eq!(split, HoldSplit::balance_only(3));
    }

    #[test]
    fn refund_restores_same_day_portion_only() {
        let t = tracker(TrialOverflow::SpillToBalance);
        let split = HoldSplit {
            balance_portion: 2,
            daily_portion: 2,
            cap_date: Some(day(1)),
        };

        let mut usage = DailyUsage {
            used: 50,
            cap: 50,
            last_reset_date: day(1),
        };
        assert_eq!(t.plan_refund(&mut usage, &split, day(1)), 2);
        assert_eq!(usage.used, 48);

        let mut next_day = DailyUsage::new(50, day(2));
        next_day.used = 1;
        assert_eq!(t.plan_refund(&mut next_day, &split, day(2)), 0);
        assert_eq!(next_day.used, 1);
    }

    #[test]
    fn refund_saturates_at_zero() {
        let t = tracker(TrialOverflow::SpillToBalance);
        let split = HoldSplit {
            balance_portion: 0,
            daily_portion: 5,
            cap_date: Some(day(1)),
        };
        let mut usage = DailyUsage {
            used: 3,
            cap: 10,
            last_reset_date: day(1),
        };
        assert_eq!(t.plan_refund(&mut usage, &split, day(1)), 3);
        assert_eq!(usage.used, 0);
    }
}
