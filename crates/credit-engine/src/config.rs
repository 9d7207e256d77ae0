//! Engine configuration.

use std::str::FromStr;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};

use credit_engine_core::CostPolicy;

/// Default number of optimistic write attempts per mutation.
pub const DEFAULT_MAX_CAS_RETRIES: u32 = 5;

/// Default hold lifetime. Must exceed the caller's downstream timeout.
pub const DEFAULT_HOLD_TTL: Duration = Duration::from_secs(15 * 60);

/// Default delay between sweeps of expired holds.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(120);

/// Default number of expired holds loaded per sweep batch.
pub const DEFAULT_SWEEP_BATCH_SIZE: usize = 100;

/// Default lifetime of operation status records.
pub const DEFAULT_OPERATION_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// What happens when a trial debit is larger than what is left under today's cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrialOverflow {
    /// Take the remainder from the durable balance.
    #[default]
    SpillToBalance,

    /// Refuse the debit with `DailyCapExceeded`.
    Reject,
}

impl FromStr for TrialOverflow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spill" => Ok(Self::SpillToBalance),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown trial overflow mode: {other}")),
        }
    }
}

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Optimistic write attempts before `ConcurrencyConflict` (default: 5).
    pub max_cas_retries: u32,

    /// Hold lifetime when the caller does not pass one (default: 15 minutes).
    pub default_hold_ttl: Duration,

    /// Delay between background sweeps (default: 2 minutes).
    pub sweep_interval: Duration,

    /// Expired holds loaded per sweep batch (default: 100).
    pub sweep_batch_size: usize,

    /// Reference offset for the trial cap day (default: UTC).
    pub cap_utc_offset: FixedOffset,

    /// Trial debits beyond the daily cap (default: spill to balance).
    pub trial_overflow: TrialOverflow,

    /// Lifetime of operation status records (default: 1 hour).
    pub operation_cache_ttl: Duration,

    /// Cost and entitlement tables.
    pub policy: CostPolicy,
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Unparseable values fall back to the default with a warning.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let offset_minutes: i32 = env_or("CAP_UTC_OFFSET_MINUTES", 0);
        let cap_utc_offset = FixedOffset::east_opt(offset_minutes.saturating_mul(60))
            .unwrap_or_else(|| {
                tracing::warn!(
                    offset_minutes,
                    "CAP_UTC_OFFSET_MINUTES out of range, using UTC"
                );
                defaults.cap_utc_offset
            });

        Self {
            max_cas_retries: env_or("CAS_MAX_RETRIES", DEFAULT_MAX_CAS_RETRIES).max(1),
            default_hold_ttl: Duration::from_secs(env_or(
                "DEFAULT_HOLD_TTL_SECONDS",
                DEFAULT_HOLD_TTL.as_secs(),
            )),
            sweep_interval: Duration::from_secs(env_or(
                "SWEEP_INTERVAL_SECONDS",
                DEFAULT_SWEEP_INTERVAL.as_secs(),
            )),
            sweep_batch_size: env_or("SWEEP_BATCH_SIZE", DEFAULT_SWEEP_BATCH_SIZE).max(1),
            cap_utc_offset,
            trial_overflow: env_or("TRIAL_OVERFLOW", TrialOverflow::default()),
            operation_cache_ttl: Duration::from_secs(env_or(
                "OPERATION_CACHE_TTL_SECONDS",
                DEFAULT_OPERATION_CACHE_TTL.as_secs(),
            )),
            policy: defaults.policy,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_cas_retries: DEFAULT_MAX_CAS_RETRIES,
            default_hold_ttl: DEFAULT_HOLD_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            sweep_batch_size: DEFAULT_SWEEP_BATCH_SIZE,
            cap_utc_offset: Utc.fix(),
            trial_overflow: TrialOverflow::default(),
            operation_cache_ttl: DEFAULT_OPERATION_CACHE_TTL,
            policy: CostPolicy::default(),
        }
    }
}

/// Read and parse an environment variable, falling back to `default`.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(variable = name, value = %raw, "invalid configuration value, using default");
            default
        }),
        Err(_) => default,
    }
}
