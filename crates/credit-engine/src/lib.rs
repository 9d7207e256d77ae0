//! Credit accounting engine.
//!
//! This crate owns every balance mutation:
//!
//! - [`BalanceEngine`]: account lifecycle and signed credit changes through a
//!   bounded optimistic write loop
//! - [`ReservationManager`]: reserve credits before an operation, then commit,
//!   cancel or let the expiry sweep refund them
//! - [`DailyCapTracker`]: the trial plan's per-day credit allowance
//! - [`HoldSweeper`]: background task cancelling expired holds
//! - [`OperationCache`]: non-durable operation status for polling
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use credit_engine::{
//!     BalanceEngine, EngineConfig, ReservationManager, ReserveRequest, SystemClock,
//! };
//! use credit_engine_core::{LedgerReason, Plan, UserId};
//! use credit_engine_store::MemoryStore;
//!
//! # async fn run() -> credit_engine_core::Result<()> {
//! let engine = BalanceEngine::new(
//!     Arc::new(MemoryStore::new()),
//!     EngineConfig::default(),
//!     Arc::new(SystemClock),
//! );
//! let user_id = UserId::generate();
//! engine.open_account(user_id, Plan::Basic).await?;
//! engine
//!     .apply_delta(&user_id, 100, LedgerReason::CreditPack, Some("evt_1".parse()?), None)
//!     .await?;
//!
//! let holds = ReservationManager::new(engine);
//! let reservation = holds.reserve(ReserveRequest::new(user_id, 4)).await?;
//! holds.commit(&reservation.hold_id).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod balance;
pub mod clock;
pub mod config;
pub mod daily_cap;
pub mod operations;
pub mod reservation;
pub mod sweeper;

pub use balance::{AppliedDelta, BalanceEngine};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    EngineConfig, TrialOverflow, DEFAULT_HOLD_TTL, DEFAULT_MAX_CAS_RETRIES,
    DEFAULT_OPERATION_CACHE_TTL, DEFAULT_SWEEP_BATCH_SIZE, DEFAULT_SWEEP_INTERVAL,
};
pub use daily_cap::DailyCapTracker;
pub use operations::{OperationCache, OperationRecord, OperationStatus};
pub use reservation::{Reservation, ReservationManager, ReserveRequest, SweepReport};
pub use sweeper::HoldSweeper;
