//! Credit engine internal RPC service.
//!
//! Exposes the balance engine, reservations and pricing to the surrounding
//! application over HTTP:
//!
//! - Account opening, balance snapshots and plan changes
//! - Ledger history and signed balance changes
//! - Hold reserve, commit, cancel and expiry sweep
//! - Cost quotes and plan entitlements
//! - Operation status polling
//!
//! # Authentication
//!
//! All `/v1` routes require the shared service API key in `x-api-key`.
//! `/health` is public.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::{ServiceConfig, StorageBackend};
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
