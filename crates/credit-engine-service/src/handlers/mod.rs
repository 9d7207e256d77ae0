//! API handlers.

pub mod accounts;
pub mod health;
pub mod holds;
pub mod ledger;
pub mod operations;
pub mod quotes;

use credit_engine_core::{HoldId, OperationId, UserId};

use crate::error::ApiError;

/// Default page size for list endpoints.
pub(crate) const DEFAULT_LIMIT: usize = 50;

/// Largest page a list endpoint returns.
pub(crate) const MAX_LIMIT: usize = 200;

pub(crate) const fn default_limit() -> usize {
    DEFAULT_LIMIT
}

/// Parse a user id from a path segment.
pub(crate) fn parse_user_id(raw: &str) -> Result<UserId, ApiError> {
    Ok(raw.parse::<UserId>()?)
}

pub(crate) fn parse_hold_id(raw: &str) -> Result<HoldId, ApiError> {
    Ok(raw.parse::<HoldId>()?)
}

pub(crate) fn parse_operation_id(raw: &str) -> Result<OperationId, ApiError> {
    Ok(raw.parse::<OperationId>()?)
}
