//! Account handlers.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use credit_engine_core::{
    Account, BalanceSnapshot, DailyUsage, Hold, HoldStatus, LedgerEntry, Plan, UserId,
};

use super::{default_limit, parse_user_id, MAX_LIMIT};
use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Trial usage as reported to callers.
#[derive(Debug, Serialize, Deserialize)]
pub struct DailyUsageResponse {
    /// Credits used today.
    pub used: i64,
    /// Daily cap.
    pub cap: i64,
    /// Credits left today.
    pub remaining: i64,
    /// Day the counter refers to.
    pub last_reset_date: NaiveDate,
}

impl From<&DailyUsage> for DailyUsageResponse {
    fn from(daily: &DailyUsage) -> Self {
        Self {
            used: daily.used,
            cap: daily.cap,
            remaining: daily.remaining(),
            last_reset_date: daily.last_reset_date,
        }
    }
}

/// Account response.
#[derive(Debug, Serialize)]
pub struct AccountResponse {
    /// User ID.
    pub user_id: String,
    /// Spendable balance in credits.
    pub balance: i64,
    /// Optimistic concurrency version.
    pub version: i64,
    /// Current plan.
    pub plan: Plan,
    /// Trial usage (trial accounts only).
    pub daily: Option<DailyUsageResponse>,
}

impl From<&BalanceSnapshot> for AccountResponse {
    fn from(snapshot: &BalanceSnapshot) -> Self {
        Self {
            user_id: snapshot.user_id.to_string(),
            balance: snapshot.balance,
            version: snapshot.version,
            plan: snapshot.plan,
            daily: snapshot.daily.as_ref().map(DailyUsageResponse::from),
        }
    }
}

impl From<&Account> for AccountResponse {
    fn from(account: &Account) -> Self {
        Self::from(&account.snapshot())
    }
}

/// Open account request.
#[derive(Debug, Deserialize)]
pub struct OpenAccountRequest {
    /// The user the account belongs to.
    pub user_id: UserId,
    /// Starting plan (default: trial).
    #[serde(default = "default_plan")]
    pub plan: Plan,
}

const fn default_plan() -> Plan {
    Plan::Trial
}

/// Open a zero-balance account.
pub async fn open_account(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    body: Result<Json<OpenAccountRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AccountResponse>), ApiError> {
    let Json(body) = body?;
    let account = state.engine.open_account(body.user_id, body.plan).await?;

    tracing::debug!(service = %auth.service_name, user_id = %body.user_id, "Account opened via API");

    Ok((StatusCode::CREATED, Json(AccountResponse::from(&account))))
}

/// Get an account's balance snapshot.
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(user_id): Path<String>,
) -> Result<Json<AccountResponse>, ApiError> {
    let user_id = parse_user_id(&user_id)?;
    let snapshot = state.engine.get_balance(&user_id).await?;
    Ok(Json(AccountResponse::from(&snapshot)))
}

/// Set plan request.
#[derive(Debug, Deserialize)]
pub struct SetPlanRequest {
    /// The new plan.
    pub plan: Plan,
}

/// Switch an account's plan.
pub async fn set_plan(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Path(user_id): Path<String>,
    body: Result<Json<SetPlanRequest>, JsonRejection>,
) -> Result<Json<AccountResponse>, ApiError> {
    let user_id = parse_user_id(&user_id)?;
    let Json(body) = body?;
    let snapshot = state.engine.set_plan(&user_id, body.plan).await?;

    tracing::debug!(service = %auth.service_name, user_id = %user_id, plan = %body.plan, "Plan set via API");

    Ok(Json(AccountResponse::from(&snapshot)))
}

/// Ledger list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListLedgerQuery {
    /// Maximum number of entries to return (default: 50).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

/// List ledger response.
#[derive(Debug, Serialize)]
pub struct ListLedgerResponse {
    /// Entries (newest first).
    pub entries: Vec<LedgerEntry>,
    /// Whether there are more entries.
    pub has_more: bool,
}

/// List an account's ledger history.
pub async fn list_ledger(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(user_id): Path<String>,
    query: Result<Query<ListLedgerQuery>, QueryRejection>,
) -> Result<Json<ListLedgerResponse>, ApiError> {
    let user_id = parse_user_id(&user_id)?;
    let Query(query) = query?;

    // Fetch one more than requested to determine has_more
    let limit = query.limit.min(MAX_LIMIT);
    let mut entries = state
        .engine
        .ledger(&user_id, limit + 1, query.offset)
        .await?;

    let has_more = entries.len() > limit;
    entries.truncate(limit);

    Ok(Json(ListLedgerResponse { entries, has_more }))
}

/// Hold list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListHoldsQuery {
    /// Only holds in this status.
    pub status: Option<HoldStatus>,
    /// Maximum number of holds to return (default: 50).
    #[serde(default = "default_limit")]
    pub limit: usize,
}

/// List hold response.
#[derive(Debug, Serialize)]
pub struct ListHoldsResponse {
    /// Holds (newest first).
    pub holds: Vec<Hold>,
}

/// List an account's holds.
pub async fn list_holds(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(user_id): Path<String>,
    query: Result<Query<ListHoldsQuery>, QueryRejection>,
) -> Result<Json<ListHoldsResponse>, ApiError> {
    let user_id = parse_user_id(&user_id)?;
    let Query(query) = query?;

    // Unknown accounts are a 404, not an empty list.
    state.engine.get_balance(&user_id).await?;

    let holds = state
        .holds
        .holds_for_user(&user_id, query.status, query.limit.min(MAX_LIMIT))
        .await?;

    Ok(Json(ListHoldsResponse { holds }))
}
