//! Pricing handlers.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use credit_engine::DailyCapTracker;
use credit_engine_core::{EngineError, Entitlement, OperationKind, Plan, UserId};

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Quote request. Prices for `user_id`'s plan, or `plan` when no user is given.
#[derive(Debug, Deserialize)]
pub struct QuoteRequest {
    /// Account to quote for.
    pub user_id: Option<UserId>,
    /// Plan to quote for.
    pub plan: Option<Plan>,
    /// The operation to price.
    pub operation: OperationKind,
}

/// Quote response.
#[derive(Debug, Serialize, Deserialize)]
pub struct QuoteResponse {
    /// Plan the quote was priced for.
    pub plan: Plan,
    /// Credits the operation costs.
    pub cost: i64,
    /// Whether the plan may run the operation.
    pub entitled: bool,
    /// Why not, if `entitled` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Current balance (account quotes only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<i64>,
    /// Trial credits left today (trial account quotes only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_remaining: Option<i64>,
    /// Whether a reserve of `cost` would succeed right now (account quotes only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affordable: Option<bool>,
}

/// Price an operation without reserving anything.
pub async fn quote(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    body: Result<Json<QuoteRequest>, JsonRejection>,
) -> Result<Json<QuoteResponse>, ApiError> {
    let Json(body) = body?;

    let snapshot = match (body.user_id, body.plan) {
        (Some(user_id), None) => Some(state.engine.get_balance(&user_id).await?),
        (None, Some(_)) => None,
        _ => {
            return Err(ApiError::BadRequest(
                "exactly one of user_id and plan is required".into(),
            ))
        }
    };
    let plan = snapshot
        .as_ref()
        .map_or(body.plan.unwrap_or(Plan::Trial), |s| s.plan);

    let policy = state.engine.policy();
    let cost = policy.cost_of(plan, &body.operation)?;
    let (entitled, reason) = match policy.check_entitlement(plan, &body.operation) {
        Ok(()) => (true, None),
        Err(EngineError::NotEntitled { reason, .. }) => (false, Some(reason)),
        Err(err) => return Err(err.into()),
    };

    let mut response = QuoteResponse {
        plan,
        cost,
        entitled,
        reason,
        balance: None,
        daily_remaining: None,
        affordable: None,
    };

    if let Some(snapshot) = snapshot {
        let affordable = match &snapshot.daily {
            Some(daily) => {
                let config = state.engine.config();
                let tracker = DailyCapTracker::new(config.cap_utc_offset, config.trial_overflow);
                tracker
                    .plan_debit(daily, cost, daily.last_reset_date)
                    .is_ok_and(|split| snapshot.balance >= split.balance_portion)
            }
            None => snapshot.balance >= cost,
        };
        response.balance = Some(snapshot.balance);
        response.daily_remaining = snapshot.daily.as_ref().map(|d| d.remaining());
        response.affordable = Some(entitled && affordable);
    }

    Ok(Json(response))
}

/// Plan entitlement response.
#[derive(Debug, Serialize)]
pub struct PlanEntitlementResponse {
    /// The plan.
    pub plan: Plan,
    /// Credits granted per subscription period.
    pub monthly_credits: i64,
    /// Daily credit cap (trial only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_cap: Option<i64>,
    /// Feature limits.
    #[serde(flatten)]
    pub entitlement: Entitlement,
}

/// Describe a plan's limits.
pub async fn plan_entitlement(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(plan): Path<String>,
) -> Result<Json<PlanEntitlementResponse>, ApiError> {
    let plan: Plan = plan.parse()?;
    let policy = state.engine.policy();

    Ok(Json(PlanEntitlementResponse {
        plan,
        monthly_credits: plan.monthly_credits(),
        daily_cap: policy.daily_credits_cap(plan),
        entitlement: policy.entitlement(plan)?.clone(),
    }))
}
