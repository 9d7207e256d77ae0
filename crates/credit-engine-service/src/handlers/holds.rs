//! Hold handlers.
//!
//! A request handler reserves before calling the AI provider, then commits on
//! success or cancels on failure. Holds it never settles are refunded by the sweep.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use credit_engine::{OperationRecord, Reservation, ReserveRequest, SweepReport};
use credit_engine_core::{Hold, HoldId, HoldStatus, OperationId, OperationKind, UserId};

use super::parse_hold_id;
use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Reserve request.
///
/// Exactly one of `amount` and `operation` must be given. With `operation` the
/// amount is priced from the account's plan after an entitlement check.
#[derive(Debug, Deserialize)]
pub struct CreateHoldRequest {
    /// The account to debit.
    pub user_id: UserId,
    /// Credits to hold.
    pub amount: Option<i64>,
    /// Operation to price.
    pub operation: Option<OperationKind>,
    /// Hold lifetime in seconds (default: engine setting).
    pub ttl_seconds: Option<u64>,
    /// Caller-chosen hold id, making the reserve idempotent.
    pub hold_id: Option<HoldId>,
    /// Registers a pollable operation record for this hold.
    pub operation_id: Option<OperationId>,
    /// Free-form context stored on the reserve entry.
    pub metadata: Option<serde_json::Value>,
}

/// Reserve response.
#[derive(Debug, Serialize)]
pub struct CreateHoldResponse {
    /// Credits held.
    pub amount: i64,
    /// The reservation.
    #[serde(flatten)]
    pub reservation: Reservation,
    /// The registered operation record, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<OperationRecord>,
}

/// Hold settlement response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HoldStatusResponse {
    /// The hold.
    pub hold_id: HoldId,
    /// Status after the call.
    pub status: HoldStatus,
}

/// Reserve credits for an operation.
pub async fn create_hold(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    body: Result<Json<CreateHoldRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateHoldResponse>), ApiError> {
    let Json(body) = body?;

    let (amount, metadata) = match (body.amount, &body.operation) {
        (Some(amount), None) => (amount, body.metadata),
        (None, Some(operation)) => {
            let plan = state.engine.get_balance(&body.user_id).await?.plan;
            let policy = state.engine.policy();
            policy.check_entitlement(plan, operation)?;
            let amount = policy.cost_of(plan, operation)?;
            (amount, Some(with_operation(body.metadata, operation)))
        }
        _ => {
            return Err(ApiError::BadRequest(
                "exactly one of amount and operation is required".into(),
            ))
        }
    };

    let mut request = ReserveRequest::new(body.user_id, amount);
    request.metadata = metadata;
    if let Some(hold_id) = body.hold_id {
        request = request.with_hold_id(hold_id);
    }
    if let Some(ttl) = body.ttl_seconds {
        request = request.with_ttl(Duration::from_secs(ttl));
    }

    let reservation = state.holds.reserve(request).await?;

    let operation = body.operation_id.map(|operation_id| {
        match state.operations.get(&operation_id) {
            // A replayed reserve keeps the record's progress.
            Some(existing) if reservation.replayed && existing.hold_id == reservation.hold_id => {
                existing
            }
            _ => state
                .operations
                .register(operation_id, body.user_id, reservation.hold_id.clone()),
        }
    });

    tracing::info!(
        service = %auth.service_name,
        user_id = %body.user_id,
        hold_id = %reservation.hold_id,
        amount,
        replayed = reservation.replayed,
        "Hold reserved"
    );

    let status = if reservation.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };

    Ok((
        status,
        Json(CreateHoldResponse {
            amount,
            reservation,
            operation,
        }),
    ))
}

fn with_operation(
    metadata: Option<serde_json::Value>,
    operation: &OperationKind,
) -> serde_json::Value {
    let operation = serde_json::to_value(operation).unwrap_or(serde_json::Value::Null);
    match metadata {
        Some(serde_json::Value::Object(mut map)) => {
            map.insert("operation".into(), operation);
            serde_json::Value::Object(map)
        }
        Some(other) => serde_json::json!({ "operation": operation, "context": other }),
        None => serde_json::json!({ "operation": operation }),
    }
}

/// Get a hold.
pub async fn get_hold(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(hold_id): Path<String>,
) -> Result<Json<Hold>, ApiError> {
    let hold_id = parse_hold_id(&hold_id)?;
    Ok(Json(state.holds.get_hold(&hold_id).await?))
}

/// Commit a hold: the operation succeeded.
pub async fn commit_hold(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Path(hold_id): Path<String>,
) -> Result<Json<HoldStatusResponse>, ApiError> {
    let hold_id = parse_hold_id(&hold_id)?;
    let status = state.holds.commit(&hold_id).await?;

    tracing::debug!(service = %auth.service_name, hold_id = %hold_id, status = %status, "Commit requested");

    Ok(Json(HoldStatusResponse { hold_id, status }))
}

/// Cancel a hold: the operation failed and the credits go back.
pub async fn cancel_hold(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Path(hold_id): Path<String>,
) -> Result<Json<HoldStatusResponse>, ApiError> {
    let hold_id = parse_hold_id(&hold_id)?;
    let status = state.holds.cancel(&hold_id).await?;

    tracing::debug!(service = %auth.service_name, hold_id = %hold_id, status = %status, "Cancel requested");

    Ok(Json(HoldStatusResponse { hold_id, status }))
}

/// Run one expiry sweep now.
pub async fn sweep_holds(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
) -> Result<Json<SweepReport>, ApiError> {
    let report = state.holds.sweep_expired_holds().await?;

    tracing::info!(
        service = %auth.service_name,
        scanned = report.scanned,
        canceled = report.canceled,
        "Manual sweep finished"
    );

    Ok(Json(report))
}
