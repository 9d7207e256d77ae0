//! Operation status handlers.
//!
//! Records live in memory only and disappear on restart or after their TTL.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use credit_engine::{OperationRecord, OperationStatus};

use super::parse_operation_id;
use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Get an operation's status.
pub async fn get_operation(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(operation_id): Path<String>,
) -> Result<Json<OperationRecord>, ApiError> {
    let operation_id = parse_operation_id(&operation_id)?;
    state
        .operations
        .get(&operation_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("operation not found: {operation_id}")))
}

/// Operation status update.
#[derive(Debug, Deserialize)]
pub struct UpdateOperationRequest {
    /// New status.
    pub status: OperationStatus,
    /// Progress or error detail.
    pub detail: Option<String>,
}

/// Update an operation's status.
pub async fn update_operation(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(operation_id): Path<String>,
    body: Result<Json<UpdateOperationRequest>, JsonRejection>,
) -> Result<Json<OperationRecord>, ApiError> {
    let operation_id = parse_operation_id(&operation_id)?;
    let Json(body) = body?;

    state
        .operations
        .update(&operation_id, body.status, body.detail)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("operation not found: {operation_id}")))
}
