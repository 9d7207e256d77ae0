//! API error types and responses.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use credit_engine_core::{EngineError, IdError};

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Resource not found outside the engine (unknown operation id).
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Error raised by the credit engine.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl From<IdError> for ApiError {
    fn from(err: IdError) -> Self {
        Self::Engine(EngineError::InvalidId(err))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

fn engine_status(err: &EngineError) -> StatusCode {
    match err {
        EngineError::AccountNotFound { .. } | EngineError::HoldNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        EngineError::InsufficientCredits { .. } | EngineError::DailyCapExceeded { .. } => {
            StatusCode::PAYMENT_REQUIRED
        }
        EngineError::AccountAlreadyExists { .. }
        | EngineError::ConcurrencyConflict { .. }
        | EngineError::IdempotencyConflict { .. } => StatusCode::CONFLICT,
        EngineError::InvalidAmount(_) | EngineError::InvalidId(_) | EngineError::InvalidPlan(_) => {
            StatusCode::BAD_REQUEST
        }
        EngineError::NotEntitled { .. } => StatusCode::FORBIDDEN,
        EngineError::LedgerInsertFailed(_)
        | EngineError::Storage(_)
        | EngineError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn engine_details(err: &EngineError) -> Option<serde_json::Value> {
    match err {
        EngineError::InsufficientCredits { balance, required } => Some(serde_json::json!({
            "balance": balance,
            "required": required
        })),
        EngineError::DailyCapExceeded {
            remaining,
            required,
        } => Some(serde_json::json!({
            "remaining": remaining,
            "required": required
        })),
        EngineError::ConcurrencyConflict { attempts, .. } => Some(serde_json::json!({
            "attempts": attempts,
            "retryable": true
        })),
        EngineError::NotEntitled { plan, .. } => Some(serde_json::json!({ "plan": plan })),
        _ => None,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized".to_string(),
                self.to_string(),
                None,
            ),
            Self::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                "not_found".to_string(),
                msg.clone(),
                None,
            ),
            Self::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "bad_request".to_string(),
                msg.clone(),
                None,
            ),
            Self::Engine(err) => {
                let status = engine_status(err);
                let message = if status.is_server_error() {
                    tracing::error!(error = %err, "Internal server error");
                    "An internal error occurred".to_string()
                } else {
                    err.to_string()
                };
                (
                    status,
                    err.code().to_ascii_lowercase(),
                    message,
                    engine_details(err),
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code,
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}
