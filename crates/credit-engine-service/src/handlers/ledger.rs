//! Ledger handlers.
//!
//! Grants from payment webhooks and operator corrections land here. Webhook
//! signatures are verified upstream; this service only sees the decoded event.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use credit_engine::AppliedDelta;
use credit_engine_core::{CreditPack, IdempotencyKey, LedgerReason, Plan, UserId};

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Apply delta request.
#[derive(Debug, Deserialize)]
pub struct ApplyDeltaRequest {
    /// The account to change.
    pub user_id: UserId,
    /// Signed credit change.
    pub delta: i64,
    /// Why the balance changes.
    pub reason: LedgerReason,
    /// Makes the change at-most-once (payment event id, correction ticket).
    pub idempotency_key: Option<IdempotencyKey>,
    /// Free-form context stored on the entry.
    pub metadata: Option<serde_json::Value>,
}

/// Apply a signed credit change.
pub async fn apply_delta(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    body: Result<Json<ApplyDeltaRequest>, JsonRejection>,
) -> Result<Json<AppliedDelta>, ApiError> {
    let Json(body) = body?;

    tracing::debug!(
        service = %auth.service_name,
        user_id = %body.user_id,
        delta = body.delta,
        reason = %body.reason,
        "Applying ledger delta"
    );

    let applied = state
        .engine
        .apply_delta(
            &body.user_id,
            body.delta,
            body.reason,
            body.idempotency_key,
            body.metadata,
        )
        .await?;

    Ok(Json(applied))
}

/// What a payment event grants.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Grant {
    /// One-time credit pack purchase.
    CreditPack {
        /// The pack bought.
        pack: CreditPack,
    },
    /// Subscription start or renewal. Also switches the account to `plan`.
    Subscription {
        /// The subscribed plan.
        plan: Plan,
    },
}

/// Payment grant request.
#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    /// The account to credit.
    pub user_id: UserId,
    /// Payment event id, used as the idempotency key.
    pub event_id: IdempotencyKey,
    /// What was paid for.
    pub grant: Grant,
}

/// Payment grant response.
#[derive(Debug, Serialize)]
pub struct GrantResponse {
    /// Credits granted by this event.
    pub credits: i64,
    /// Plan after the event.
    pub plan: Plan,
    /// The ledger change.
    #[serde(flatten)]
    pub applied: AppliedDelta,
}

/// Grant credits for a verified payment event.
///
/// Replaying the same `event_id` returns the original result without a second
/// grant or plan change.
pub async fn grant(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    body: Result<Json<GrantRequest>, JsonRejection>,
) -> Result<Json<GrantResponse>, ApiError> {
    let Json(body) = body?;

    let metadata = serde_json::json!({
        "event_id": body.event_id.as_str(),
        "source": auth.service_name,
    });

    let (credits, applied) = match body.grant {
        Grant::CreditPack { pack } => {
            let applied = state
                .engine
                .apply_delta(
                    &body.user_id,
                    pack.credits(),
                    LedgerReason::CreditPack,
                    Some(body.event_id.clone()),
                    Some(metadata),
                )
                .await?;
            (pack.credits(), applied)
        }
        Grant::Subscription { plan } => {
            let applied = state
                .engine
                .grant_subscription(&body.user_id, plan, body.event_id.clone(), Some(metadata))
                .await?;
            (plan.monthly_credits(), applied)
        }
    };
    let plan = state.engine.get_balance(&body.user_id).await?.plan;

    tracing::info!(
        user_id = %body.user_id,
        event_id = %body.event_id,
        credits,
        replayed = applied.replayed,
        "Payment grant processed"
    );

    Ok(Json(GrantResponse {
        credits,
        plan,
        applied,
    }))
}
