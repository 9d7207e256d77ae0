//! Router configuration.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post, put};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{accounts, health, holds, ledger, operations, quotes};
use crate::state::AppState;

/// Maximum concurrent requests on the hold endpoints.
///
/// Reserve and settle sit on the hot path of every AI request.
const HOLD_MAX_CONCURRENT_REQUESTS: usize = 200;

/// Maximum concurrent requests for the remaining API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Accounts (service API key)
/// - `POST /v1/accounts` - Open an account
/// - `GET /v1/accounts/:user_id` - Balance snapshot
/// - `PUT /v1/accounts/:user_id/plan` - Switch plan
/// - `GET /v1/accounts/:user_id/ledger` - Ledger history
/// - `GET /v1/accounts/:user_id/holds` - Holds
///
/// ## Ledger (service API key)
/// - `POST /v1/ledger/apply` - Signed credit change
/// - `POST /v1/ledger/grants` - Credits for a verified payment event
///
/// ## Holds (service API key, own concurrency limit)
/// - `POST /v1/holds` - Reserve
/// - `GET /v1/holds/:hold_id` - Get hold
/// - `POST /v1/holds/:hold_id/commit` - Commit
/// - `POST /v1/holds/:hold_id/cancel` - Cancel and refund
/// - `POST /v1/holds/sweep` - Run an expiry sweep now
///
/// ## Pricing (service API key)
/// - `POST /v1/quotes` - Price an operation
/// - `GET /v1/plans/:plan/entitlement` - Plan limits
///
/// ## Operations (service API key)
/// - `GET /v1/operations/:operation_id` - Status
/// - `PUT /v1/operations/:operation_id` - Update status
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let hold_routes = Router::new()
        .route("/", post(holds::create_hold))
        .route("/sweep", post(holds::sweep_holds))
        .route("/:hold_id", get(holds::get_hold))
        .route("/:hold_id/commit", post(holds::commit_hold))
        .route("/:hold_id/cancel", post(holds::cancel_hold))
        .layer(ConcurrencyLimitLayer::new(HOLD_MAX_CONCURRENT_REQUESTS));

    let api_routes = Router::new()
        // Accounts
        .route("/accounts", post(accounts::open_account))
        .route("/accounts/:user_id", get(accounts::get_account))
        .route("/accounts/:user_id/plan", put(accounts::set_plan))
        .route("/accounts/:user_id/ledger", get(accounts::list_ledger))
        .route("/accounts/:user_id/holds", get(accounts::list_holds))
        // Ledger
        .route("/ledger/apply", post(ledger::apply_delta))
        .route("/ledger/grants", post(ledger::grant))
        // Pricing
        .route("/quotes", post(quotes::quote))
        .route("/plans/:plan/entitlement", get(quotes::plan_entitlement))
        // Operations
        .route(
            "/operations/:operation_id",
            get(operations::get_operation).put(operations::update_operation),
        )
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS))
        .nest("/holds", hold_routes);

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        .nest("/v1", api_routes)
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
