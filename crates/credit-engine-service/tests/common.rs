//! Common test utilities for credit engine service integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use axum::Router;
use axum_test::{TestRequest, TestServer};
use chrono::{TimeZone, Utc};
use serde_json::json;

use credit_engine::ManualClock;
use credit_engine_core::{Plan, UserId};
use credit_engine_service::{create_router, AppState, ServiceConfig};
use credit_engine_store::MemoryStore;

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The service API key for authenticated requests.
    pub service_api_key: String,
    /// The clock the engine reads.
    pub clock: Arc<ManualClock>,
}

impl TestHarness {
    /// Create a new test harness backed by a fresh in-memory store.
    pub fn new() -> Self {
        Self::with_config(ServiceConfig::default())
    }

    /// Create a harness with custom configuration. The API key is always set.
    pub fn with_config(mut config: ServiceConfig) -> Self {
        let service_api_key = "test-service-key".to_string();
        config.service_api_key = Some(service_api_key.clone());
        config.run_sweeper = false;

        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 5, 1, 10, 0, 0).unwrap(),
        ));
        let state = AppState::with_clock(Arc::new(MemoryStore::new()), config, clock.clone());
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            service_api_key,
            clock,
        }
    }

    fn authed(&self, request: TestRequest) -> TestRequest {
        request
            .add_header(
                HeaderName::from_static("x-api-key"),
                HeaderValue::from_str(&self.service_api_key).unwrap(),
            )
            .add_header(
                HeaderName::from_static("x-service-name"),
                HeaderValue::from_static("integration-tests"),
            )
    }

    /// Authenticated GET.
    pub fn get(&self, path: &str) -> TestRequest {
        self.authed(self.server.get(path))
    }

    /// Authenticated POST.
    pub fn post(&self, path: &str) -> TestRequest {
        self.authed(self.server.post(path))
    }

    /// Authenticated PUT.
    pub fn put(&self, path: &str) -> TestRequest {
        self.authed(self.server.put(path))
    }

    /// Open an account on `plan` and grant it `balance` credits.
    pub async fn account(&self, plan: Plan, balance: i64) -> UserId {
        let user_id = UserId::generate();
        let response = self
            .post("/v1/accounts")
            .json(&json!({ "user_id": user_id, "plan": plan }))
            .await;
        assert_eq!(response.status_code(), 201, "open account failed");

        if balance > 0 {
            self.post("/v1/ledger/apply")
                .json(&json!({
                    "user_id": user_id,
                    "delta": balance,
                    "reason": "admin_correction"
                }))
                .await
                .assert_status_ok();
        }
        user_id
    }

    /// Current balance.
    pub async fn balance(&self, user_id: &UserId) -> i64 {
        let response = self.get(&format!("/v1/accounts/{user_id}")).await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        body["balance"].as_i64().expect("balance missing")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
