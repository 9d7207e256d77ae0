//! Account endpoint integration tests.

mod common;

use axum::http::StatusCode;
use common::TestHarness;
use credit_engine_core::{Plan, UserId};
use serde_json::json;

// ============================================================================
// Opening
// ============================================================================

#[tokio::test]
async fn open_account_starts_empty() {
    let harness = TestHarness::new();
    let user_id = UserId::generate();

    let response = harness
        .post("/v1/accounts")
        .json(&json!({ "user_id": user_id, "plan": "basic" }))
        .await;

    response.assert_status(StatusCode::CREATED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["user_id"], user_id.to_string());
    assert_eq!(body["balance"], 0);
    assert_eq!(body["plan"], "basic");
    assert!(body["daily"].is_null());
}

#[tokio::test]
async fn open_trial_account_reports_daily_cap() {
    let harness = TestHarness::new();
    let user_id = UserId::generate();

    let response = harness
        .post("/v1/accounts")
        .json(&json!({ "user_id": user_id }))
        .await;

    response.assert_status(StatusCode::CREATED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["plan"], "trial");
    assert_eq!(body["daily"]["used"], 0);
    assert_eq!(body["daily"]["cap"], 10);
    assert_eq!(body["daily"]["remaining"], 10);
}

#[tokio::test]
async fn open_account_twice_conflicts() {
    let harness = TestHarness::new();
    let user_id = harness.account(Plan::Basic, 0).await;

    let response = harness
        .post("/v1/accounts")
        .json(&json!({ "user_id": user_id, "plan": "basic" }))
        .await;

    response.assert_status(StatusCode::CONFLICT);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "account_already_exists");
}

#[tokio::test]
async fn open_account_rejects_bad_body() {
    let harness = TestHarness::new();

    let response = harness
        .post("/v1/accounts")
        .json(&json!({ "user_id": "not-a-uuid" }))
        .await;

    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn open_account_without_auth_fails() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/accounts")
        .json(&json!({ "user_id": UserId::generate() }))
        .await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn wrong_api_key_is_rejected() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .get(&format!("/v1/accounts/{}", UserId::generate()))
        .add_header(
            axum::http::HeaderName::from_static("x-api-key"),
            axum::http::HeaderValue::from_static("wrong-key"),
        )
        .await;

    response.assert_status_unauthorized();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "unauthorized");
}

// ============================================================================
// Reading
// ============================================================================

#[tokio::test]
async fn get_unknown_account_is_not_found() {
    let harness = TestHarness::new();

    let response = harness
        .get(&format!("/v1/accounts/{}", UserId::generate()))
        .await;

    response.assert_status_not_found();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "account_not_found");
}

#[tokio::test]
async fn get_account_with_malformed_id_is_bad_request() {
    let harness = TestHarness::new();

    let response = harness.get("/v1/accounts/nope").await;

    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "invalid_id");
}

// ============================================================================
// Plans
// ============================================================================

#[tokio::test]
async fn set_plan_leaves_trial() {
    let harness = TestHarness::new();
    let user_id = harness.account(Plan::Trial, 0).await;

    let response = harness
        .put(&format!("/v1/accounts/{user_id}/plan"))
        .json(&json!({ "plan": "advanced" }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["plan"], "advanced");
    assert!(body["daily"].is_null());
}

#[tokio::test]
async fn set_plan_rejects_unknown_plan() {
    let harness = TestHarness::new();
    let user_id = harness.account(Plan::Basic, 0).await;

    let response = harness
        .put(&format!("/v1/accounts/{user_id}/plan"))
        .json(&json!({ "plan": "platinum" }))
        .await;

    response.assert_status_bad_request();
}

// ============================================================================
// Ledger history
// ============================================================================

#[tokio::test]
async fn ledger_lists_newest_first_with_pagination() {
    let harness = TestHarness::new();
    let user_id = harness.account(Plan::Basic, 0).await;

    for delta in [10, 20, 30] {
        harness
            .post("/v1/ledger/apply")
            .json(&json!({
                "user_id": user_id,
                "delta": delta,
                "reason": "credit_pack"
            }))
            .await
            .assert_status_ok();
    }

    let response = harness
        .get(&format!("/v1/accounts/{user_id}/ledger?limit=2"))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let entries = body["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["delta"], 30);
    assert_eq!(entries[0]["balance_after"], 60);
    assert_eq!(entries[1]["delta"], 20);
    assert_eq!(body["has_more"], true);

    let response = harness
        .get(&format!("/v1/accounts/{user_id}/ledger?limit=2&offset=2"))
        .await;
    let body: serde_json::Value = response.json();
    let entries = body["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["delta"], 10);
    assert_eq!(body["has_more"], false);
}

#[tokio::test]
async fn ledger_of_unknown_account_is_not_found() {
    let harness = TestHarness::new();

    let response = harness
        .get(&format!("/v1/accounts/{}/ledger", UserId::generate()))
        .await;

    response.assert_status_not_found();
}

#[tokio::test]
async fn ledger_rejects_malformed_query() {
    let harness = TestHarness::new();
    let user_id = harness.account(Plan::Basic, 0).await;

    let response = harness
        .get(&format!("/v1/accounts/{user_id}/ledger?limit=lots"))
        .await;

    response.assert_status_bad_request();
}

#[tokio::test]
async fn holds_filter_by_status() {
    let harness = TestHarness::new();
    let user_id = harness.account(Plan::Basic, 20).await;

    for hold_id in ["job-a", "job-b"] {
        harness
            .post("/v1/holds")
            .json(&json!({ "user_id": user_id, "amount": 3, "hold_id": hold_id }))
            .await
            .assert_status(StatusCode::CREATED);
    }
    harness
        .post("/v1/holds/job-a/commit")
        .await
        .assert_status_ok();

    let response = harness
        .get(&format!("/v1/accounts/{user_id}/holds?status=reserved"))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let holds = body["holds"].as_array().unwrap();
    assert_eq!(holds.len(), 1);
    assert_eq!(holds[0]["id"], "job-b");

    let response = harness.get(&format!("/v1/accounts/{user_id}/holds")).await;
    let body: serde_json::Value = response.json();
    assert_eq!(body["holds"].as_array().unwrap().len(), 2);
}
