//! Pricing endpoint integration tests.

mod common;

use common::TestHarness;
use credit_engine_core::Plan;
use serde_json::json;

#[tokio::test]
async fn quote_for_plan_prices_without_account() {
    let harness = TestHarness::new();

    let response = harness
        .post("/v1/quotes")
        .json(&json!({
            "plan": "advanced",
            "operation": { "type": "image_transform", "quality": "high", "variants": 3 }
        }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["plan"], "advanced");
    assert_eq!(body["cost"], 12);
    assert_eq!(body["entitled"], true);
    assert!(body.get("balance").is_none());
    assert!(body.get("affordable").is_none());
}

#[tokio::test]
async fn quote_rounds_video_cost_up() {
    let harness = TestHarness::new();

    let response = harness
        .post("/v1/quotes")
        .json(&json!({
            "plan": "basic",
            "operation": { "type": "video_generation", "model": "standard", "duration_ms": 4200 }
        }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["cost"], 5);
}

#[tokio::test]
async fn quote_for_account_reports_affordability() {
    let harness = TestHarness::new();
    let user_id = harness.account(Plan::Basic, 6).await;
    let quote = |variants: u32| {
        json!({
            "user_id": user_id,
            "operation": { "type": "image_transform", "quality": "standard", "variants": variants }
        })
    };

    let body: serde_json::Value = harness.post("/v1/quotes").json(&quote(1)).await.json();
    assert_eq!(body["cost"], 4);
    assert_eq!(body["balance"], 6);
    assert_eq!(body["affordable"], true);

    let body: serde_json::Value = harness.post("/v1/quotes").json(&quote(2)).await.json();
    assert_eq!(body["cost"], 8);
    assert_eq!(body["affordable"], false);

    // Quoting never touches the balance.
    assert_eq!(harness.balance(&user_id).await, 6);
}

#[tokio::test]
async fn quote_for_trial_counts_daily_cap() {
    let harness = TestHarness::new();
    let user_id = harness.account(Plan::Trial, 0).await;

    let body: serde_json::Value = harness
        .post("/v1/quotes")
        .json(&json!({
            "user_id": user_id,
            "operation": { "type": "image_transform", "quality": "standard", "variants": 2 }
        }))
        .await
        .json();

    assert_eq!(body["cost"], 8);
    assert_eq!(body["daily_remaining"], 10);
    assert_eq!(body["affordable"], true);
}

#[tokio::test]
async fn quote_flags_operations_outside_plan() {
    let harness = TestHarness::new();
    let user_id = harness.account(Plan::Trial, 100).await;

    let response = harness
        .post("/v1/quotes")
        .json(&json!({
            "user_id": user_id,
            "operation": { "type": "video_generation", "model": "fast", "duration_ms": 8000 }
        }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["entitled"], false);
    assert!(body["reason"].as_str().unwrap().contains("5s"));
    assert_eq!(body["affordable"], false);
}

#[tokio::test]
async fn quote_needs_exactly_one_subject() {
    let harness = TestHarness::new();

    let response = harness
        .post("/v1/quotes")
        .json(&json!({
            "operation": { "type": "image_transform", "quality": "standard" }
        }))
        .await;

    response.assert_status_bad_request();
}

#[tokio::test]
async fn quote_rejects_zero_variants() {
    let harness = TestHarness::new();

    let response = harness
        .post("/v1/quotes")
        .json(&json!({
            "plan": "basic",
            "operation": { "type": "image_transform", "quality": "standard", "variants": 0 }
        }))
        .await;

    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "invalid_amount");
}

#[tokio::test]
async fn plan_entitlement_describes_limits() {
    let harness = TestHarness::new();

    let response = harness.get("/v1/plans/trial/entitlement").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["plan"], "trial");
    assert_eq!(body["monthly_credits"], 0);
    assert_eq!(body["daily_cap"], 10);
    assert_eq!(body["allowed_video_models"], json!(["fast"]));
    assert_eq!(body["max_video_duration_secs"], 5);

    let response = harness.get("/v1/plans/premium/entitlement").await;
    let body: serde_json::Value = response.json();
    assert_eq!(body["priority_queue"], true);
    assert!(body.get("daily_cap").is_none());

    let response = harness.get("/v1/plans/platinum/entitlement").await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "invalid_plan");
}
