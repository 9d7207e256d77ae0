//! Health endpoint integration tests.

mod common;

use common::TestHarness;

#[tokio::test]
async fn health_check_returns_ok() {
    let harness = TestHarness::new();

    let response = harness.server.get("/health").await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "credit-engine");
    assert_eq!(body["storage"], "memory");
}

#[tokio::test]
async fn health_check_needs_no_api_key() {
    let harness = TestHarness::new();

    let response = harness.server.get("/v1/accounts/00000000-0000-0000-0000-000000000000").await;
    response.assert_status_unauthorized();

    harness.server.get("/health").await.assert_status_ok();
}
