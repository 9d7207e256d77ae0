//! Hold lifecycle: reserve, commit, cancel and their races.

mod common;

use futures::future::join_all;

use common::TestHarness;
use credit_engine::ReserveRequest;
use credit_engine_core::{
    EngineError, HoldId, HoldStatus, IdError, IdempotencyKey, LedgerReason, Plan, UserId,
};

#[tokio::test]
async fn reserve_then_commit_keeps_credits() {
    let harness = TestHarness::new();
    let user_id = harness.account(Plan::Basic, 20).await;

    let reservation = harness
        .holds
        .reserve(ReserveRequest::new(user_id, 7))
        .await
        .unwrap();
    assert_eq!(reservation.balance_after, 13);

    let status = harness.holds.commit(&reservation.hold_id).await.unwrap();
    assert_eq!(status, HoldStatus::Committed);
    assert_eq!(harness.balance(&user_id).await, 13);

    let reserves = harness.entries_with(&user_id, LedgerReason::Reserve).await;
    assert_eq!(reserves.len(), 1);
    assert_eq!(reserves[0].delta, -7);
    assert_eq!(
        reserves[0].idempotency_key.as_ref().map(|k| k.as_str()),
        Some(reservation.hold_id.as_str())
    );
    assert!(harness
        .entries_with(&user_id, LedgerReason::RefundHold)
        .await
        .is_empty());

    let hold = harness.holds.get_hold(&reservation.hold_id).await.unwrap();
    assert!(hold.settled_at.is_some());
}

#[tokio::test]
async fn reserve_then_cancel_restores_balance() {
    let harness = TestHarness::new();
    let user_id = harness.account(Plan::Basic, 20).await;

    let reservation = harness
        .holds
        .reserve(ReserveRequest::new(user_id, 7))
        .await
        .unwrap();
    let status = harness.holds.cancel(&reservation.hold_id).await.unwrap();
    assert_eq!(status, HoldStatus::Canceled);
    assert_eq!(harness.balance(&user_id).await, 20);

    let refunds = harness.entries_with(&user_id, LedgerReason::RefundHold).await;
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].delta, 7);
    assert_eq!(
        refunds[0].idempotency_key.as_ref().map(|k| k.as_str().to_string()),
        Some(format!("refund_{}", reservation.hold_id))
    );
}

#[tokio::test]
async fn double_cancel_refunds_once() {
    let harness = TestHarness::new();
    let user_id = harness.account(Plan::Basic, 20).await;
    let reservation = harness
        .holds
        .reserve(ReserveRequest::new(user_id, 7))
        .await
        .unwrap();

    assert_eq!(
        harness.holds.cancel(&reservation.hold_id).await.unwrap(),
        HoldStatus::Canceled
    );
    assert_eq!(
        harness.holds.cancel(&reservation.hold_id).await.unwrap(),
        HoldStatus::Canceled
    );
    assert_eq!(harness.balance(&user_id).await, 20);
    assert_eq!(
        harness
            .entries_with(&user_id, LedgerReason::RefundHold)
            .await
            .len(),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_cancels_refund_once() {
    let harness = TestHarness::new();
    let user_id = harness.account(Plan::Basic, 20).await;
    let reservation = harness
        .holds
        .reserve(ReserveRequest::new(user_id, 7))
        .await
        .unwrap();

    let cancels = (0..8).map(|_| {
        let holds = harness.holds.clone();
        let hold_id = reservation.hold_id.clone();
        tokio::spawn(async move { holds.cancel(&hold_id).await })
    });
    for joined in join_all(cancels).await {
        assert_eq!(joined.unwrap().unwrap(), HoldStatus::Canceled);
    }

    assert_eq!(harness.balance(&user_id).await, 20);
    assert_eq!(
        harness
            .entries_with(&user_id, LedgerReason::RefundHold)
            .await
            .len(),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn commit_and_cancel_race_settles_once() {
    for _ in 0..20 {
        let harness = TestHarness::new();
        let user_id = harness.account(Plan::Basic, 20).await;
        let reservation = harness
            .holds
            .reserve(ReserveRequest::new(user_id, 7))
            .await
            .unwrap();

        let commit = {
            let holds = harness.holds.clone();
            let hold_id = reservation.hold_id.clone();
            tokio::spawn(async move { holds.commit(&hold_id).await })
        };
        let cancel = {
            let holds = harness.holds.clone();
            let hold_id = reservation.hold_id.clone();
            tokio::spawn(async move { holds.cancel(&hold_id).await })
        };
        let committed = commit.await.unwrap().unwrap();
        let canceled = cancel.await.unwrap().unwrap();

        // Both callers observe the same winner.
        assert_eq!(committed, canceled);
        let final_status = harness
            .holds
            .get_hold(&reservation.hold_id)
            .await
            .unwrap()
            .status;
        assert_eq!(final_status, committed);

        let refunds = harness
            .entries_with(&user_id, LedgerReason::RefundHold)
            .await
            .len();
        match final_status {
            HoldStatus::Committed => {
                assert_eq!(refunds, 0);
                assert_eq!(harness.balance(&user_id).await, 13);
            }
            HoldStatus::Canceled => {
                assert_eq!(refunds, 1);
                assert_eq!(harness.balance(&user_id).await, 20);
            }
            HoldStatus::Reserved => panic!("hold left reserved"),
        }
    }
}

#[tokio::test]
async fn replayed_reserve_debits_once() {
    let harness = TestHarness::new();
    let user_id = harness.account(Plan::Basic, 20).await;
    let hold_id: HoldId = "render-job-9".parse().unwrap();

    let first = harness
        .holds
        .reserve(ReserveRequest::new(user_id, 7).with_hold_id(hold_id.clone()))
        .await
        .unwrap();
    harness.holds.commit(&hold_id).await.unwrap();
    let replay = harness
        .holds
        .reserve(ReserveRequest::new(user_id, 7).with_hold_id(hold_id.clone()))
        .await
        .unwrap();

    assert!(replay.replayed);
    assert_eq!(replay.status, HoldStatus::Committed);
    assert_eq!(replay.expires_at, first.expires_at);
    assert_eq!(harness.balance(&user_id).await, 13);
}

#[tokio::test]
async fn hold_id_of_another_account_conflicts() {
    let harness = TestHarness::new();
    let alice = harness.account(Plan::Basic, 20).await;
    let bob = harness.account(Plan::Basic, 20).await;
    let hold_id: HoldId = "shared-op".parse().unwrap();

    harness
        .holds
        .reserve(ReserveRequest::new(alice, 5).with_hold_id(hold_id.clone()))
        .await
        .unwrap();
    let result = harness
        .holds
        .reserve(ReserveRequest::new(bob, 5).with_hold_id(hold_id))
        .await;
    assert!(matches!(result, Err(EngineError::IdempotencyConflict { .. })));
    assert_eq!(harness.balance(&bob).await, 20);
}

#[tokio::test]
async fn insufficient_reserve_has_no_side_effects() {
    let harness = TestHarness::new();
    let user_id = harness.account(Plan::Basic, 3).await;

    let result = harness
        .holds
        .reserve(ReserveRequest::new(user_id, 4))
        .await;
    assert!(matches!(
        result,
        Err(EngineError::InsufficientCredits {
            balance: 3,
            required: 4
        })
    ));
    assert_eq!(harness.balance(&user_id).await, 3);
    assert!(harness
        .holds
        .holds_for_user(&user_id, None, 10)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn reserve_on_missing_account() {
    let harness = TestHarness::new();
    let result = harness
        .holds
        .reserve(ReserveRequest::new(UserId::generate(), 4))
        .await;
    assert!(matches!(result, Err(EngineError::AccountNotFound { .. })));
}

#[test]
fn refund_prefix_is_reserved() {
    assert!("refund_hold_1".parse::<HoldId>().is_err());
}

#[tokio::test]
async fn grants_cannot_claim_a_refund_key() {
    let harness = TestHarness::new();
    let user_id = harness.account(Plan::Basic, 10).await;

    let result = harness
        .engine
        .apply_delta(
            &user_id,
            3,
            LedgerReason::CreditPack,
            Some("refund_op-1".parse::<IdempotencyKey>().unwrap()),
            None,
        )
        .await;
    assert!(matches!(
        result,
        Err(EngineError::InvalidId(IdError::ReservedPrefix))
    ));

    let hold_id: HoldId = "op-1".parse().unwrap();
    harness
        .holds
        .reserve(ReserveRequest::new(user_id, 4).with_hold_id(hold_id.clone()))
        .await
        .unwrap();
    let status = harness.holds.cancel(&hold_id).await.unwrap();

    assert_eq!(status, HoldStatus::Canceled);
    assert_eq!(
        harness.holds.get_hold(&hold_id).await.unwrap().status,
        HoldStatus::Canceled
    );
    assert_eq!(harness.balance(&user_id).await, 10);
}

#[tokio::test]
async fn holds_listed_newest_first() {
    let harness = TestHarness::new();
    let user_id = harness.account(Plan::Basic, 20).await;

    let first = harness
        .holds
        .reserve(ReserveRequest::new(user_id, 1))
        .await
        .unwrap();
    harness.clock.advance(chrono::Duration::seconds(1));
    let second = harness
        .holds
        .reserve(ReserveRequest::new(user_id, 1))
        .await
        .unwrap();
    harness.holds.commit(&first.hold_id).await.unwrap();

    let all = harness.holds.holds_for_user(&user_id, None, 10).await.unwrap();
    let ids: Vec<_> = all.iter().map(|h| h.id.clone()).collect();
    assert_eq!(ids, vec![second.hold_id.clone(), first.hold_id.clone()]);

    let open = harness
        .holds
        .holds_for_user(&user_id, Some(HoldStatus::Reserved), 10)
        .await
        .unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, second.hold_id);
}
