//! Concurrent debits against one account

mod common;

use campus_card_ledger::types::{DebitRequest, LedgerError};
use campus_card_ledger::LedgerEngine;
use common::{rupees, TestLedger, ADMIN};
use futures::future::join_all;
use rust_decimal::Decimal;

async fn spawn_debits(
    engine: &LedgerEngine,
    member_ref: &str,
    store_id: i64,
    amount: Decimal,
    count: usize,
) -> Vec<Result<(), LedgerError>> {
    let handles = (0..count).map(|_| {
        let engine = engine.clone();
        let request = DebitRequest {
            member_ref: member_ref.to_string(),
            card_number: None,
            store_id,
            amount,
        };
        tokio::spawn(async move { engine.debit(request).await.map(|_| ()) })
    });
    join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_debits_never_overdraw() {
    let ledger = TestLedger::new().await;
    ledger.issue("1001").await;
    let canteen = ledger.store("Main Canteen").await;
    ledger.recharge("1001", 100).await;

    // Ten debits of 1.5 x B/N against B = 100
    let results = spawn_debits(&ledger.engine, "1001", canteen.store_id, rupees(15), 10).await;

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 6);
    for failure in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(
            matches!(failure, LedgerError::InsufficientBalance { .. }),
            "unexpected failure {failure:?}"
        );
    }

    let view = ledger.engine.ledger().balance("1001").await.unwrap();
    assert_eq!(view.balance, rupees(10));
    assert!(view.is_consistent());

    let pool = ledger
        .engine
        .settlements()
        .store_settlement(canteen.store_id)
        .await
        .unwrap();
    assert_eq!(pool.pending_amount, rupees(90));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_debits_respect_daily_limit() {
    let ledger = TestLedger::new().await;
    ledger.issue("1001").await;
    let canteen = ledger.store("Main Canteen").await;
    ledger.recharge("1001", 1_000).await;
    ledger
        .engine
        .set_daily_limit("1001", Some(rupees(100)), ADMIN)
        .await
        .unwrap();

    let results = spawn_debits(&ledger.engine, "1001", canteen.store_id, rupees(30), 8).await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 3);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, LedgerError::DailyLimitExceeded { .. })));

    let status = ledger.engine.limits().daily_status("1001").await.unwrap();
    assert_eq!(status.daily_spent, rupees(90));
    assert_eq!(
        ledger.engine.ledger().balance("1001").await.unwrap().balance,
        rupees(910)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_members_and_stores() {
    let ledger = TestLedger::new().await;
    let canteen = ledger.store("Main Canteen").await;
    let bookshop = ledger.store("Book Shop").await;
    let members: Vec<String> = (1..=5).map(|n| format!("20{n}")).collect();
    for member in &members {
        ledger.issue(member).await;
        ledger.recharge(member, 50).await;
    }

    let handles = members.iter().enumerate().map(|(i, member)| {
        let engine = ledger.engine.clone();
        let member = member.clone();
        let store_id = if i % 2 == 0 { canteen.store_id } else { bookshop.store_id };
        tokio::spawn(async move {
            for _ in 0..4 {
                engine
                    .debit(DebitRequest {
                        member_ref: member.clone(),
                        card_number: None,
                        store_id,
                        amount: rupees(10),
                    })
                    .await
                    .unwrap();
            }
        })
    });
    for joined in join_all(handles).await {
        joined.unwrap();
    }

    assert!(ledger.engine.ledger().audit_balances().await.unwrap().is_empty());
    let canteen_pool = ledger
        .engine
        .settlements()
        .store_settlement(canteen.store_id)
        .await
        .unwrap();
    let bookshop_pool = ledger
        .engine
        .settlements()
        .store_settlement(bookshop.store_id)
        .await
        .unwrap();
    assert_eq!(canteen_pool.pending_amount, rupees(120));
    assert_eq!(bookshop_pool.pending_amount, rupees(80));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_issue_yields_single_active_card() {
    let ledger = TestLedger::new().await;

    let handles = (0..6).map(|_| {
        let engine = ledger.engine.clone();
        tokio::spawn(async move {
            engine
                .issue_card(campus_card_ledger::types::IssueCardRequest {
                    member_ref: "3003".to_string(),
                    name: "Racer".to_string(),
                    group_name: "6-A".to_string(),
                    ..Default::default()
                })
                .await
        })
    });
    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, LedgerError::DuplicateActiveCard { .. })));
    let cards = ledger.engine.cards().cards("3003").await.unwrap();
    assert_eq!(cards.len(), 1);
}
