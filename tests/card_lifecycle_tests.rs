//! Card issue, activation and scan resolution against a real database

mod common;

use campus_card_ledger::types::{IssueCardRequest, LedgerError};
use campus_card_ledger::LedgerConfig;
use common::{rupees, TestLedger};
use std::collections::HashSet;

#[tokio::test(flavor = "multi_thread")]
async fn test_issue_creates_active_card_and_empty_account() {
    let ledger = TestLedger::new().await;

    let card = ledger.issue("1001").await;

    assert!(card.is_active);
    assert!((10_000..100_000).contains(&card.card_number));
    assert_eq!(card.scan_payload(), format!("1001{}", card.card_number));

    let balance = ledger.engine.ledger().balance("1001").await.unwrap();
    assert_eq!(balance.balance, rupees(0));
    assert!(balance.is_consistent());

    let member = ledger.engine.cards().member("1001").await.unwrap();
    assert_eq!(member.name, "Member 1001");
    assert_eq!(member.daily_limit, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_second_active_card_is_rejected() {
    let ledger = TestLedger::new().await;
    let first = ledger.issue("1001").await;

    let result = ledger
        .engine
        .issue_card(IssueCardRequest {
            member_ref: "1001".to_string(),
            name: "Renamed".to_string(),
            group_name: "8-A".to_string(),
            ..Default::default()
        })
        .await;

    assert_eq!(
        result,
        Err(LedgerError::DuplicateActiveCard {
            member_ref: "1001".to_string()
        })
    );
    // The rejected issue leaves neither a card nor the new identity behind
    let cards = ledger.engine.cards().cards("1001").await.unwrap();
    assert_eq!(cards, vec![first]);
    let member = ledger.engine.cards().member("1001").await.unwrap();
    assert_eq!(member.name, "Member 1001");
    assert_eq!(member.group_name, "7-B");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reissue_after_deactivation_keeps_balance() {
    let ledger = TestLedger::new().await;
    let first = ledger.issue("1001").await;
    ledger.recharge("1001", 250).await;

    let deactivated = ledger.engine.toggle_active(first.card_id, false).await.unwrap();
    assert!(!deactivated.is_active);
    assert_eq!(ledger.engine.cards().active_card("1001").await.unwrap(), None);

    let second = ledger.issue("1001").await;
    assert_ne!(second.card_number, first.card_number);

    let cards = ledger.engine.cards().cards("1001").await.unwrap();
    assert_eq!(cards.len(), 2);
    assert_eq!(cards[0].card_id, second.card_id, "active card listed first");
    assert_eq!(
        ledger.engine.ledger().balance("1001").await.unwrap().balance,
        rupees(250)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_activating_sibling_conflicts() {
    let ledger = TestLedger::new().await;
    let first = ledger.issue("1001").await;
    ledger.engine.toggle_active(first.card_id, false).await.unwrap();
    let second = ledger.issue("1001").await;

    let result = ledger.engine.toggle_active(first.card_id, true).await;

    assert_eq!(
        result,
        Err(LedgerError::ConflictingActiveCard {
            card_id: first.card_id,
            active_card_id: second.card_id,
        })
    );

    // Swapping works once the current card is deactivated
    ledger.engine.toggle_active(second.card_id, false).await.unwrap();
    let reactivated = ledger.engine.toggle_active(first.card_id, true).await.unwrap();
    assert!(reactivated.is_active);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_toggle_is_idempotent_for_active_card() {
    let ledger = TestLedger::new().await;
    let card = ledger.issue("1001").await;

    let again = ledger.engine.toggle_active(card.card_id, true).await.unwrap();

    assert_eq!(again, card);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_toggle_unknown_card() {
    let ledger = TestLedger::new().await;

    let result = ledger.engine.toggle_active(42, false).await;

    assert_eq!(result, Err(LedgerError::CardIdNotFound { card_id: 42 }));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_resolve_rejects_stale_card() {
    let ledger = TestLedger::new().await;
    let old = ledger.issue("1001").await;
    ledger.engine.toggle_active(old.card_id, false).await.unwrap();
    let current = ledger.issue("1001").await;

    let resolved = ledger
        .engine
        .resolve_active_card("1001", current.card_number)
        .await
        .unwrap();
    assert_eq!(resolved.card_id, current.card_id);

    let stale = ledger.engine.resolve_active_card("1001", old.card_number).await;
    assert!(matches!(stale, Err(LedgerError::CardNotFound { .. })));

    let foreign = ledger.engine.resolve_active_card("2002", current.card_number).await;
    assert!(matches!(foreign, Err(LedgerError::CardNotFound { .. })));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_card_space_exhaustion() {
    let config = LedgerConfig {
        card_digits: 1,
        card_retry_cap: 500,
        ..Default::default()
    };
    let ledger = TestLedger::with_config(config).await;

    let mut numbers = HashSet::new();
    for member in 1..=9 {
        let card = ledger.issue(&member.to_string()).await;
        assert!((1..=9).contains(&card.card_number));
        numbers.insert(card.card_number);
    }
    assert_eq!(numbers.len(), 9, "card numbers are unique");

    let result = ledger
        .engine
        .issue_card(IssueCardRequest {
            member_ref: "10".to_string(),
            name: "Late".to_string(),
            group_name: "9-C".to_string(),
            ..Default::default()
        })
        .await;

    assert_eq!(result, Err(LedgerError::CardSpaceExhausted { attempts: 500 }));
    assert!(matches!(
        ledger.engine.cards().member("10").await,
        Err(LedgerError::MemberNotFound { .. })
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_issue_validates_request() {
    let ledger = TestLedger::new().await;

    let result = ledger
        .engine
        .issue_card(IssueCardRequest {
            member_ref: "GR-7".to_string(),
            name: "Asha".to_string(),
            group_name: "7-B".to_string(),
            ..Default::default()
        })
        .await;

    assert!(matches!(result, Err(LedgerError::Validation { field, .. }) if field == "member_ref"));
}
