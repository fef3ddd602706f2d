//! Shared setup for the integration tests
//!
//! Every test gets a fresh SQLite file in its own temporary directory and a
//! manual clock starting at noon, Kolkata time.

#![allow(dead_code)]

use campus_card_ledger::types::{
    Card, DebitOutcome, DebitRequest, IssueCardRequest, LedgerResult, RechargeRequest,
    RechargeType, RegisterStoreRequest, Store, StoreId,
};
use campus_card_ledger::{LedgerConfig, LedgerEngine, ManualClock};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

pub const ADMIN: &str = "admin";

/// 2026-03-10 12:00 in Asia/Kolkata
pub fn noon() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-10T06:30:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

pub struct TestLedger {
    pub engine: LedgerEngine,
    pub clock: ManualClock,
    pub db_path: PathBuf,
    _dir: TempDir,
}

impl TestLedger {
    pub async fn new() -> Self {
        Self::with_config(LedgerConfig::default()).await
    }

    pub async fn with_config(config: LedgerConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(noon());
        let db_path = dir.path().join("ledger.db");
        let engine = LedgerEngine::open_with_clock(
            &db_path,
            config,
            Arc::new(clock.clone()),
        )
        .await
        .unwrap();
        Self {
            engine,
            clock,
            db_path,
            _dir: dir,
        }
    }

    /// Move the clock forward by whole days
    pub fn next_day(&self) {
        self.clock.advance(Duration::days(1));
    }

    pub async fn issue(&self, member_ref: &str) -> Card {
        self.engine
            .issue_card(IssueCardRequest {
                member_ref: member_ref.to_string(),
                name: format!("Member {member_ref}"),
                group_name: "7-B".to_string(),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    pub async fn store(&self, name: &str) -> Store {
        let slug = name.to_lowercase().replace(' ', "");
        let checksum: u64 = name.bytes().map(u64::from).sum();
        let mobile = format!("9{:09}", checksum * 1_000 + name.len() as u64);
        self.engine
            .register_store(RegisterStoreRequest {
                store_name: name.to_string(),
                store_type: "canteen".to_string(),
                owner_name: "Owner".to_string(),
                mobile_number: mobile,
                email: format!("{slug}@campus.test"),
            })
            .await
            .unwrap()
    }

    pub async fn recharge(&self, member_ref: &str, amount: i64) -> Decimal {
        self.engine
            .recharge(RechargeRequest {
                member_ref: member_ref.to_string(),
                amount: Decimal::from(amount),
                recharge_type: RechargeType::Cash,
                notes: None,
                actor: ADMIN.to_string(),
            })
            .await
            .unwrap()
    }

    pub async fn debit(
        &self,
        member_ref: &str,
        store_id: StoreId,
        amount: Decimal,
    ) -> LedgerResult<DebitOutcome> {
        self.engine
            .debit(DebitRequest {
                member_ref: member_ref.to_string(),
                card_number: None,
                store_id,
                amount,
            })
            .await
    }
}

pub fn rupees(amount: i64) -> Decimal {
    Decimal::from(amount)
}

/// Second pool on the same file, for tampering with rows behind the engine's back
pub async fn raw_pool(ledger: &TestLedger) -> sqlx::SqlitePool {
    sqlx::SqlitePool::connect(&format!("sqlite://{}", ledger.db_path.display()))
        .await
        .unwrap()
}
