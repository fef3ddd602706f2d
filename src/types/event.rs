//! Domain events
//!
//! Events are emitted after a ledger transaction commits. They carry enough
//! data for a merchant dashboard to refresh without querying again. Delivery
//! is best-effort and never part of the transactional outcome.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

use super::settlement::{Settlement, StoreId};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    TransactionCompleted {
        transaction_id: i64,
        store_id: StoreId,
        member_ref: String,
        amount: Decimal,
        new_balance: Decimal,
        new_daily_spent: Decimal,
    },
    RechargeCompleted {
        member_ref: String,
        amount: Decimal,
        new_balance: Decimal,
    },
    SettlementCreated {
        settlement: Settlement,
        store_pending_amount: Decimal,
    },
    SettlementUpdated {
        settlement: Settlement,
        store_pending_amount: Option<Decimal>,
    },
    SettlementCompleted {
        settlement: Settlement,
    },
    DailyLimitsReset {
        date: NaiveDate,
        accounts: u64,
    },
}

impl LedgerEvent {
    /// Store whose dashboard should receive this event, if any
    pub fn store_id(&self) -> Option<StoreId> {
        match self {
            LedgerEvent::TransactionCompleted { store_id, .. } => Some(*store_id),
            LedgerEvent::SettlementCreated { settlement, .. }
            | LedgerEvent::SettlementUpdated { settlement, .. }
            | LedgerEvent::SettlementCompleted { settlement } => Some(settlement.store_id),
            LedgerEvent::RechargeCompleted { .. } | LedgerEvent::DailyLimitsReset { .. } => None,
        }
    }
}
