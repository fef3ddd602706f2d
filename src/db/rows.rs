//! Row types as stored, and their conversion into domain types
//!
//! Rows hold amounts as minor units and timestamps as Unix milliseconds;
//! nothing outside this crate sees them.

use chrono::NaiveDate;
use sqlx::FromRow;

use super::from_millis;
use crate::types::{
    from_minor, Account, Card, LedgerError, LedgerResult, Member, Recharge, RechargeType,
    Settlement, SettlementLog, Store, Transaction, TransactionStatus,
};

#[derive(Debug, Clone, FromRow)]
pub(crate) struct MemberRow {
    pub member_id: i64,
    pub member_ref: String,
    pub name: String,
    pub group_name: String,
    pub guardian: Option<String>,
    pub daily_limit: Option<i64>,
}

impl From<MemberRow> for Member {
    fn from(row: MemberRow) -> Self {
        Member {
            member_id: row.member_id,
            member_ref: row.member_ref,
            name: row.name,
            group_name: row.group_name,
            guardian: row.guardian,
            daily_limit: row.daily_limit.map(from_minor),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct CardRow {
    pub card_id: i64,
    pub member_id: i64,
    pub member_ref: String,
    pub card_number: i64,
    pub photo_ref: Option<String>,
    pub is_active: bool,
}

impl TryFrom<CardRow> for Card {
    type Error = LedgerError;

    fn try_from(row: CardRow) -> LedgerResult<Self> {
        let card_number = u32::try_from(row.card_number).map_err(|_| {
            LedgerError::database(format!("card {} has invalid number {}", row.card_id, row.card_number))
        })?;
        Ok(Card {
            card_id: row.card_id,
            member_id: row.member_id,
            member_ref: row.member_ref,
            card_number,
            photo_ref: row.photo_ref,
            is_active: row.is_active,
        })
    }
}

/// Columns selected by every card query
pub(crate) const CARD_COLUMNS: &str = "c.card_id, c.member_id, m.member_ref, c.card_number, c.photo_ref, c.is_active";

#[derive(Debug, Clone, FromRow)]
pub(crate) struct AccountRow {
    pub member_id: i64,
    pub balance: i64,
    pub opening_balance: i64,
    pub daily_spent: i64,
    pub last_spent_reset: NaiveDate,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Account {
            member_id: row.member_id,
            balance: from_minor(row.balance),
            opening_balance: from_minor(row.opening_balance),
            daily_spent: from_minor(row.daily_spent),
            last_spent_reset: row.last_spent_reset,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct RechargeRow {
    pub recharge_id: i64,
    pub member_ref: String,
    pub amount: i64,
    pub recharge_type: String,
    pub notes: Option<String>,
    pub created_by: String,
    pub created_at: i64,
}

impl TryFrom<RechargeRow> for Recharge {
    type Error = LedgerError;

    fn try_from(row: RechargeRow) -> LedgerResult<Self> {
        let recharge_type: RechargeType = row.recharge_type.parse()?;
        Ok(Recharge {
            recharge_id: row.recharge_id,
            member_ref: row.member_ref,
            amount: from_minor(row.amount),
            recharge_type,
            notes: row.notes,
            created_by: row.created_by,
            created_at: from_millis(row.created_at),
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct TransactionRow {
    pub transaction_id: i64,
    pub member_ref: String,
    pub card_number: Option<i64>,
    pub store_id: i64,
    pub amount: i64,
    pub spent_on: NaiveDate,
    pub created_at: i64,
}

impl From<TransactionRow> for Transaction {
    fn from(row: TransactionRow) -> Self {
        Transaction {
            transaction_id: row.transaction_id,
            member_ref: row.member_ref,
            card_number: row.card_number.and_then(|n| u32::try_from(n).ok()),
            store_id: row.store_id,
            amount: from_minor(row.amount),
            status: TransactionStatus::Completed,
            spent_on: row.spent_on,
            created_at: from_millis(row.created_at),
        }
    }
}

/// Columns selected by every transaction query
pub(crate) const TRANSACTION_COLUMNS: &str = "t.transaction_id, m.member_ref, c.card_number, t.store_id, t.amount, t.spent_on, t.created_at";

#[derive(Debug, Clone, FromRow)]
pub(crate) struct StoreRow {
    pub store_id: i64,
    pub store_name: String,
    pub store_type: String,
    pub owner_name: String,
    pub mobile_number: String,
    pub email: String,
}

impl From<StoreRow> for Store {
    fn from(row: StoreRow) -> Self {
        Store {
            store_id: row.store_id,
            store_name: row.store_name,
            store_type: row.store_type,
            owner_name: row.owner_name,
            mobile_number: row.mobile_number,
            email: row.email,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct SettlementRow {
    pub settlement_id: i64,
    pub store_id: i64,
    pub total_transaction_amount: i64,
    pub settled_amount: i64,
    pub pending_amount: i64,
    pub status: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TryFrom<SettlementRow> for Settlement {
    type Error = LedgerError;

    fn try_from(row: SettlementRow) -> LedgerResult<Self> {
        Ok(Settlement {
            settlement_id: row.settlement_id,
            store_id: row.store_id,
            total_transaction_amount: from_minor(row.total_transaction_amount),
            settled_amount: from_minor(row.settled_amount),
            pending_amount: from_minor(row.pending_amount),
            status: row.status.parse()?,
            created_at: from_millis(row.created_at),
            updated_at: from_millis(row.updated_at),
        })
    }
}

pub(crate) const SETTLEMENT_COLUMNS: &str = "settlement_id, store_id, total_transaction_amount, settled_amount, pending_amount, status, created_at, updated_at";

#[derive(Debug, Clone, FromRow)]
pub(crate) struct SettlementLogRow {
    pub log_id: i64,
    pub settlement_id: i64,
    pub action: String,
    pub amount: i64,
    pub notes: Option<String>,
    pub created_by: String,
    pub created_at: i64,
}

impl TryFrom<SettlementLogRow> for SettlementLog {
    type Error = LedgerError;

    fn try_from(row: SettlementLogRow) -> LedgerResult<Self> {
        Ok(SettlementLog {
            log_id: row.log_id,
            settlement_id: row.settlement_id,
            action: row.action.parse()?,
            amount: from_minor(row.amount),
            notes: row.notes,
            created_by: row.created_by,
            created_at: from_millis(row.created_at),
        })
    }
}
