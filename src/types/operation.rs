//! Operations accepted by the engine in replay mode
//!
//! One [`LedgerOperation`] corresponds to one inbound call on the engine
//! (card issue, recharge, debit, settlement action, ...). Replaying a log of
//! operations through [`crate::core::LedgerEngine::apply`] reproduces the
//! ledger state that the same calls would produce live.

use rust_decimal::Decimal;

use super::ledger::{DebitRequest, RechargeRequest};
use super::member::{CardNumber, IssueCardRequest};
use super::settlement::{RegisterStoreRequest, SettlementId, StoreId};

#[derive(Debug, Clone, PartialEq)]
pub enum LedgerOperation {
    IssueCard(IssueCardRequest),
    /// Activate the member's card with this number
    ActivateCard {
        member_ref: String,
        card_number: CardNumber,
    },
    /// Deactivate a specific card, or the member's active card
    DeactivateCard {
        member_ref: String,
        card_number: Option<CardNumber>,
    },
    Recharge(RechargeRequest),
    SetDailyLimit {
        member_ref: String,
        limit: Option<Decimal>,
        actor: String,
    },
    RegisterStore(RegisterStoreRequest),
    Debit(DebitRequest),
    RequestSettlement {
        store_id: StoreId,
        amount: Decimal,
        actor: String,
    },
    AmendSettlement {
        settlement_id: SettlementId,
        amount: Decimal,
        actor: String,
    },
    RecordPayment {
        settlement_id: SettlementId,
        amount: Decimal,
        actor: String,
    },
    DailyReset,
    RetentionPurge,
}

impl LedgerOperation {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            LedgerOperation::IssueCard(_) => "issue",
            LedgerOperation::ActivateCard { .. } => "activate",
            LedgerOperation::DeactivateCard { .. } => "deactivate",
            LedgerOperation::Recharge(_) => "recharge",
            LedgerOperation::SetDailyLimit { .. } => "limit",
            LedgerOperation::RegisterStore(_) => "store",
            LedgerOperation::Debit(_) => "debit",
            LedgerOperation::RequestSettlement { .. } => "settle",
            LedgerOperation::AmendSettlement { .. } => "amend",
            LedgerOperation::RecordPayment { .. } => "pay",
            LedgerOperation::DailyReset => "sweep",
            LedgerOperation::RetentionPurge => "purge",
        }
    }
}
