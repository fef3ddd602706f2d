//! Types module
//!
//! Contains core data structures used throughout the application.
//! This module organizes types into logical submodules:
//! - `member`: members, cards and accounts
//! - `ledger`: recharges, debits and their requests
//! - `settlement`: stores, settlements and their audit log
//! - `money`: decimal to minor-unit conversion
//! - `operation`: replayable engine operations
//! - `event`: events emitted after commit
//! - `error`: error types for the ledger

pub mod error;
pub mod event;
pub mod ledger;
pub mod member;
pub mod money;
pub mod operation;
pub mod settlement;

pub use error::{ErrorKind, LedgerError, LedgerResult};
pub use event::LedgerEvent;
pub use ledger::{
    DailyStats, DailyTotal, DebitOutcome, DebitRequest, Recharge, RechargeRequest, RechargeType,
    StoreSales, Transaction, TransactionStatus,
};
pub use member::{
    Account, AccountSummary, BalanceView, Card, CardId, CardNumber, DailyStatus,
    IssueCardRequest, Member, MemberId,
};
pub use money::{from_minor, to_minor, Minor};
pub use operation::LedgerOperation;
pub use settlement::{
    RegisterStoreRequest, Settlement, SettlementAction, SettlementId, SettlementLog,
    SettlementStatus, Store, StoreId, StoreSettlement, StoreSummary,
};
