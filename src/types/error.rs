//! Error types for the campus card ledger
//!
//! This module defines every failure a ledger operation can surface. Each
//! variant carries enough context for a caller (merchant terminal, admin
//! console) to explain the rejection without querying again.
//!
//! # Error Categories
//!
//! Variants are grouped by [`ErrorKind`]:
//!
//! - **NotFound**: member, card, store or settlement absent
//! - **Conflict**: duplicate active card, card-number space exhausted, duplicate store
//! - **InvalidState**: settlement amendment outside `requested`, payment on `completed`
//! - **LimitExceeded**: insufficient balance, daily limit, settlement amount over pending
//! - **Validation**: non-positive amounts, malformed identifiers
//! - **Internal**: store failures, timeouts, ledger divergence

use rust_decimal::Decimal;
use thiserror::Error;

/// Result alias used throughout the crate
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Coarse error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidState,
    LimitExceeded,
    Validation,
    Internal,
}

/// Main error type for the ledger
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    /// No member with this external reference
    #[error("Member {member_ref} not found")]
    MemberNotFound { member_ref: String },

    /// No active card matches the presented identity
    #[error("No active card {card} for member {member_ref}")]
    CardNotFound {
        member_ref: String,
        /// Card number or card id as presented
        card: String,
    },

    #[error("Card {card_id} not found")]
    CardIdNotFound { card_id: i64 },

    #[error("Store {store_id} not found")]
    StoreNotFound { store_id: i64 },

    #[error("Settlement {settlement_id} not found")]
    SettlementNotFound { settlement_id: i64 },

    /// Issuing a card for a member who already holds an active one
    #[error("An active card already exists for member {member_ref}; deactivate it first")]
    DuplicateActiveCard { member_ref: String },

    /// Activating a card while a sibling card is active
    #[error("Card {card_id} cannot be activated: card {active_card_id} is already active for the same member")]
    ConflictingActiveCard { card_id: i64, active_card_id: i64 },

    /// Random card-number generation collided on every attempt
    #[error("Card number space exhausted after {attempts} attempts")]
    CardSpaceExhausted { attempts: u32 },

    /// Store name, email or mobile number already registered
    #[error("Store {field} '{value}' is already registered")]
    DuplicateStore { field: String, value: String },

    #[error("Insufficient balance for member {member_ref}: balance {balance}, requested {requested}")]
    InsufficientBalance {
        member_ref: String,
        balance: Decimal,
        requested: Decimal,
    },

    #[error("Daily limit exceeded for member {member_ref}: limit {limit}, spent {spent}, remaining {remaining}, requested {requested}")]
    DailyLimitExceeded {
        member_ref: String,
        limit: Decimal,
        spent: Decimal,
        remaining: Decimal,
        requested: Decimal,
    },

    /// Settlement request or amendment above the merchant's unearmarked earnings
    #[error("Settlement amount {requested} for store {store_id} exceeds the maximum allowed {max_allowed}")]
    ExceedsPending {
        store_id: i64,
        requested: Decimal,
        max_allowed: Decimal,
    },

    #[error("Payment {requested} on settlement {settlement_id} exceeds the remaining {remaining}")]
    ExceedsRemaining {
        settlement_id: i64,
        requested: Decimal,
        remaining: Decimal,
    },

    #[error("Settlement {settlement_id} is already completed")]
    AlreadyCompleted { settlement_id: i64 },

    #[error("Settlement {settlement_id} cannot be {operation} while {status}")]
    InvalidState {
        settlement_id: i64,
        status: String,
        operation: String,
    },

    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    /// Cached balances no longer match the ledger; maintenance refuses to proceed
    #[error("{accounts} account(s) diverge from the ledger")]
    LedgerDivergence { accounts: u64 },

    #[error("{operation} did not complete within {after_ms} ms and was rolled back")]
    Timeout { operation: String, after_ms: u64 },

    #[error("Database error: {message}")]
    Database { message: String },
}

impl LedgerError {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::MemberNotFound { .. }
            | LedgerError::CardNotFound { .. }
            | LedgerError::CardIdNotFound { .. }
            | LedgerError::StoreNotFound { .. }
            | LedgerError::SettlementNotFound { .. } => ErrorKind::NotFound,
            LedgerError::DuplicateActiveCard { .. }
            | LedgerError::ConflictingActiveCard { .. }
            | LedgerError::CardSpaceExhausted { .. }
            | LedgerError::DuplicateStore { .. } => ErrorKind::Conflict,
            LedgerError::AlreadyCompleted { .. } | LedgerError::InvalidState { .. } => {
                ErrorKind::InvalidState
            }
            LedgerError::InsufficientBalance { .. }
            | LedgerError::DailyLimitExceeded { .. }
            | LedgerError::ExceedsPending { .. }
            | LedgerError::ExceedsRemaining { .. } => ErrorKind::LimitExceeded,
            LedgerError::Validation { .. } => ErrorKind::Validation,
            LedgerError::LedgerDivergence { .. }
            | LedgerError::Timeout { .. }
            | LedgerError::Database { .. } => ErrorKind::Internal,
        }
    }

    pub fn member_not_found(member_ref: &str) -> Self {
        LedgerError::MemberNotFound {
            member_ref: member_ref.to_string(),
        }
    }

    pub fn card_not_found(member_ref: &str, card: impl ToString) -> Self {
        LedgerError::CardNotFound {
            member_ref: member_ref.to_string(),
            card: card.to_string(),
        }
    }

    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        LedgerError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn invalid_state(settlement_id: i64, status: impl ToString, operation: &str) -> Self {
        LedgerError::InvalidState {
            settlement_id,
            status: status.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn database(message: impl Into<String>) -> Self {
        LedgerError::Database {
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(error: sqlx::Error) -> Self {
        LedgerError::database(error.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for LedgerError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        LedgerError::database(format!("migration failed: {error}"))
    }
}
