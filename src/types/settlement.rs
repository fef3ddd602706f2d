//! Merchant and settlement types
//!
//! A store accrues pending earnings from completed debits. The merchant turns
//! part of those earnings into a settlement request, which the issuing
//! authority pays in one or more instalments.
//!
//! ```text
//! requested ──payment (partial)──▶ pending ──payment (rest)──▶ completed
//!     │                                                           ▲
//!     └────────────────────payment (full)─────────────────────────┘
//! ```
//!
//! Only `requested` admits amendment of the requested amount.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::{LedgerError, LedgerResult};

/// Internal store identifier
pub type StoreId = i64;

/// Internal settlement identifier
pub type SettlementId = i64;

/// Merchant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Store {
    pub store_id: StoreId,
    pub store_name: String,
    pub store_type: String,
    pub owner_name: String,
    pub mobile_number: String,
    pub email: String,
}

/// Merchant registration fields
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RegisterStoreRequest {
    pub store_name: String,
    pub store_type: String,
    pub owner_name: String,
    pub mobile_number: String,
    pub email: String,
}

impl RegisterStoreRequest {
    pub fn validate(&self) -> LedgerResult<()> {
        for (field, value) in [
            ("store_name", &self.store_name),
            ("store_type", &self.store_type),
            ("owner_name", &self.owner_name),
            ("mobile_number", &self.mobile_number),
            ("email", &self.email),
        ] {
            if value.trim().is_empty() {
                return Err(LedgerError::validation(field, "must not be empty"));
            }
        }
        if !self.email.contains('@') {
            return Err(LedgerError::validation(
                "email",
                format!("'{}' is not an email address", self.email),
            ));
        }
        Ok(())
    }
}

/// A merchant's unearmarked earnings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreSettlement {
    pub store_id: StoreId,
    pub pending_amount: Decimal,
}

/// Settlement lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Requested,
    Pending,
    Completed,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Requested => "requested",
            SettlementStatus::Pending => "pending",
            SettlementStatus::Completed => "completed",
        }
    }

    /// Only a fresh request may have its amount changed
    pub fn is_amendable(&self) -> bool {
        matches!(self, SettlementStatus::Requested)
    }

    /// State after a payment brings the settled amount to `settled` of `total`
    pub fn after_payment<T: PartialOrd>(settled: T, total: T) -> Self {
        if settled >= total {
            SettlementStatus::Completed
        } else {
            SettlementStatus::Pending
        }
    }
}

impl fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettlementStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "requested" => Ok(SettlementStatus::Requested),
            "pending" => Ok(SettlementStatus::Pending),
            "completed" => Ok(SettlementStatus::Completed),
            other => Err(LedgerError::database(format!(
                "unknown settlement status '{other}'"
            ))),
        }
    }
}

/// One settlement request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settlement {
    pub settlement_id: SettlementId,
    pub store_id: StoreId,
    /// Requested (and approved) amount
    pub total_transaction_amount: Decimal,
    /// Paid so far
    pub settled_amount: Decimal,
    /// Still owed on this request: total minus settled
    pub pending_amount: Decimal,
    pub status: SettlementStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Audited settlement action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementAction {
    Create,
    Amend,
    Payment,
}

impl SettlementAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementAction::Create => "create",
            SettlementAction::Amend => "amend",
            SettlementAction::Payment => "payment",
        }
    }
}

impl FromStr for SettlementAction {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(SettlementAction::Create),
            "amend" => Ok(SettlementAction::Amend),
            "payment" => Ok(SettlementAction::Payment),
            other => Err(LedgerError::database(format!(
                "unknown settlement action '{other}'"
            ))),
        }
    }
}

/// Immutable audit entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettlementLog {
    pub log_id: i64,
    pub settlement_id: SettlementId,
    pub action: SettlementAction,
    pub amount: Decimal,
    pub notes: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// A merchant's position: unearmarked earnings plus what is owed on open requests
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreSummary {
    pub store_id: StoreId,
    pub pending_amount: Decimal,
    pub open_settlements: i64,
    pub owed_on_settlements: Decimal,
    pub total_earned: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::partial(300, 700, SettlementStatus::Pending)]
    #[case::exact(700, 700, SettlementStatus::Completed)]
    #[case::over(701, 700, SettlementStatus::Completed)]
    fn test_status_after_payment(
        #[case] settled: i64,
        #[case] total: i64,
        #[case] expected: SettlementStatus,
    ) {
        assert_eq!(SettlementStatus::after_payment(settled, total), expected);
    }

    #[rstest]
    #[case(SettlementStatus::Requested, true)]
    #[case(SettlementStatus::Pending, false)]
    #[case(SettlementStatus::Completed, false)]
    fn test_is_amendable(#[case] status: SettlementStatus, #[case] expected: bool) {
        assert_eq!(status.is_amendable(), expected);
    }

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            SettlementStatus::Requested,
            SettlementStatus::Pending,
            SettlementStatus::Completed,
        ] {
            assert_eq!(status.as_str().parse::<SettlementStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_register_store_requires_email() {
        let request = RegisterStoreRequest {
            store_name: "Canteen".to_string(),
            store_type: "food".to_string(),
            owner_name: "R. Shah".to_string(),
            mobile_number: "9800000000".to_string(),
            email: "canteen.example.com".to_string(),
        };
        assert!(matches!(
            request.validate(),
            Err(LedgerError::Validation { field, .. }) if field == "email"
        ));
    }
}
