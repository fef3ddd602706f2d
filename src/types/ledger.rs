//! Ledger record types
//!
//! Recharges credit a member, completed transactions debit them. Both are
//! append-only: rows are never updated, and only the retention purge deletes
//! them.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::{LedgerError, LedgerResult};
use super::member::{validate_member_ref, CardNumber};
use super::money::{to_minor, Minor};
use super::settlement::StoreId;

/// How a recharge was paid for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RechargeType {
    Cash,
    Online,
    Cheque,
    Adjustment,
}

impl RechargeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RechargeType::Cash => "cash",
            RechargeType::Online => "online",
            RechargeType::Cheque => "cheque",
            RechargeType::Adjustment => "adjustment",
        }
    }
}

impl fmt::Display for RechargeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RechargeType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cash" => Ok(RechargeType::Cash),
            "online" => Ok(RechargeType::Online),
            "cheque" => Ok(RechargeType::Cheque),
            "adjustment" => Ok(RechargeType::Adjustment),
            other => Err(LedgerError::validation(
                "recharge_type",
                format!("unknown recharge type '{other}'"),
            )),
        }
    }
}

/// Debit status. Only `Completed` counts towards the balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Completed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Completed => "completed",
        }
    }
}

/// Immutable credit to a member
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recharge {
    pub recharge_id: i64,
    pub member_ref: String,
    pub amount: Decimal,
    pub recharge_type: RechargeType,
    pub notes: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Immutable debit of a member at a store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub transaction_id: i64,
    pub member_ref: String,
    pub card_number: Option<CardNumber>,
    pub store_id: StoreId,
    pub amount: Decimal,
    pub status: TransactionStatus,
    /// Calendar day the debit counted against
    pub spent_on: NaiveDate,
    pub created_at: DateTime<Utc>,
}

/// Recharge request as received from the issuing authority
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RechargeRequest {
    pub member_ref: String,
    pub amount: Decimal,
    pub recharge_type: RechargeType,
    pub notes: Option<String>,
    /// Administrator performing the recharge
    pub actor: String,
}

impl RechargeRequest {
    /// Validate and return the amount in minor units
    pub fn validate(&self) -> LedgerResult<Minor> {
        validate_member_ref(&self.member_ref)?;
        validate_actor(&self.actor)?;
        to_minor("amount", self.amount)
    }
}

/// Debit request as received from a merchant terminal
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DebitRequest {
    pub member_ref: String,
    /// Card number read from the scanned card, if any
    pub card_number: Option<CardNumber>,
    pub store_id: StoreId,
    pub amount: Decimal,
}

impl DebitRequest {
    /// Validate and return the amount in minor units
    pub fn validate(&self) -> LedgerResult<Minor> {
        validate_member_ref(&self.member_ref)?;
        if self.store_id <= 0 {
            return Err(LedgerError::validation(
                "store_id",
                format!("{} is not a valid store id", self.store_id),
            ));
        }
        to_minor("amount", self.amount)
    }
}

/// Result of a committed debit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebitOutcome {
    pub transaction_id: i64,
    pub new_balance: Decimal,
    pub new_daily_spent: Decimal,
}

/// Aggregate of one calendar day's debits
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub total_members: i64,
    pub total_transactions: i64,
    pub total_amount: Decimal,
}

/// Debits of one calendar day, part of a day-by-day series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyTotal {
    pub date: NaiveDate,
    pub transaction_count: i64,
    pub total_amount: Decimal,
}

/// A store's debits since a given day
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreSales {
    pub store_id: StoreId,
    pub store_name: String,
    pub transaction_count: i64,
    pub total_sales: Decimal,
}

pub(crate) fn validate_actor(actor: &str) -> LedgerResult<()> {
    if actor.trim().is_empty() {
        return Err(LedgerError::validation("actor", "must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("cash", RechargeType::Cash)]
    #[case("ONLINE", RechargeType::Online)]
    #[case("Cheque", RechargeType::Cheque)]
    fn test_recharge_type_parsing(#[case] input: &str, #[case] expected: RechargeType) {
        assert_eq!(input.parse::<RechargeType>().unwrap(), expected);
    }

    #[test]
    fn test_recharge_type_rejects_unknown() {
        assert!("barter".parse::<RechargeType>().is_err());
    }

    #[test]
    fn test_debit_request_validation() {
        let mut request = DebitRequest {
            member_ref: "1001".to_string(),
            card_number: None,
            store_id: 1,
            amount: Decimal::from(20),
        };
        assert_eq!(request.validate().unwrap(), 2_000);

        request.amount = Decimal::ZERO;
        assert!(request.validate().is_err());

        request.amount = Decimal::ONE;
        request.store_id = 0;
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_recharge_request_requires_actor() {
        let request = RechargeRequest {
            member_ref: "1001".to_string(),
            amount: Decimal::from(100),
            recharge_type: RechargeType::Cash,
            notes: None,
            actor: String::new(),
        };
        assert!(matches!(
            request.validate(),
            Err(LedgerError::Validation { .. })
        ));
    }
}
