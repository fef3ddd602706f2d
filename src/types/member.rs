//! Member, card and account types
//!
//! A member is identified externally by a stable reference number (the GR
//! number printed on every card issued to them). Cards come and go; the
//! account, and with it the balance, belongs to the member.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::{LedgerError, LedgerResult};

/// Internal member identifier
pub type MemberId = i64;

/// Internal card identifier
pub type CardId = i64;

/// Printed card number
pub type CardNumber = u32;

/// Card-holding member
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Member {
    pub member_id: MemberId,
    /// External reference number (GR number)
    pub member_ref: String,
    pub name: String,
    /// Class or group the member belongs to
    pub group_name: String,
    pub guardian: Option<String>,
    /// Explicit per-member daily limit; `None` falls back to the configured default
    pub daily_limit: Option<Decimal>,
}

/// One physical card issued to a member
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Card {
    pub card_id: CardId,
    pub member_id: MemberId,
    pub member_ref: String,
    pub card_number: CardNumber,
    pub photo_ref: Option<String>,
    pub is_active: bool,
}

impl Card {
    /// Payload encoded into the card's QR code: reference followed by card number
    pub fn scan_payload(&self) -> String {
        format!("{}{}", self.member_ref, self.card_number)
    }
}

/// Spendable state of a member
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Account {
    pub member_id: MemberId,
    /// Cached balance, kept equal to the ledger-derived balance
    pub balance: Decimal,
    /// Net of ledger rows removed by retention purges
    pub opening_balance: Decimal,
    /// Amount spent on `last_spent_reset`
    pub daily_spent: Decimal,
    pub last_spent_reset: NaiveDate,
}

/// Identity fields supplied when a card is issued
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct IssueCardRequest {
    pub member_ref: String,
    pub name: String,
    pub group_name: String,
    pub guardian: Option<String>,
    /// Reference to an uploaded photo, stored as-is
    pub photo_ref: Option<String>,
}

impl IssueCardRequest {
    pub fn validate(&self) -> LedgerResult<()> {
        validate_member_ref(&self.member_ref)?;
        if self.name.trim().is_empty() {
            return Err(LedgerError::validation("name", "must not be empty"));
        }
        if self.group_name.trim().is_empty() {
            return Err(LedgerError::validation("group_name", "must not be empty"));
        }
        Ok(())
    }
}

/// Member references are numeric, like the GR numbers they come from
pub fn validate_member_ref(member_ref: &str) -> LedgerResult<()> {
    if member_ref.is_empty() || !member_ref.chars().all(|c| c.is_ascii_digit()) {
        return Err(LedgerError::validation(
            "member_ref",
            format!("'{member_ref}' is not a valid reference number"),
        ));
    }
    Ok(())
}

/// Daily spending position of a member, with the lazy reset already applied
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyStatus {
    pub member_ref: String,
    /// Effective limit; `None` means unlimited
    pub daily_limit: Option<Decimal>,
    pub daily_spent: Decimal,
    /// `None` when unlimited
    pub remaining: Option<Decimal>,
    pub last_spent_reset: NaiveDate,
}

/// Cached and ledger-derived balance side by side
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceView {
    pub member_ref: String,
    pub balance: Decimal,
    pub derived_balance: Decimal,
}

impl BalanceView {
    pub fn is_consistent(&self) -> bool {
        self.balance == self.derived_balance
    }
}

/// One line of the account report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountSummary {
    pub member_ref: String,
    pub name: String,
    pub active_card: Option<CardNumber>,
    pub balance: Decimal,
    pub daily_spent: Decimal,
    pub last_spent_reset: NaiveDate,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::digits("12345", true)]
    #[case::empty("", false)]
    #[case::letters("12a45", false)]
    #[case::space(" 123", false)]
    fn test_validate_member_ref(#[case] member_ref: &str, #[case] ok: bool) {
        assert_eq!(validate_member_ref(member_ref).is_ok(), ok);
    }

    #[test]
    fn test_issue_request_requires_name() {
        let request = IssueCardRequest {
            member_ref: "1001".to_string(),
            name: "  ".to_string(),
            group_name: "7-B".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            request.validate(),
            Err(LedgerError::Validation { field, .. }) if field == "name"
        ));
    }

    #[test]
    fn test_scan_payload_concatenates_reference_and_number() {
        let card = Card {
            card_id: 1,
            member_id: 1,
            member_ref: "1234".to_string(),
            card_number: 54321,
            photo_ref: None,
            is_active: true,
        };
        assert_eq!(card.scan_payload(), "123454321");
    }
}
