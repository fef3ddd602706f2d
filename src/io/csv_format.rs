//! CSV format handling for operation logs and account output
//!
//! This module centralizes all CSV format concerns, providing:
//! - CsvRecord structure for deserialization
//! - Conversion from CSV records to engine operations
//! - Account report serialization
//!
//! All functions are pure (no I/O) for easy testing.

use crate::types::{
    AccountSummary, CardNumber, DebitRequest, IssueCardRequest, LedgerOperation, RechargeRequest,
    RechargeType, RegisterStoreRequest, SettlementId, StoreId,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Write;
use std::str::FromStr;

/// Actor recorded for operations applied from a log
pub const REPLAY_ACTOR: &str = "replay";

/// CSV record structure for deserialization
///
/// Matches the operation log with columns:
/// `op,member,card,store,settlement,amount,name,group,note,owner,mobile,email`.
/// Every column but `op` is optional; which ones an operation needs depends
/// on the operation. The trailing store columns may be omitted entirely.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct CsvRecord {
    pub op: String,
    pub member: Option<String>,
    pub card: Option<String>,
    pub store: Option<String>,
    pub settlement: Option<String>,
    pub amount: Option<String>,
    pub name: Option<String>,
    pub group: Option<String>,
    pub note: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub mobile: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn required<'a>(field: &'a Option<String>, column: &str, op: &str) -> Result<&'a str, String> {
    present(field).ok_or_else(|| format!("'{op}' is missing {column}"))
}

fn parse_amount(value: &str) -> Result<Decimal, String> {
    Decimal::from_str(value).map_err(|_| format!("Invalid amount '{value}'"))
}

fn parse_id<T: FromStr>(value: &str, column: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("Invalid {column} '{value}'"))
}

/// Convert a CsvRecord to a LedgerOperation
///
/// Parses the operation name (case-insensitive), then the columns that
/// operation needs. Values are only parsed here; business validation
/// happens in the engine.
///
/// # Arguments
///
/// * `record` - The deserialized CSV record
///
/// # Returns
///
/// * `Ok(LedgerOperation)` - Successfully converted record
/// * `Err(String)` - Error message describing the conversion failure
pub fn convert_csv_record(record: CsvRecord) -> Result<LedgerOperation, String> {
    let op = record.op.trim().to_lowercase();
    let member = |r: &CsvRecord| required(&r.member, "member", &op).map(str::to_string);
    let amount = |r: &CsvRecord| required(&r.amount, "amount", &op).and_then(parse_amount);
    let card_number = |r: &CsvRecord| -> Result<Option<CardNumber>, String> {
        present(&r.card).map(|c| parse_id(c, "card")).transpose()
    };
    let settlement_id = |r: &CsvRecord| -> Result<SettlementId, String> {
        required(&r.settlement, "settlement", &op).and_then(|s| parse_id(s, "settlement"))
    };
    let store_id = |r: &CsvRecord| -> Result<StoreId, String> {
        required(&r.store, "store", &op).and_then(|s| parse_id(s, "store"))
    };
    let text = |field: &Option<String>| present(field).map(str::to_string);

    let operation = match op.as_str() {
        "issue" => LedgerOperation::IssueCard(IssueCardRequest {
            member_ref: member(&record)?,
            name: required(&record.name, "name", &op)?.to_string(),
            group_name: required(&record.group, "group", &op)?.to_string(),
            guardian: text(&record.note),
            photo_ref: None,
        }),
        "activate" => LedgerOperation::ActivateCard {
            member_ref: member(&record)?,
            card_number: card_number(&record)?.ok_or_else(|| format!("'{op}' is missing card"))?,
        },
        "deactivate" => LedgerOperation::DeactivateCard {
            member_ref: member(&record)?,
            card_number: card_number(&record)?,
        },
        "recharge" => LedgerOperation::Recharge(RechargeRequest {
            member_ref: member(&record)?,
            amount: amount(&record)?,
            recharge_type: match present(&record.group) {
                Some(kind) => kind.parse::<RechargeType>().map_err(|e| e.to_string())?,
                None => RechargeType::Cash,
            },
            notes: text(&record.note),
            actor: REPLAY_ACTOR.to_string(),
        }),
        "limit" => LedgerOperation::SetDailyLimit {
            member_ref: member(&record)?,
            limit: present(&record.amount).map(parse_amount).transpose()?,
            actor: REPLAY_ACTOR.to_string(),
        },
        "store" => LedgerOperation::RegisterStore(RegisterStoreRequest {
            store_name: required(&record.name, "name", &op)?.to_string(),
            store_type: required(&record.group, "group", &op)?.to_string(),
            owner_name: required(&record.owner, "owner", &op)?.to_string(),
            mobile_number: required(&record.mobile, "mobile", &op)?.to_string(),
            email: required(&record.email, "email", &op)?.to_string(),
        }),
        "debit" => LedgerOperation::Debit(DebitRequest {
            member_ref: member(&record)?,
            card_number: card_number(&record)?,
            store_id: store_id(&record)?,
            amount: amount(&record)?,
        }),
        "settle" => LedgerOperation::RequestSettlement {
            store_id: store_id(&record)?,
            amount: amount(&record)?,
            actor: REPLAY_ACTOR.to_string(),
        },
        "amend" => LedgerOperation::AmendSettlement {
            settlement_id: settlement_id(&record)?,
            amount: amount(&record)?,
            actor: REPLAY_ACTOR.to_string(),
        },
        "pay" => LedgerOperation::RecordPayment {
            settlement_id: settlement_id(&record)?,
            amount: amount(&record)?,
            actor: REPLAY_ACTOR.to_string(),
        },
        "sweep" => LedgerOperation::DailyReset,
        "purge" => LedgerOperation::RetentionPurge,
        _ => return Err(format!("Invalid operation: '{}'", record.op)),
    };
    Ok(operation)
}

/// Write the account report in CSV format
///
/// Writes accounts with columns:
/// `member,name,active_card,balance,daily_spent,last_spent_reset`.
/// Accounts are sorted by member reference for deterministic output.
///
/// # Arguments
///
/// * `accounts` - Slice of account summaries to write
/// * `output` - Mutable reference to a writer for outputting CSV
///
/// # Returns
///
/// * `Ok(())` if writing succeeded
/// * `Err(String)` if a write error occurred
pub fn write_accounts_csv(accounts: &[AccountSummary], output: &mut dyn Write) -> Result<(), String> {
    use csv::Writer;

    let mut writer = Writer::from_writer(output);

    writer
        .write_record([
            "member",
            "name",
            "active_card",
            "balance",
            "daily_spent",
            "last_spent_reset",
        ])
        .map_err(|e| format!("Failed to write CSV header: {}", e))?;

    let mut sorted_accounts = accounts.to_vec();
    sorted_accounts.sort_by(|a, b| a.member_ref.cmp(&b.member_ref));

    for account in sorted_accounts {
        writer
            .write_record(&[
                account.member_ref,
                account.name,
                account
                    .active_card
                    .map(|n| n.to_string())
                    .unwrap_or_default(),
                format!("{:.2}", account.balance),
                format!("{:.2}", account.daily_spent),
                account.last_spent_reset.to_string(),
            ])
            .map_err(|e| format!("Failed to write account record: {}", e))?;
    }

    writer
        .flush()
        .map_err(|e| format!("Failed to flush output: {}", e))?;

    Ok(())
}
