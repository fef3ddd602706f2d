//! Balance ledger
//!
//! Credits (recharges) and debits (completed transactions) against member
//! accounts. The cached `accounts.balance` always equals the ledger-derived
//! balance:
//!
//! ```text
//! balance == opening_balance + sum(recharges) - sum(completed transactions)
//! ```
//!
//! because every write to it happens in the same transaction as the ledger
//! row that justifies it.
//!
//! # Serialization
//!
//! Each mutating transaction opens with a write to the member's account row.
//! SQLite grants a single writer at a time, and a transaction that starts
//! with a write takes the lock before it reads anything, so every check below
//! sees the state it is about to modify. Concurrent debits of one member are
//! applied one after another; none can overdraw the balance or exceed the
//! daily limit.

use chrono::{Duration, NaiveDate};
use std::collections::HashMap;
use rust_decimal::Decimal;
use sqlx::{FromRow, SqliteConnection};

use super::context::{LedgerContext, Staged};
use super::daily_limit::{check_daily_limit, default_limit_minor, effective_daily_spent, effective_limit};
use crate::db::now_millis;
use crate::db::rows::{AccountRow, RechargeRow, TransactionRow, TRANSACTION_COLUMNS};
use crate::types::member::validate_member_ref;
use crate::types::{
    from_minor, Account, AccountSummary, BalanceView, CardId, CardNumber, DailyStats, DailyTotal,
    DebitOutcome, DebitRequest, LedgerError, LedgerEvent, LedgerResult, MemberId, Minor, Recharge,
    RechargeRequest, StoreId, StoreSales, Transaction, TransactionStatus,
};

/// Cached and derived balance of every account
const BALANCE_VIEW_SQL: &str = "SELECT m.member_ref, a.balance, \
     a.opening_balance \
     + COALESCE((SELECT SUM(r.amount) FROM recharges r WHERE r.member_id = a.member_id), 0) \
     - COALESCE((SELECT SUM(t.amount) FROM transactions t WHERE t.member_id = a.member_id AND t.status = 'completed'), 0) \
     AS derived_balance \
     FROM accounts a JOIN members m ON m.member_id = a.member_id";

#[derive(Debug, FromRow)]
struct BalanceRow {
    member_ref: String,
    balance: i64,
    derived_balance: i64,
}

impl From<BalanceRow> for BalanceView {
    fn from(row: BalanceRow) -> Self {
        BalanceView {
            member_ref: row.member_ref,
            balance: from_minor(row.balance),
            derived_balance: from_minor(row.derived_balance),
        }
    }
}

/// What a debit needs to know about the member, read under the write lock
#[derive(Debug, FromRow)]
struct DebitPosition {
    member_id: MemberId,
    balance: i64,
    daily_spent: i64,
    last_spent_reset: NaiveDate,
    daily_limit: Option<i64>,
}

#[derive(Debug, FromRow)]
struct SummaryRow {
    member_ref: String,
    name: String,
    active_card: Option<i64>,
    balance: i64,
    daily_spent: i64,
    last_spent_reset: NaiveDate,
}

/// Lock the member's account row for the rest of the transaction
///
/// Returns false when the member (or their account) does not exist.
async fn lock_account(conn: &mut SqliteConnection, member_ref: &str, now: i64) -> LedgerResult<bool> {
    let locked = sqlx::query(
        "UPDATE accounts SET updated_at = ?1 \
         WHERE member_id = (SELECT member_id FROM members WHERE member_ref = ?2)",
    )
    .bind(now)
    .bind(member_ref)
    .execute(&mut *conn)
    .await?;
    Ok(locked.rows_affected() > 0)
}

/// Balance Ledger
#[derive(Debug, Clone)]
pub struct BalanceLedger {
    ctx: LedgerContext,
}

impl BalanceLedger {
    pub fn new(ctx: LedgerContext) -> Self {
        Self { ctx }
    }

    /// Credit a member's account
    ///
    /// Appends a recharge row and increases the cached balance in one
    /// transaction.
    ///
    /// # Returns
    ///
    /// The balance after the recharge
    pub async fn recharge(&self, request: RechargeRequest) -> LedgerResult<Decimal> {
        let amount = request.validate()?;
        let new_balance = self
            .ctx
            .bounded("recharge", self.recharge_tx(&request, amount))
            .await?;
        let new_balance = from_minor(new_balance);

        tracing::info!(
            member_ref = %request.member_ref,
            amount = %request.amount,
            recharge_type = %request.recharge_type,
            actor = %request.actor,
            %new_balance,
            "Recharge completed"
        );
        self.ctx.events.publish(LedgerEvent::RechargeCompleted {
            member_ref: request.member_ref.clone(),
            amount: from_minor(amount),
            new_balance,
        });
        Ok(new_balance)
    }

    async fn recharge_tx(&self, request: &RechargeRequest, amount: Minor) -> LedgerResult<Staged<Minor>> {
        let now = now_millis(self.ctx.now());
        let mut tx = self.ctx.pool.begin().await?;

        if !lock_account(&mut tx, &request.member_ref, now).await? {
            return Err(LedgerError::member_not_found(&request.member_ref));
        }

        let (member_id, balance): (MemberId, Minor) = sqlx::query_as(
            "SELECT a.member_id, a.balance FROM accounts a JOIN members m ON m.member_id = a.member_id \
             WHERE m.member_ref = ?1",
        )
        .bind(&request.member_ref)
        .fetch_one(&mut *tx)
        .await?;

        let new_balance = balance.checked_add(amount).ok_or_else(|| {
            LedgerError::validation("amount", "recharge would overflow the balance")
        })?;

        sqlx::query(
            "INSERT INTO recharges (member_id, amount, recharge_type, notes, created_by, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(member_id)
        .bind(amount)
        .bind(request.recharge_type.as_str())
        .bind(&request.notes)
        .bind(request.actor.trim())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE accounts SET balance = ?1 WHERE member_id = ?2")
            .bind(new_balance)
            .bind(member_id)
            .execute(&mut *tx)
            .await?;

        Ok((tx, new_balance))
    }

    /// Debit a member at a store
    ///
    /// The whole debit is one transaction:
    ///
    /// 1. lock the account and read balance, counter and effective limit
    /// 2. resolve the card and the store
    /// 3. reset a stale daily counter
    /// 4. reject when the balance is short, then when the daily limit would be
    ///    exceeded
    /// 5. append a completed transaction dated today
    /// 6. write the new balance and counter
    /// 7. add the amount to the store's pending settlement pool
    ///
    /// A rejection at any step leaves nothing behind.
    ///
    /// # Errors
    ///
    /// * `LedgerError::MemberNotFound` / `CardNotFound` / `StoreNotFound`
    /// * `LedgerError::InsufficientBalance` - checked before the limit
    /// * `LedgerError::DailyLimitExceeded`
    pub async fn debit(&self, request: DebitRequest) -> LedgerResult<DebitOutcome> {
        let amount = request.validate()?;
        let outcome = self
            .ctx
            .bounded("debit", self.debit_tx(&request, amount))
            .await?;

        tracing::info!(
            member_ref = %request.member_ref,
            store_id = request.store_id,
            amount = %request.amount,
            transaction_id = outcome.transaction_id,
            new_balance = %outcome.new_balance,
            "Debit completed"
        );
        self.ctx.events.publish(LedgerEvent::TransactionCompleted {
            transaction_id: outcome.transaction_id,
            store_id: request.store_id,
            member_ref: request.member_ref.clone(),
            amount: from_minor(amount),
            new_balance: outcome.new_balance,
            new_daily_spent: outcome.new_daily_spent,
        });
        Ok(outcome)
    }

    async fn debit_tx(&self, request: &DebitRequest, amount: Minor) -> LedgerResult<Staged<DebitOutcome>> {
        let member_ref = request.member_ref.as_str();
        let today = self.ctx.today();
        let now = now_millis(self.ctx.now());
        let default_limit = default_limit_minor(&self.ctx.config)?;
        let mut tx = self.ctx.pool.begin().await?;

        if !lock_account(&mut tx, member_ref, now).await? {
            return Err(LedgerError::member_not_found(member_ref));
        }

        let position: DebitPosition = sqlx::query_as(
            "SELECT a.member_id, a.balance, a.daily_spent, a.last_spent_reset, m.daily_limit \
             FROM accounts a JOIN members m ON m.member_id = a.member_id WHERE m.member_ref = ?1",
        )
        .bind(member_ref)
        .fetch_one(&mut *tx)
        .await?;

        let card_id = resolve_debit_card(&mut tx, position.member_id, member_ref, request.card_number).await?;

        let store: Option<StoreId> = sqlx::query_scalar("SELECT store_id FROM stores WHERE store_id = ?1")
            .bind(request.store_id)
            .fetch_optional(&mut *tx)
            .await?;
        if store.is_none() {
            return Err(LedgerError::StoreNotFound {
                store_id: request.store_id,
            });
        }

        let spent = effective_daily_spent(position.daily_spent, position.last_spent_reset, today);

        if amount > position.balance {
            return Err(LedgerError::InsufficientBalance {
                member_ref: member_ref.to_string(),
                balance: from_minor(position.balance),
                requested: from_minor(amount),
            });
        }

        let limit = effective_limit(position.daily_limit, default_limit);
        if let Err(remaining) = check_daily_limit(limit, spent, amount) {
            tracing::debug!(member_ref, spent, amount, "Debit rejected by daily limit");
            return Err(LedgerError::DailyLimitExceeded {
                member_ref: member_ref.to_string(),
                limit: from_minor(limit.unwrap_or_default()),
                spent: from_minor(spent),
                remaining: from_minor(remaining),
                requested: from_minor(amount),
            });
        }

        let transaction_id: i64 = sqlx::query_scalar(
            "INSERT INTO transactions (member_id, card_id, store_id, amount, status, spent_on, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) RETURNING transaction_id",
        )
        .bind(position.member_id)
        .bind(card_id)
        .bind(request.store_id)
        .bind(amount)
        .bind(TransactionStatus::Completed.as_str())
        .bind(today)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let new_balance = position.balance - amount;
        let new_daily_spent = spent + amount;
        sqlx::query(
            "UPDATE accounts SET balance = ?1, daily_spent = ?2, last_spent_reset = ?3 WHERE member_id = ?4",
        )
        .bind(new_balance)
        .bind(new_daily_spent)
        .bind(today)
        .bind(position.member_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO store_settlements (store_id, pending_amount, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?3) \
             ON CONFLICT(store_id) DO UPDATE SET pending_amount = pending_amount + excluded.pending_amount, \
             updated_at = excluded.updated_at",
        )
        .bind(request.store_id)
        .bind(amount)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let outcome = DebitOutcome {
            transaction_id,
            new_balance: from_minor(new_balance),
            new_daily_spent: from_minor(new_daily_spent),
        };
        Ok((tx, outcome))
    }

    /// Stored account of a member, daily counter as last written
    pub async fn account(&self, member_ref: &str) -> LedgerResult<Account> {
        validate_member_ref(member_ref)?;
        sqlx::query_as::<_, AccountRow>(
            "SELECT a.member_id, a.balance, a.opening_balance, a.daily_spent, a.last_spent_reset \
             FROM accounts a JOIN members m ON m.member_id = a.member_id WHERE m.member_ref = ?1",
        )
        .bind(member_ref)
        .fetch_optional(&self.ctx.pool)
        .await?
        .map(Account::from)
        .ok_or_else(|| LedgerError::member_not_found(member_ref))
    }

    /// Cached and ledger-derived balance of one member
    pub async fn balance(&self, member_ref: &str) -> LedgerResult<BalanceView> {
        validate_member_ref(member_ref)?;
        let sql = format!("{BALANCE_VIEW_SQL} WHERE m.member_ref = ?1");
        sqlx::query_as::<_, BalanceRow>(&sql)
            .bind(member_ref)
            .fetch_optional(&self.ctx.pool)
            .await?
            .map(BalanceView::from)
            .ok_or_else(|| LedgerError::member_not_found(member_ref))
    }

    /// Accounts whose cached balance disagrees with the ledger
    pub async fn audit_balances(&self) -> LedgerResult<Vec<BalanceView>> {
        let sql = format!("SELECT * FROM ({BALANCE_VIEW_SQL}) WHERE balance != derived_balance ORDER BY member_ref");
        let diverging: Vec<BalanceView> = sqlx::query_as::<_, BalanceRow>(&sql)
            .fetch_all(&self.ctx.pool)
            .await?
            .into_iter()
            .map(BalanceView::from)
            .collect();
        if diverging.is_empty() {
            tracing::info!("Balance audit passed");
        } else {
            tracing::error!(accounts = diverging.len(), "Balance audit found diverging accounts");
        }
        Ok(diverging)
    }

    /// Recharges of a member, newest first
    pub async fn recharges(&self, member_ref: &str) -> LedgerResult<Vec<Recharge>> {
        validate_member_ref(member_ref)?;
        sqlx::query_as::<_, RechargeRow>(
            "SELECT r.recharge_id, m.member_ref, r.amount, r.recharge_type, r.notes, r.created_by, r.created_at \
             FROM recharges r JOIN members m ON m.member_id = r.member_id \
             WHERE m.member_ref = ?1 ORDER BY r.recharge_id DESC",
        )
        .bind(member_ref)
        .fetch_all(&self.ctx.pool)
        .await?
        .into_iter()
        .map(Recharge::try_from)
        .collect()
    }

    /// Transactions of a member across all of their cards, for `from..=to`
    pub async fn member_transactions(
        &self,
        member_ref: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> LedgerResult<Vec<Transaction>> {
        validate_member_ref(member_ref)?;
        if from > to {
            return Err(LedgerError::validation(
                "date_range",
                format!("start {from} is after end {to}"),
            ));
        }
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions t \
             JOIN members m ON m.member_id = t.member_id LEFT JOIN cards c ON c.card_id = t.card_id \
             WHERE m.member_ref = ?1 AND t.spent_on BETWEEN ?2 AND ?3 ORDER BY t.transaction_id DESC"
        );
        Ok(sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(member_ref)
            .bind(from)
            .bind(to)
            .fetch_all(&self.ctx.pool)
            .await?
            .into_iter()
            .map(Transaction::from)
            .collect())
    }

    /// Transactions taken by a store, optionally restricted to one day
    pub async fn store_transactions(
        &self,
        store_id: StoreId,
        on: Option<NaiveDate>,
    ) -> LedgerResult<Vec<Transaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions t \
             JOIN members m ON m.member_id = t.member_id LEFT JOIN cards c ON c.card_id = t.card_id \
             WHERE t.store_id = ?1 AND (?2 IS NULL OR t.spent_on = ?2) ORDER BY t.transaction_id DESC"
        );
        Ok(sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(store_id)
            .bind(on)
            .fetch_all(&self.ctx.pool)
            .await?
            .into_iter()
            .map(Transaction::from)
            .collect())
    }

    /// Distinct members, transaction count and amount debited on `date`
    pub async fn daily_stats(&self, date: NaiveDate) -> LedgerResult<DailyStats> {
        let (total_members, total_transactions, total_amount): (i64, i64, i64) = sqlx::query_as(
            "SELECT COUNT(DISTINCT member_id), COUNT(*), COALESCE(SUM(amount), 0) \
             FROM transactions WHERE spent_on = ?1 AND status = 'completed'",
        )
        .bind(date)
        .fetch_one(&self.ctx.pool)
        .await?;
        Ok(DailyStats {
            date,
            total_members,
            total_transactions,
            total_amount: from_minor(total_amount),
        })
    }

    /// Debit count and amount for each of the last `days` days, today included
    ///
    /// Oldest day first. Days without debits are present with zeros.
    pub async fn daily_series(&self, days: u32) -> LedgerResult<Vec<DailyTotal>> {
        if days == 0 {
            return Err(LedgerError::validation("days", "must be at least 1"));
        }
        let today = self.ctx.today();
        let first = today - Duration::days(i64::from(days) - 1);
        let rows: Vec<(NaiveDate, i64, i64)> = sqlx::query_as(
            "SELECT spent_on, COUNT(*), COALESCE(SUM(amount), 0) FROM transactions \
             WHERE spent_on >= ?1 AND spent_on <= ?2 AND status = 'completed' \
             GROUP BY spent_on",
        )
        .bind(first)
        .bind(today)
        .fetch_all(&self.ctx.pool)
        .await?;
        let by_day: HashMap<NaiveDate, (i64, i64)> = rows
            .into_iter()
            .map(|(date, count, amount)| (date, (count, amount)))
            .collect();

        Ok(first
            .iter_days()
            .take(days as usize)
            .map(|date| {
                let (transaction_count, amount) = by_day.get(&date).copied().unwrap_or_default();
                DailyTotal {
                    date,
                    transaction_count,
                    total_amount: from_minor(amount),
                }
            })
            .collect())
    }

    /// Per-store debit count and takings from `since` (inclusive) on
    ///
    /// Stores without sales in the window are left out. Biggest sellers
    /// first.
    pub async fn store_sales(&self, since: NaiveDate) -> LedgerResult<Vec<StoreSales>> {
        let rows: Vec<(StoreId, String, i64, i64)> = sqlx::query_as(
            "SELECT s.store_id, s.store_name, COUNT(t.transaction_id), SUM(t.amount) \
             FROM stores s JOIN transactions t ON t.store_id = s.store_id \
             WHERE t.spent_on >= ?1 AND t.status = 'completed' \
             GROUP BY s.store_id, s.store_name \
             ORDER BY SUM(t.amount) DESC, s.store_id",
        )
        .bind(since)
        .fetch_all(&self.ctx.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(store_id, store_name, transaction_count, total)| StoreSales {
                store_id,
                store_name,
                transaction_count,
                total_sales: from_minor(total),
            })
            .collect())
    }

    /// One summary line per member, ordered by reference
    pub async fn account_summaries(&self) -> LedgerResult<Vec<AccountSummary>> {
        let rows: Vec<SummaryRow> = sqlx::query_as(
            "SELECT m.member_ref, m.name, c.card_number AS active_card, a.balance, a.daily_spent, a.last_spent_reset \
             FROM accounts a JOIN members m ON m.member_id = a.member_id \
             LEFT JOIN cards c ON c.member_id = a.member_id AND c.is_active = 1 \
             ORDER BY m.member_ref",
        )
        .fetch_all(&self.ctx.pool)
        .await?;
        let today = self.ctx.today();
        Ok(rows
            .into_iter()
            .map(|row| AccountSummary {
                member_ref: row.member_ref,
                name: row.name,
                active_card: row.active_card.and_then(|n| CardNumber::try_from(n).ok()),
                balance: from_minor(row.balance),
                daily_spent: from_minor(effective_daily_spent(row.daily_spent, row.last_spent_reset, today)),
                last_spent_reset: row.last_spent_reset,
            })
            .collect())
    }
}

/// Card a debit is attributed to
///
/// A presented card number must be the member's active card; without one the
/// debit goes to the active card. A member with no active card cannot pay.
async fn resolve_debit_card(
    conn: &mut SqliteConnection,
    member_id: MemberId,
    member_ref: &str,
    card_number: Option<CardNumber>,
) -> LedgerResult<CardId> {
    let card_id: Option<CardId> = match card_number {
        Some(number) => {
            sqlx::query_scalar(
                "SELECT card_id FROM cards WHERE member_id = ?1 AND card_number = ?2 AND is_active = 1",
            )
            .bind(member_id)
            .bind(i64::from(number))
            .fetch_optional(&mut *conn)
            .await?
        }
        None => super::cards::active_card_id(conn, member_id).await?,
    };
    card_id.ok_or_else(|| match card_number {
        Some(number) => LedgerError::card_not_found(member_ref, number),
        None => LedgerError::card_not_found(member_ref, "(active)"),
    })
}
