//! Daily spending limits
//!
//! A member's `daily_spent` counts debits made on `last_spent_reset`. The
//! counter is reset in two ways that share one staleness rule
//! ([`is_stale`]):
//!
//! - lazily, by the debit path and by [`DailyLimits::daily_status`], whenever
//!   the stored reset date is before today
//! - eagerly, by [`DailyLimits::sweep`], which the scheduler runs shortly
//!   after local midnight
//!
//! Both are idempotent, so a sweep that runs after a lazy reset (or twice)
//! changes nothing.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::SqliteConnection;

use super::context::{LedgerContext, Staged};
use crate::config::LedgerConfig;
use crate::db::{from_millis, now_millis};
use crate::types::ledger::validate_actor;
use crate::types::member::validate_member_ref;
use crate::types::money::non_negative_to_minor;
use crate::types::{from_minor, DailyStatus, LedgerError, LedgerEvent, LedgerResult, Minor};

pub(crate) const DAILY_RESET_JOB: &str = "daily_reset";

/// True when a counter last reset on `last_reset` must be treated as zero on `today`
pub fn is_stale(last_reset: NaiveDate, today: NaiveDate) -> bool {
    last_reset < today
}

/// `daily_spent` as it stands today, with the lazy reset applied
pub fn effective_daily_spent(daily_spent: Minor, last_reset: NaiveDate, today: NaiveDate) -> Minor {
    if is_stale(last_reset, today) {
        0
    } else {
        daily_spent
    }
}

/// The limit that applies to a member
///
/// The member's own limit wins over the configured default. A member limit of
/// zero means unlimited and also overrides the default.
pub fn effective_limit(member_limit: Option<Minor>, default_limit: Option<Minor>) -> Option<Minor> {
    member_limit.or(default_limit).filter(|limit| *limit > 0)
}

/// Check a debit of `amount` against the limit
///
/// Returns the remaining allowance as the error when the debit would push
/// `spent` over `limit`.
pub fn check_daily_limit(limit: Option<Minor>, spent: Minor, amount: Minor) -> Result<(), Minor> {
    match limit {
        Some(limit) if spent + amount > limit => Err((limit - spent).max(0)),
        _ => Ok(()),
    }
}

pub(crate) fn default_limit_minor(config: &LedgerConfig) -> LedgerResult<Option<Minor>> {
    config
        .default_daily_limit
        .map(|limit| non_negative_to_minor("default_daily_limit", limit))
        .transpose()
}

/// Upsert the `maintenance_runs` row of `job`
pub(crate) async fn record_run(
    conn: &mut SqliteConnection,
    job: &str,
    at: i64,
    run_date: NaiveDate,
    affected: u64,
) -> LedgerResult<()> {
    sqlx::query(
        "INSERT INTO maintenance_runs (job, last_run_at, run_date, affected) VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT(job) DO UPDATE SET last_run_at = excluded.last_run_at, \
         run_date = excluded.run_date, affected = excluded.affected",
    )
    .bind(job)
    .bind(at)
    .bind(run_date)
    .bind(affected as i64)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Progress of the daily reset across all accounts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyResetStatus {
    pub date: NaiveDate,
    pub total_accounts: i64,
    pub reset_today: i64,
    pub needs_reset: i64,
    pub last_sweep_at: Option<DateTime<Utc>>,
    pub last_sweep_affected: Option<i64>,
}

/// Daily limit management and reset
#[derive(Debug, Clone)]
pub struct DailyLimits {
    ctx: LedgerContext,
}

impl DailyLimits {
    pub fn new(ctx: LedgerContext) -> Self {
        Self { ctx }
    }

    /// Set or clear a member's daily limit
    ///
    /// `None` removes the member's own limit so the configured default applies
    /// again. Zero is stored as is and makes the member unlimited, whatever
    /// the default. Every change is recorded in `daily_limit_history`.
    ///
    /// Returns the limit now stored for the member.
    pub async fn set_daily_limit(
        &self,
        member_ref: &str,
        limit: Option<Decimal>,
        actor: &str,
    ) -> LedgerResult<Option<Decimal>> {
        validate_member_ref(member_ref)?;
        validate_actor(actor)?;
        let new_limit = limit
            .map(|l| non_negative_to_minor("daily_limit", l))
            .transpose()?;

        self.ctx
            .bounded("set_daily_limit", self.set_daily_limit_tx(member_ref, new_limit, actor))
            .await?;
        tracing::info!(member_ref, limit = ?new_limit.map(from_minor), actor, "Daily limit updated");
        Ok(new_limit.map(from_minor))
    }

    async fn set_daily_limit_tx(
        &self,
        member_ref: &str,
        new_limit: Option<Minor>,
        actor: &str,
    ) -> LedgerResult<Staged<()>> {
        let now = now_millis(self.ctx.now());
        let mut tx = self.ctx.pool.begin().await?;

        let touched = sqlx::query("UPDATE members SET updated_at = ?1 WHERE member_ref = ?2")
            .bind(now)
            .bind(member_ref)
            .execute(&mut *tx)
            .await?;
        if touched.rows_affected() == 0 {
            return Err(LedgerError::member_not_found(member_ref));
        }

        let (member_id, old_limit): (i64, Option<i64>) =
            sqlx::query_as("SELECT member_id, daily_limit FROM members WHERE member_ref = ?1")
                .bind(member_ref)
                .fetch_one(&mut *tx)
                .await?;

        sqlx::query(
            "INSERT INTO daily_limit_history (member_id, old_limit, new_limit, changed_by, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(member_id)
        .bind(old_limit)
        .bind(new_limit)
        .bind(actor)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE members SET daily_limit = ?1 WHERE member_id = ?2")
            .bind(new_limit)
            .bind(member_id)
            .execute(&mut *tx)
            .await?;

        Ok((tx, ()))
    }

    /// Current daily position of a member
    ///
    /// A stale counter is reset in storage as part of the read.
    pub async fn daily_status(&self, member_ref: &str) -> LedgerResult<DailyStatus> {
        validate_member_ref(member_ref)?;
        self.ctx
            .bounded("daily_status", self.daily_status_tx(member_ref))
            .await
    }

    async fn daily_status_tx(&self, member_ref: &str) -> LedgerResult<Staged<DailyStatus>> {
        let today = self.ctx.today();
        let now = now_millis(self.ctx.now());
        let default_limit = default_limit_minor(&self.ctx.config)?;
        let mut tx = self.ctx.pool.begin().await?;

        let reset = sqlx::query(
            "UPDATE accounts SET daily_spent = 0, last_spent_reset = ?1, updated_at = ?2 \
             WHERE member_id = (SELECT member_id FROM members WHERE member_ref = ?3) \
             AND last_spent_reset < ?1",
        )
        .bind(today)
        .bind(now)
        .bind(member_ref)
        .execute(&mut *tx)
        .await?;
        if reset.rows_affected() > 0 {
            tracing::debug!(member_ref, %today, "Lazily reset daily spend");
        }

        let (daily_spent, last_spent_reset, member_limit): (i64, NaiveDate, Option<i64>) =
            sqlx::query_as(
                "SELECT a.daily_spent, a.last_spent_reset, m.daily_limit \
                 FROM accounts a JOIN members m ON m.member_id = a.member_id WHERE m.member_ref = ?1",
            )
            .bind(member_ref)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| LedgerError::member_not_found(member_ref))?;
        let limit = effective_limit(member_limit, default_limit);
        let spent = effective_daily_spent(daily_spent, last_spent_reset, today);
        let status = DailyStatus {
            member_ref: member_ref.to_string(),
            daily_limit: limit.map(from_minor),
            daily_spent: from_minor(spent),
            remaining: limit.map(|l| from_minor((l - spent).max(0))),
            last_spent_reset,
        };
        Ok((tx, status))
    }

    /// Eagerly reset every stale counter
    ///
    /// Resets accounts whose `last_spent_reset` is before today and records
    /// the run in `maintenance_runs`, both in one transaction. Returns the
    /// number of accounts reset; a second run on the same day returns zero.
    pub async fn sweep(&self) -> LedgerResult<u64> {
        let today = self.ctx.today();
        let affected = self
            .ctx
            .bounded("daily_reset", self.reset_tx(today, true))
            .await?;
        tracing::info!(%today, accounts = affected, "Daily limit sweep finished");
        self.ctx.events.publish(LedgerEvent::DailyLimitsReset {
            date: today,
            accounts: affected,
        });
        Ok(affected)
    }

    /// Reset every account's counter regardless of its reset date
    pub async fn force_reset_all(&self) -> LedgerResult<u64> {
        let today = self.ctx.today();
        let affected = self
            .ctx
            .bounded("force_reset", self.reset_tx(today, false))
            .await?;
        tracing::warn!(%today, accounts = affected, "Forced reset of all daily limits");
        self.ctx.events.publish(LedgerEvent::DailyLimitsReset {
            date: today,
            accounts: affected,
        });
        Ok(affected)
    }

    async fn reset_tx(&self, today: NaiveDate, stale_only: bool) -> LedgerResult<Staged<u64>> {
        let now = now_millis(self.ctx.now());
        let mut tx = self.ctx.pool.begin().await?;

        let sql = if stale_only {
            "UPDATE accounts SET daily_spent = 0, last_spent_reset = ?1, updated_at = ?2 \
             WHERE last_spent_reset < ?1"
        } else {
            "UPDATE accounts SET daily_spent = 0, last_spent_reset = ?1, updated_at = ?2"
        };
        let affected = sqlx::query(sql)
            .bind(today)
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        record_run(&mut tx, DAILY_RESET_JOB, now, today, affected).await?;
        Ok((tx, affected))
    }

    /// How many accounts are already on today's counter
    pub async fn reset_status(&self) -> LedgerResult<DailyResetStatus> {
        let today = self.ctx.today();
        let (total_accounts, reset_today, needs_reset): (i64, i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), \
             COALESCE(SUM(CASE WHEN last_spent_reset >= ?1 THEN 1 ELSE 0 END), 0), \
             COALESCE(SUM(CASE WHEN last_spent_reset < ?1 THEN 1 ELSE 0 END), 0) \
             FROM accounts",
        )
        .bind(today)
        .fetch_one(&self.ctx.pool)
        .await?;

        let last: Option<(i64, i64)> =
            sqlx::query_as("SELECT last_run_at, affected FROM maintenance_runs WHERE job = ?1")
                .bind(DAILY_RESET_JOB)
                .fetch_optional(&self.ctx.pool)
                .await?;

        Ok(DailyResetStatus {
            date: today,
            total_accounts,
            reset_today,
            needs_reset,
            last_sweep_at: last.map(|(at, _)| from_millis(at)),
            last_sweep_affected: last.map(|(_, affected)| affected),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
    }

    #[rstest]
    #[case::yesterday(date(9), date(10), true)]
    #[case::today(date(10), date(10), false)]
    #[case::future(date(11), date(10), false)]
    fn test_is_stale(#[case] last: NaiveDate, #[case] today: NaiveDate, #[case] expected: bool) {
        assert_eq!(is_stale(last, today), expected);
    }

    #[test]
    fn test_effective_spent_resets_stale_counter() {
        assert_eq!(effective_daily_spent(25_000, date(9), date(10)), 0);
        assert_eq!(effective_daily_spent(25_000, date(10), date(10)), 25_000);
    }

    #[rstest]
    #[case::member_wins(Some(10_000), Some(50_000), Some(10_000))]
    #[case::default_applies(None, Some(50_000), Some(50_000))]
    #[case::zero_is_unlimited(Some(0), Some(50_000), None)]
    #[case::zero_default_is_unlimited(None, Some(0), None)]
    #[case::nothing_set(None, None, None)]
    fn test_effective_limit(
        #[case] member: Option<Minor>,
        #[case] default: Option<Minor>,
        #[case] expected: Option<Minor>,
    ) {
        assert_eq!(effective_limit(member, default), expected);
    }

    #[rstest]
    #[case::within(Some(30_000), 10_000, 20_000, Ok(()))]
    #[case::exactly_at_limit(Some(30_000), 0, 30_000, Ok(()))]
    #[case::over(Some(30_000), 20_000, 15_000, Err(10_000))]
    #[case::unlimited(None, 1_000_000, 1_000_000, Ok(()))]
    fn test_check_daily_limit(
        #[case] limit: Option<Minor>,
        #[case] spent: Minor,
        #[case] amount: Minor,
        #[case] expected: Result<(), Minor>,
    ) {
        assert_eq!(check_daily_limit(limit, spent, amount), expected);
    }
}
