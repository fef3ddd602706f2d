//! Scheduled maintenance
//!
//! Two jobs run once per local day:
//!
//! - the daily-limit sweep at `reset_time` (00:45 by default)
//! - the retention purge at `purge_time` (02:11 by default), deleting ledger
//!   rows older than `retention_days`
//!
//! The purge folds the net of every deleted recharge and transaction into the
//! account's `opening_balance`, so the cached balance keeps matching what the
//! remaining ledger derives. It refuses to run when any account already
//! diverges, since freezing a divergent account would hide the divergence.

use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::context::{LedgerContext, Staged};
use super::daily_limit::{record_run, DailyLimits};
use crate::db::now_millis;
use crate::types::{LedgerError, LedgerResult};

pub(crate) const RETENTION_PURGE_JOB: &str = "retention_purge";

const FALLBACK_WAIT: Duration = Duration::from_secs(60);

/// Rows removed by one retention purge
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PurgeReport {
    pub cutoff: DateTime<Utc>,
    pub settlement_logs: u64,
    pub settlements: u64,
    pub store_settlements: u64,
    pub transactions: u64,
    pub recharges: u64,
}

impl PurgeReport {
    pub fn total(&self) -> u64 {
        self.settlement_logs
            + self.settlements
            + self.store_settlements
            + self.transactions
            + self.recharges
    }
}

/// Next instant strictly after `now` at which the local wall clock reads `at`
///
/// On a day where `at` does not exist (a DST gap) the first instant after the
/// gap is used.
pub fn next_occurrence(now: DateTime<Utc>, at: NaiveTime, tz: Tz) -> DateTime<Utc> {
    let local_today = now.with_timezone(&tz).date_naive();
    for offset in 0..3 {
        let Some(date) = local_today.checked_add_days(chrono::Days::new(offset)) else {
            break;
        };
        let wall = date.and_time(at);
        let resolved = tz
            .from_local_datetime(&wall)
            .earliest()
            .or_else(|| tz.from_local_datetime(&(wall + chrono::Duration::hours(1))).earliest());
        if let Some(candidate) = resolved.map(|t| t.with_timezone(&Utc)) {
            if candidate > now {
                return candidate;
            }
        }
    }
    tracing::error!(%at, %tz, "Cannot resolve next local occurrence, using fallback");
    now + chrono::Duration::hours(1)
}

/// How long to wait from `now` until `at` local time
pub fn duration_until_next(now: DateTime<Utc>, at: NaiveTime, tz: Tz) -> Duration {
    next_occurrence(now, at, tz)
        .signed_duration_since(now)
        .to_std()
        .unwrap_or(FALLBACK_WAIT)
}

/// Maintenance jobs, runnable on demand or from the scheduler
#[derive(Debug, Clone)]
pub struct Maintenance {
    ctx: LedgerContext,
    limits: DailyLimits,
}

impl Maintenance {
    pub fn new(ctx: LedgerContext) -> Self {
        let limits = DailyLimits::new(ctx.clone());
        Self { ctx, limits }
    }

    /// Reset every stale daily counter; see [`DailyLimits::sweep`]
    pub async fn run_daily_reset(&self) -> LedgerResult<u64> {
        self.limits.sweep().await
    }

    /// Delete ledger rows older than the retention window
    ///
    /// Everything happens in one transaction:
    ///
    /// 1. claim the job in `maintenance_runs` (takes the write lock)
    /// 2. abort with `LedgerDivergence` if any cached balance disagrees with the ledger
    /// 3. fold old recharges and transactions into `opening_balance`
    /// 4. delete old settlement logs and completed settlements
    /// 5. delete idle, empty store pools no settlement refers to
    /// 6. delete old transactions and recharges
    pub async fn run_retention_purge(&self) -> LedgerResult<PurgeReport> {
        let report = self
            .ctx
            .bounded("retention_purge", self.purge_tx())
            .await?;
        tracing::info!(
            cutoff = %report.cutoff,
            settlement_logs = report.settlement_logs,
            settlements = report.settlements,
            store_settlements = report.store_settlements,
            transactions = report.transactions,
            recharges = report.recharges,
            "Retention purge finished"
        );
        Ok(report)
    }

    async fn purge_tx(&self) -> LedgerResult<Staged<PurgeReport>> {
        let now = self.ctx.now();
        let now_ms = now_millis(now);
        let today = self.ctx.today();
        let cutoff = now - chrono::Duration::days(i64::from(self.ctx.config.retention_days));
        let cutoff_ms = now_millis(cutoff);
        let mut tx = self.ctx.pool.begin().await?;

        record_run(&mut tx, RETENTION_PURGE_JOB, now_ms, today, 0).await?;

        let diverging: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM accounts a WHERE a.balance != a.opening_balance \
             + COALESCE((SELECT SUM(r.amount) FROM recharges r WHERE r.member_id = a.member_id), 0) \
             - COALESCE((SELECT SUM(t.amount) FROM transactions t WHERE t.member_id = a.member_id AND t.status = 'completed'), 0)",
        )
        .fetch_one(&mut *tx)
        .await?;
        if diverging > 0 {
            tracing::error!(accounts = diverging, "Ledger divergence detected, purge aborted");
            return Err(LedgerError::LedgerDivergence {
                accounts: diverging as u64,
            });
        }

        sqlx::query(
            "UPDATE accounts SET opening_balance = opening_balance \
             + COALESCE((SELECT SUM(r.amount) FROM recharges r WHERE r.member_id = accounts.member_id AND r.created_at < ?1), 0) \
             - COALESCE((SELECT SUM(t.amount) FROM transactions t WHERE t.member_id = accounts.member_id \
                 AND t.status = 'completed' AND t.created_at < ?1), 0)",
        )
        .bind(cutoff_ms)
        .execute(&mut *tx)
        .await?;

        let mut report = PurgeReport {
            cutoff,
            ..Default::default()
        };

        report.settlement_logs = sqlx::query(
            "DELETE FROM settlement_logs WHERE created_at < ?1 OR settlement_id IN \
             (SELECT settlement_id FROM settlements WHERE status = 'completed' AND updated_at < ?1)",
        )
        .bind(cutoff_ms)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        report.settlements =
            sqlx::query("DELETE FROM settlements WHERE status = 'completed' AND updated_at < ?1")
                .bind(cutoff_ms)
                .execute(&mut *tx)
                .await?
                .rows_affected();

        report.store_settlements = sqlx::query(
            "DELETE FROM store_settlements WHERE updated_at < ?1 AND pending_amount = 0 \
             AND store_id NOT IN (SELECT store_id FROM settlements)",
        )
        .bind(cutoff_ms)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        report.transactions = sqlx::query("DELETE FROM transactions WHERE created_at < ?1")
            .bind(cutoff_ms)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        report.recharges = sqlx::query("DELETE FROM recharges WHERE created_at < ?1")
            .bind(cutoff_ms)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        record_run(&mut tx, RETENTION_PURGE_JOB, now_ms, today, report.total()).await?;
        Ok((tx, report))
    }
}

/// Runs the maintenance jobs at their local wall-clock times until cancelled
///
/// A failed job is logged and retried at its next scheduled time.
#[derive(Debug)]
pub struct MaintenanceScheduler {
    maintenance: Maintenance,
    ctx: LedgerContext,
    shutdown: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    DailyReset,
    RetentionPurge,
}

impl MaintenanceScheduler {
    pub fn new(ctx: LedgerContext, shutdown: CancellationToken) -> Self {
        Self {
            maintenance: Maintenance::new(ctx.clone()),
            ctx,
            shutdown,
        }
    }

    /// Main loop: catch-up sweep, then the scheduled jobs
    pub async fn run(self) {
        tracing::info!(
            reset_time = %self.ctx.config.reset_time,
            purge_time = %self.ctx.config.purge_time,
            timezone = %self.ctx.config.timezone,
            "Maintenance scheduler started"
        );

        // Counters left stale while the process was down
        if let Err(e) = self.maintenance.run_daily_reset().await {
            tracing::error!(error = %e, "Catch-up sweep failed");
        }

        loop {
            let (job, wait) = self.next_job();
            tracing::info!(?job, "Next maintenance job in {} minutes", wait.as_secs() / 60);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Maintenance scheduler received shutdown signal");
                    break;
                }
            }

            match job {
                Job::DailyReset => {
                    if let Err(e) = self.maintenance.run_daily_reset().await {
                        tracing::error!(error = %e, "Scheduled daily reset failed");
                    }
                }
                Job::RetentionPurge => {
                    if let Err(e) = self.maintenance.run_retention_purge().await {
                        tracing::error!(error = %e, "Scheduled retention purge failed");
                    }
                }
            }
        }

        tracing::info!("Maintenance scheduler stopped");
    }

    fn next_job(&self) -> (Job, Duration) {
        let now = self.ctx.now();
        let config = &self.ctx.config;
        let reset = duration_until_next(now, config.reset_time, config.timezone);
        let purge = duration_until_next(now, config.purge_time, config.timezone);
        if reset <= purge {
            (Job::DailyReset, reset)
        } else {
            (Job::RetentionPurge, purge)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[rstest]
    // 18:00 UTC is 23:30 in Kolkata, the reset at 00:45 is 75 minutes away
    #[case::before_midnight("2026-03-10T18:00:00Z", hm(0, 45), 75 * 60)]
    // 19:15 UTC is exactly 00:45 local; the next one is a day later
    #[case::exactly_at("2026-03-10T19:15:00Z", hm(0, 45), 24 * 3600)]
    // 20:00 UTC is 01:30 local, purge at 02:11 is 41 minutes away
    #[case::purge_same_night("2026-03-10T20:00:00Z", hm(2, 11), 41 * 60)]
    fn test_duration_until_next_kolkata(
        #[case] now: &str,
        #[case] at: NaiveTime,
        #[case] expected_secs: u64,
    ) {
        let wait = duration_until_next(utc(now), at, chrono_tz::Asia::Kolkata);
        assert_eq!(wait, Duration::from_secs(expected_secs));
    }

    #[test]
    fn test_next_occurrence_skips_dst_gap() {
        // 2026-03-08 02:30 does not exist in New York
        let now = utc("2026-03-08T05:00:00Z");
        let next = next_occurrence(now, hm(2, 30), chrono_tz::America::New_York);
        assert!(next > now);
        assert_eq!(next, utc("2026-03-08T07:30:00Z"));
    }

    #[test]
    fn test_purge_report_total() {
        let report = PurgeReport {
            settlement_logs: 3,
            settlements: 1,
            store_settlements: 0,
            transactions: 10,
            recharges: 2,
            ..Default::default()
        };
        assert_eq!(report.total(), 16);
    }
}
