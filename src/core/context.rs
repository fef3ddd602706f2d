//! Shared handles every engine component works with

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::future::Future;
use std::sync::Arc;

use super::clock::Clock;
use super::events::EventBus;
use crate::config::LedgerConfig;
use crate::types::{LedgerError, LedgerResult};

/// Transaction whose work is done, paired with its result, awaiting commit
pub(crate) type Staged<T> = (Transaction<'static, Sqlite>, T);

/// Pool, configuration, clock and event bus, cheap to clone
#[derive(Debug, Clone)]
pub struct LedgerContext {
    pub(crate) pool: SqlitePool,
    pub(crate) config: Arc<LedgerConfig>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) events: EventBus,
}

impl LedgerContext {
    pub fn new(pool: SqlitePool, config: LedgerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            clock,
            events: EventBus::new(),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Today's calendar date in the configured timezone
    pub(crate) fn today(&self) -> NaiveDate {
        self.clock.today(self.config.timezone)
    }

    /// Run one ledger transaction under the configured timeout
    ///
    /// The timeout covers the work up to, but not including, the commit. When
    /// it fires the future is dropped together with its uncommitted
    /// transaction, which rolls back every step. A transaction that finished
    /// its work is always committed, so `Timeout` never hides an applied
    /// operation.
    pub(crate) async fn bounded<T, F>(&self, operation: &str, fut: F) -> LedgerResult<T>
    where
        F: Future<Output = LedgerResult<Staged<T>>>,
    {
        let limit = self.config.tx_timeout;
        let (tx, value) = match tokio::time::timeout(limit, fut).await {
            Ok(staged) => staged?,
            Err(_) => {
                tracing::warn!(operation, timeout_ms = limit.as_millis() as u64, "Ledger transaction timed out");
                return Err(LedgerError::Timeout {
                    operation: operation.to_string(),
                    after_ms: limit.as_millis() as u64,
                });
            }
        };
        tx.commit().await?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::SystemClock;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn context(dir: &TempDir, tx_timeout: Duration) -> LedgerContext {
        let pool = crate::db::connect(&dir.path().join("ledger.db")).await.unwrap();
        let config = LedgerConfig {
            tx_timeout,
            ..Default::default()
        };
        LedgerContext::new(pool, config, Arc::new(SystemClock))
    }

    async fn record(ctx: &LedgerContext, job: &str, stall: Duration) -> LedgerResult<Staged<()>> {
        let mut tx = ctx.pool.begin().await?;
        sqlx::query(
            "INSERT INTO maintenance_runs (job, last_run_at, run_date, affected) \
             VALUES (?1, 0, '2026-03-10', 0)",
        )
        .bind(job)
        .execute(&mut *tx)
        .await?;
        tokio::time::sleep(stall).await;
        Ok((tx, ()))
    }

    async fn runs(ctx: &LedgerContext) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM maintenance_runs")
            .fetch_one(&ctx.pool)
            .await
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_bounded_commits_finished_work() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, Duration::from_secs(5)).await;

        ctx.bounded("record", record(&ctx, "daily_reset", Duration::ZERO))
            .await
            .unwrap();

        assert_eq!(runs(&ctx).await, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_bounded_rolls_back_stalled_work() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, Duration::from_millis(100)).await;

        let result = ctx
            .bounded("record", record(&ctx, "daily_reset", Duration::from_secs(2)))
            .await;

        assert_eq!(
            result,
            Err(LedgerError::Timeout {
                operation: "record".to_string(),
                after_ms: 100,
            })
        );
        assert_eq!(runs(&ctx).await, 0);
    }
}
