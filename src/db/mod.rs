//! Database module
//!
//! Owns the SQLite connection pool and applies the embedded migrations.
//!
//! The database is opened in WAL mode with foreign keys enforced and a busy
//! timeout, so concurrent writers queue on the write lock instead of failing.

pub mod rows;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;

use crate::types::{LedgerError, LedgerResult};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_CONNECTIONS: u32 = 8;

/// Open (creating if missing) the ledger database at `path` and migrate it
pub async fn connect(path: &Path) -> LedgerResult<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await
        .map_err(|e| LedgerError::database(format!("failed to open {}: {e}", path.display())))?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    tracing::info!(
        path = %path.display(),
        "Ledger database ready (SQLite WAL, busy_timeout={}ms)",
        BUSY_TIMEOUT.as_millis()
    );
    Ok(pool)
}

/// True when the error is a UNIQUE constraint violation naming `column`
pub(crate) fn is_unique_violation_on(error: &sqlx::Error, column: &str) -> bool {
    match error {
        sqlx::Error::Database(db) => db.is_unique_violation() && db.message().contains(column),
        _ => false,
    }
}

/// Current time as Unix milliseconds
pub(crate) fn now_millis(now: chrono::DateTime<chrono::Utc>) -> i64 {
    now.timestamp_millis()
}

/// Inverse of [`now_millis`]
pub(crate) fn from_millis(millis: i64) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp_millis(millis).unwrap_or_default()
}
