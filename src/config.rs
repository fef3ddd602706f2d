//! Ledger configuration
//!
//! Everything the engine needs to know about its surroundings: the timezone
//! that defines a calendar day, when the scheduled jobs fire, how long ledger
//! rows are retained, and how card numbers are drawn.

use chrono::NaiveTime;
use chrono_tz::Tz;
use rust_decimal::Decimal;
use std::time::Duration;

use crate::types::{LedgerError, LedgerResult};

/// Engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerConfig {
    /// Timezone whose calendar days bound the daily limit
    pub timezone: Tz,
    /// Local wall-clock time of the eager daily-limit sweep
    pub reset_time: NaiveTime,
    /// Local wall-clock time of the retention purge
    pub purge_time: NaiveTime,
    /// Ledger rows older than this many days are purged
    pub retention_days: u32,
    /// Applied to members without an explicit limit; `None` or zero is unlimited
    pub default_daily_limit: Option<Decimal>,
    /// Width of generated card numbers
    pub card_digits: u32,
    /// Collision retries before giving up on card-number generation
    pub card_retry_cap: u32,
    /// Upper bound on a single ledger transaction
    pub tx_timeout: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::Asia::Kolkata,
            reset_time: NaiveTime::from_hms_opt(0, 45, 0).unwrap_or_default(),
            purge_time: NaiveTime::from_hms_opt(2, 11, 0).unwrap_or_default(),
            retention_days: 183,
            default_daily_limit: None,
            card_digits: 5,
            card_retry_cap: 32,
            tx_timeout: Duration::from_secs(10),
        }
    }
}

impl LedgerConfig {
    /// Check the configuration for values the engine cannot work with
    pub fn validate(&self) -> LedgerResult<()> {
        if !(1..=9).contains(&self.card_digits) {
            return Err(LedgerError::validation(
                "card_digits",
                format!("must be between 1 and 9, got {}", self.card_digits),
            ));
        }
        if self.card_retry_cap == 0 {
            return Err(LedgerError::validation("card_retry_cap", "must be at least 1"));
        }
        if self.retention_days == 0 {
            return Err(LedgerError::validation("retention_days", "must be at least 1"));
        }
        if self.tx_timeout.is_zero() {
            return Err(LedgerError::validation("tx_timeout", "must not be zero"));
        }
        if let Some(limit) = self.default_daily_limit {
            crate::types::money::non_negative_to_minor("default_daily_limit", limit)?;
        }
        Ok(())
    }

    /// Half-open range card numbers are drawn from
    pub fn card_number_range(&self) -> std::ops::Range<u32> {
        let low = 10u32.pow(self.card_digits - 1);
        low..low * 10
    }
}

/// Parse a `HH:MM` wall-clock time
pub fn parse_wall_clock(value: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|e| format!("invalid time '{value}' (expected HH:MM): {e}"))
}
