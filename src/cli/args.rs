use crate::config::{parse_wall_clock, LedgerConfig};
use chrono::NaiveTime;
use chrono_tz::Tz;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::time::Duration;

/// Campus card ledger: cards, balances, daily limits and merchant settlements
#[derive(Parser, Debug)]
#[command(name = "campus-ledger")]
#[command(about = "Campus card ledger: cards, balances, daily limits and merchant settlements", long_about = None)]
pub struct CliArgs {
    /// SQLite database file, created on first use
    #[arg(
        long = "database",
        env = "LEDGER_DATABASE",
        value_name = "PATH",
        default_value = "campus-ledger.db",
        global = true
    )]
    pub database: PathBuf,

    /// Timezone whose calendar days bound the daily limit
    #[arg(
        long = "timezone",
        env = "LEDGER_TIMEZONE",
        value_name = "TZ",
        default_value = "Asia/Kolkata",
        global = true
    )]
    pub timezone: Tz,

    /// Local time of the daily-limit sweep
    #[arg(
        long = "reset-time",
        env = "LEDGER_RESET_TIME",
        value_name = "HH:MM",
        default_value = "00:45",
        value_parser = parse_wall_clock,
        global = true
    )]
    pub reset_time: NaiveTime,

    /// Local time of the retention purge
    #[arg(
        long = "purge-time",
        env = "LEDGER_PURGE_TIME",
        value_name = "HH:MM",
        default_value = "02:11",
        value_parser = parse_wall_clock,
        global = true
    )]
    pub purge_time: NaiveTime,

    /// Ledger rows older than this many days are purged
    #[arg(
        long = "retention-days",
        env = "LEDGER_RETENTION_DAYS",
        value_name = "DAYS",
        default_value_t = 183,
        global = true
    )]
    pub retention_days: u32,

    /// Daily limit for members without their own (0 or unset: unlimited)
    #[arg(
        long = "default-daily-limit",
        env = "LEDGER_DEFAULT_DAILY_LIMIT",
        value_name = "AMOUNT",
        global = true
    )]
    pub default_daily_limit: Option<Decimal>,

    /// Number of digits of generated card numbers
    #[arg(
        long = "card-digits",
        env = "LEDGER_CARD_DIGITS",
        value_name = "DIGITS",
        default_value_t = 5,
        global = true
    )]
    pub card_digits: u32,

    /// Card-number collisions tolerated before issue fails
    #[arg(
        long = "card-retries",
        env = "LEDGER_CARD_RETRIES",
        value_name = "COUNT",
        default_value_t = 32,
        global = true
    )]
    pub card_retries: u32,

    /// Upper bound on a single ledger transaction, in seconds
    #[arg(
        long = "tx-timeout-secs",
        env = "LEDGER_TX_TIMEOUT_SECS",
        value_name = "SECS",
        default_value_t = 10,
        global = true
    )]
    pub tx_timeout_secs: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Apply an operation log and print the account report
    Replay {
        /// CSV operation log
        #[arg(value_name = "INPUT")]
        input_file: PathBuf,
    },
    /// Run the maintenance scheduler until interrupted
    Run,
    /// Reset stale daily counters now
    Sweep,
    /// Purge ledger rows past the retention window now
    Purge,
    /// Reset every daily counter, stale or not
    ForceReset,
    /// List accounts whose balance diverges from the ledger
    Audit,
    /// Print the account report
    Report {
        /// Emit JSON instead of CSV
        #[arg(long)]
        json: bool,
    },
}

impl CliArgs {
    /// Build the engine configuration from the parsed arguments
    ///
    /// Values are not validated here; `LedgerConfig::validate` runs when the
    /// engine opens.
    pub fn to_config(&self) -> LedgerConfig {
        LedgerConfig {
            timezone: self.timezone,
            reset_time: self.reset_time,
            purge_time: self.purge_time,
            retention_days: self.retention_days,
            default_daily_limit: self.default_daily_limit,
            card_digits: self.card_digits,
            card_retry_cap: self.card_retries,
            tx_timeout: Duration::from_secs(self.tx_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::replay(&["program", "replay", "ops.csv"], Command::Replay { input_file: PathBuf::from("ops.csv") })]
    #[case::run(&["program", "run"], Command::Run)]
    #[case::sweep(&["program", "sweep"], Command::Sweep)]
    #[case::purge(&["program", "purge"], Command::Purge)]
    #[case::force_reset(&["program", "force-reset"], Command::ForceReset)]
    #[case::audit(&["program", "audit"], Command::Audit)]
    #[case::report(&["program", "report"], Command::Report { json: false })]
    #[case::report_json(&["program", "report", "--json"], Command::Report { json: true })]
    fn test_command_parsing(#[case] args: &[&str], #[case] expected: Command) {
        let parsed = CliArgs::try_parse_from(args).unwrap();
        assert_eq!(parsed.command, expected);
    }

    #[test]
    fn test_defaults_match_ledger_config() {
        let parsed = CliArgs::try_parse_from(["program", "sweep"]).unwrap();
        assert_eq!(parsed.database, PathBuf::from("campus-ledger.db"));
        assert_eq!(parsed.to_config(), LedgerConfig::default());
    }

    #[rstest]
    #[case::before_command(&["program", "--card-digits", "6", "--retention-days", "30", "sweep"])]
    #[case::after_command(&["program", "sweep", "--card-digits", "6", "--retention-days", "30"])]
    fn test_global_options(#[case] args: &[&str]) {
        let config = CliArgs::try_parse_from(args).unwrap().to_config();
        assert_eq!(config.card_digits, 6);
        assert_eq!(config.retention_days, 30);
    }

    #[test]
    fn test_time_zone_and_limit_options() {
        let parsed = CliArgs::try_parse_from([
            "program",
            "--timezone",
            "Europe/London",
            "--reset-time",
            "01:30",
            "--default-daily-limit",
            "250.50",
            "--tx-timeout-secs",
            "3",
            "report",
        ])
        .unwrap();
        let config = parsed.to_config();

        assert_eq!(config.timezone, chrono_tz::Europe::London);
        assert_eq!(config.reset_time, NaiveTime::from_hms_opt(1, 30, 0).unwrap());
        assert_eq!(config.default_daily_limit, Some(Decimal::new(25050, 2)));
        assert_eq!(config.tx_timeout, Duration::from_secs(3));
    }

    #[rstest]
    #[case::missing_command(&["program"])]
    #[case::replay_without_input(&["program", "replay"])]
    #[case::bad_time(&["program", "--reset-time", "25:00", "sweep"])]
    #[case::bad_timezone(&["program", "--timezone", "Mars/Olympus", "sweep"])]
    #[case::unknown_command(&["program", "refund"])]
    fn test_invalid_arguments(#[case] args: &[&str]) {
        assert!(CliArgs::try_parse_from(args).is_err());
    }
}
