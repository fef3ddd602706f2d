//! Campus Card Ledger Library
//! # Overview
//!
//! Prepaid campus-card accounting: members carry a card, an administrator
//! recharges their balance, merchants debit it at the point of sale, and
//! merchants draw their takings through settlements.
//!
//! # Architecture
//!
//! The system is organized into several key components:
//!
//! - [`types`] - Core data types (members, cards, ledger rows, settlements, errors)
//! - [`config`] - Engine configuration
//! - [`db`] - SQLite pool and migrations
//! - [`core`] - Business logic components:
//!   - [`core::cards`] - Card issue, activation and scan resolution
//!   - [`core::ledger`] - Recharges and debits
//!   - [`core::daily_limit`] - Daily spending limits and their reset
//!   - [`core::settlement`] - Merchant settlement state machine
//!   - [`core::maintenance`] - Scheduled sweep and retention purge
//!   - [`core::engine`] - Facade over all of the above
//! - [`io`] - Operation log reading and account report output
//! - [`cli`] - CLI arguments parsing
//!
//! # Invariants
//!
//! - A member holds at most one active card; card numbers are unique.
//! - A balance never goes negative and always equals
//!   `opening_balance + sum(recharges) - sum(completed transactions)`.
//! - Debits on one calendar day (in the configured timezone) never exceed
//!   the member's effective daily limit.
//! - A store's pending pool plus its open settlements never exceed what its
//!   debits earned.

// Module declarations
pub mod cli;
pub mod config;
pub mod core;
pub mod db;
pub mod io;
pub mod types;

pub use config::LedgerConfig;
pub use core::{Clock, LedgerEngine, ManualClock, SystemClock};
pub use io::write_accounts_csv;
pub use types::{ErrorKind, LedgerError, LedgerEvent, LedgerOperation, LedgerResult};
