//! Core business logic module
//!
//! This module contains the ledger components:
//! - `cards` - Card issue, activation and scan resolution
//! - `ledger` - Recharges, debits and balance reads
//! - `daily_limit` - Daily spending limits and their reset
//! - `settlement` - Merchant settlement state machine
//! - `maintenance` - Scheduled sweep and retention purge
//! - `engine` - Facade wiring the components together
//! - `clock`, `events`, `context` - Shared handles

pub mod cards;
pub mod clock;
pub mod context;
pub mod daily_limit;
pub mod engine;
pub mod events;
pub mod ledger;
pub mod maintenance;
pub mod settlement;

pub use cards::CardManager;
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::LedgerContext;
pub use daily_limit::{DailyLimits, DailyResetStatus};
pub use engine::LedgerEngine;
pub use events::EventBus;
pub use ledger::BalanceLedger;
pub use maintenance::{Maintenance, MaintenanceScheduler, PurgeReport};
pub use settlement::Settlements;
