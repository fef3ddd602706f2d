//! Campus Card Ledger CLI
//!
//! # Usage
//!
//! ```bash
//! campus-ledger replay operations.csv > accounts.csv
//! campus-ledger --database ledger.db run
//! campus-ledger --default-daily-limit 300 sweep
//! campus-ledger audit
//! campus-ledger report --json
//! ```
//!
//! Logs go to stderr, filtered by `RUST_LOG` (default
//! `campus_card_ledger=info`). Options may also come from `LEDGER_*`
//! environment variables or a `.env` file.
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 1: Error (bad configuration, database unavailable, diverging accounts in `audit`)

use campus_card_ledger::cli::{self, Command};
use campus_card_ledger::io::OperationReader;
use campus_card_ledger::{write_accounts_csv, LedgerEngine, LedgerError, LedgerEvent};
use std::path::Path;
use std::process;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "campus_card_ledger=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::parse_args();

    let engine = match LedgerEngine::open(&args.database, args.to_config()).await {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!(error = %e, "Failed to open ledger");
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let result = match args.command {
        Command::Replay { input_file } => replay(&engine, &input_file).await,
        Command::Run => run(&engine).await,
        Command::Sweep => engine
            .maintenance()
            .run_daily_reset()
            .await
            .map(|n| println!("Reset {n} account(s)"))
            .map_err(|e| e.to_string()),
        Command::Purge => engine
            .maintenance()
            .run_retention_purge()
            .await
            .map(|report| println!("Purged {} row(s) older than {}", report.total(), report.cutoff))
            .map_err(|e| e.to_string()),
        Command::ForceReset => engine
            .limits()
            .force_reset_all()
            .await
            .map(|n| println!("Reset {n} account(s)"))
            .map_err(|e| e.to_string()),
        Command::Audit => audit(&engine).await,
        Command::Report { json } => report(&engine, json).await,
    };

    engine.close().await;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Apply every operation of the log, skipping the ones that fail
async fn replay(engine: &LedgerEngine, input: &Path) -> Result<(), String> {
    let reader = OperationReader::new(input)?;
    let (mut applied, mut skipped) = (0usize, 0usize);

    for (index, result) in reader.enumerate() {
        let operation = match result {
            Ok(operation) => operation,
            Err(e) => {
                tracing::warn!("{}", e);
                skipped += 1;
                continue;
            }
        };
        let name = operation.name();
        match engine.apply(operation).await {
            Ok(()) => applied += 1,
            Err(e) => {
                // Header is line 1
                tracing::warn!(line = index + 2, op = name, error = %e, "Operation rejected");
                skipped += 1;
            }
        }
    }

    tracing::info!(applied, skipped, "Replay finished");
    report(engine, false).await
}

async fn report(engine: &LedgerEngine, json: bool) -> Result<(), String> {
    let accounts = engine
        .ledger()
        .account_summaries()
        .await
        .map_err(|e| e.to_string())?;
    if json {
        let rendered = serde_json::to_string_pretty(&accounts)
            .map_err(|e| format!("Failed to serialize report: {}", e))?;
        println!("{rendered}");
        Ok(())
    } else {
        write_accounts_csv(&accounts, &mut std::io::stdout())
    }
}

async fn audit(engine: &LedgerEngine) -> Result<(), String> {
    let diverging = engine
        .ledger()
        .audit_balances()
        .await
        .map_err(|e| e.to_string())?;
    for view in &diverging {
        println!(
            "{}: balance {} but ledger derives {}",
            view.member_ref, view.balance, view.derived_balance
        );
    }
    if diverging.is_empty() {
        Ok(())
    } else {
        Err(LedgerError::LedgerDivergence {
            accounts: diverging.len() as u64,
        }
        .to_string())
    }
}

/// Run the scheduler until Ctrl-C
async fn run(engine: &LedgerEngine) -> Result<(), String> {
    let shutdown = CancellationToken::new();
    let scheduler = tokio::spawn(engine.scheduler(shutdown.clone()).run());
    tokio::spawn(log_events(engine.subscribe(), shutdown.clone()));

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("Failed to listen for shutdown signal: {}", e))?;
    tracing::info!("Shutdown requested");
    shutdown.cancel();

    scheduler
        .await
        .map_err(|e| format!("Scheduler task failed: {}", e))
}

/// Log every published event as JSON at debug level
async fn log_events(mut events: broadcast::Receiver<LedgerEvent>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => tracing::debug!(event = %json, "Ledger event"),
                    Err(e) => tracing::warn!(error = %e, "Failed to serialize event"),
                },
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Event log lagging");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown.cancelled() => break,
        }
    }
}
