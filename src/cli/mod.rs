// CLI module
// Command-line interface and argument parsing

mod args;

pub use args::{CliArgs, Command};

use clap::Parser;

/// Parse command-line arguments using clap
///
/// Every global option can also be set through its `LEDGER_*` environment
/// variable. If parsing fails (invalid arguments, missing subcommand, or
/// --help), clap displays an error or help text and exits the process.
pub fn parse_args() -> CliArgs {
    CliArgs::parse()
}
