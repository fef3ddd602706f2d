//! I/O module
//!
//! Handles CSV parsing and output.
//!
//! # Components
//!
//! - `csv_format` - CSV format handling (record conversion, report serialization)
//! - `reader` - Streaming reader over an operation log

pub mod csv_format;
pub mod reader;

pub use csv_format::{convert_csv_record, write_accounts_csv, CsvRecord};
pub use reader::OperationReader;
