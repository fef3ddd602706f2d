//! Streaming reader over an operation log
//!
//! Yields one [`LedgerOperation`] per CSV row. Delegates CSV format concerns
//! to the csv_format module.
//!
//! ```no_run
//! use campus_card_ledger::io::OperationReader;
//! use std::path::Path;
//!
//! let reader = OperationReader::new(Path::new("operations.csv")).unwrap();
//! for result in reader {
//!     match result {
//!         Ok(operation) => println!("Applying {}", operation.name()),
//!         Err(e) => eprintln!("Error: {}", e),
//!     }
//! }
//! ```
//!
//! # Error Handling
//!
//! - Fatal errors (file not found, I/O errors) are returned from `new()`
//! - Row parsing errors are yielded as Err variants, prefixed with the line number
//!
//! Rows are read one at a time; the log is never loaded into memory whole.

use crate::io::csv_format::{convert_csv_record, CsvRecord};
use crate::types::LedgerOperation;
use csv::{ReaderBuilder, Trim};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Iterator over the operations of a CSV log
#[derive(Debug)]
pub struct OperationReader<R: Read = File> {
    reader: csv::Reader<R>,
    line_num: usize,
}

impl OperationReader<File> {
    /// Open the log at `path`
    ///
    /// The CSV reader trims whitespace from all fields and allows rows with
    /// fewer fields than the header, so trailing empty columns can be left out.
    ///
    /// # Returns
    ///
    /// * `Ok(OperationReader)` if the file opened successfully
    /// * `Err(String)` if the file could not be opened
    pub fn new(path: &Path) -> Result<Self, String> {
        let file = File::open(path)
            .map_err(|e| format!("Failed to open file '{}': {}", path.display(), e))?;
        Ok(Self::from_reader(file))
    }
}

impl<R: Read> OperationReader<R> {
    pub fn from_reader(input: R) -> Self {
        let reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .buffer_capacity(8 * 1024)
            .from_reader(input);

        Self {
            reader,
            line_num: 0,
        }
    }
}

impl<R: Read> Iterator for OperationReader<R> {
    type Item = Result<LedgerOperation, String>;

    /// Read and convert the next row
    ///
    /// Line numbers in errors count the header as line 1.
    fn next(&mut self) -> Option<Self::Item> {
        let mut deserializer = self.reader.deserialize::<CsvRecord>();

        let result = deserializer.next()?;
        self.line_num += 1;
        let line = self.line_num + 1;
        Some(match result {
            Ok(csv_record) => convert_csv_record(csv_record).map_err(|e| format!("Line {line}: {e}")),
            Err(e) => Err(format!("Line {line}: CSV parse error: {e}")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str = "op,member,card,store,settlement,amount,name,group,note\n";

    fn reader(body: &str) -> OperationReader<&[u8]> {
        OperationReader::from_reader(body.as_bytes())
    }

    #[test]
    fn test_new_fails_on_missing_file() {
        let result = OperationReader::new(Path::new("nonexistent.csv"));
        assert!(result.unwrap_err().contains("Failed to open file"));
    }

    #[test]
    fn test_new_opens_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{HEADER}sweep,,,,,,,,\n").unwrap();
        file.flush().unwrap();

        let operations: Vec<_> = OperationReader::new(file.path()).unwrap().collect();
        assert_eq!(operations, vec![Ok(LedgerOperation::DailyReset)]);
    }

    #[test]
    fn test_reads_rows_in_order() {
        let body = format!(
            "{HEADER}\
             issue,1001,,,,,Asha,7-B,\n\
             recharge,1001,,,,500,,,\n\
             debit,1001,,3,,20,,,\n"
        );
        let names: Vec<_> = reader(&body)
            .map(|r| r.map(|op| op.name()))
            .collect();
        assert_eq!(names, vec![Ok("issue"), Ok("recharge"), Ok("debit")]);
    }

    #[test]
    fn test_continues_after_error_with_line_number() {
        let body = format!(
            "{HEADER}\
             recharge,1001,,,,500,,,\n\
             refund,1001,,,,5,,,\n\
             sweep,,,,,,,,\n"
        );
        let results: Vec<_> = reader(&body).collect();

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        let error = results[1].as_ref().unwrap_err();
        assert!(error.contains("Line 3"));
        assert!(error.contains("Invalid operation"));
        assert!(results[2].is_ok());
    }

    #[test]
    fn test_handles_whitespace_and_short_rows() {
        let body = format!("{HEADER}  recharge , 1001 ,, ,, 12.50 \n");
        let results: Vec<_> = reader(&body).collect();

        match &results[0] {
            Ok(LedgerOperation::Recharge(request)) => {
                assert_eq!(request.member_ref, "1001");
                assert_eq!(request.amount, rust_decimal::Decimal::new(1250, 2));
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_store_columns_after_note() {
        let body = "op,member,card,store,settlement,amount,name,group,note,owner,mobile,email\n\
                    store,,,,,,Canteen,food,,Ravi,9000000001,canteen@school.in\n";
        let results: Vec<_> = reader(body).collect();

        match &results[0] {
            Ok(LedgerOperation::RegisterStore(request)) => {
                assert_eq!(request.store_name, "Canteen");
                assert_eq!(request.email, "canteen@school.in");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_empty_log_after_header() {
        assert_eq!(reader(HEADER).count(), 0);
    }
}
