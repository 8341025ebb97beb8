//! Stake record loading from CSV exports

use alloy::primitives::Address;
use csv::{ReaderBuilder, Trim};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{BatcherError, Result};

/// Raw CSV row. Extra columns are ignored.
#[derive(Debug, Deserialize)]
struct StakeRow {
    address: String,
    amount: String,
}

/// One recipient and the decimal amount staked on its behalf
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    pub address: Address,
    pub amount: String,
}

/// Anything that can produce the ordered record set for a run
pub trait RecordSource {
    fn load(&self) -> Result<Vec<Record>>;
}

impl RecordSource for Vec<Record> {
    fn load(&self) -> Result<Vec<Record>> {
        Ok(self.clone())
    }
}

/// CSV file with `address` and `amount` header columns
#[derive(Debug, Clone)]
pub struct CsvRecordSource {
    path: PathBuf,
}

impl CsvRecordSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse records from any reader. A single malformed row fails the whole load.
    pub fn parse_reader<R: Read>(reader: R) -> Result<Vec<Record>> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(Trim::All)
            .from_reader(reader);

        let mut records = Vec::new();

        for (index, row) in reader.deserialize::<StakeRow>().enumerate() {
            // header is line 1
            let line = index + 2;
            let row = row.map_err(|e| BatcherError::SourceRead(format!("line {}: {}", line, e)))?;

            let address: Address = row.address.parse().map_err(|e| {
                BatcherError::SourceRead(format!(
                    "line {}: invalid address {:?}: {}",
                    line, row.address, e
                ))
            })?;

            if row.amount.is_empty() {
                return Err(BatcherError::SourceRead(format!(
                    "line {}: empty amount for {}",
                    line, address
                )));
            }

            records.push(Record {
                address,
                amount: row.amount,
            });
        }

        Ok(records)
    }
}

impl RecordSource for CsvRecordSource {
    fn load(&self) -> Result<Vec<Record>> {
        let file = std::fs::File::open(&self.path).map_err(|e| {
            BatcherError::SourceRead(format!("failed to open {}: {}", self.path.display(), e))
        })?;

        let records = Self::parse_reader(file)?;
        tracing::info!("Loaded {} stake records from {}", records.len(), self.path.display());

        Ok(records)
    }
}
