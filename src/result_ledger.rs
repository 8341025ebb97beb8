//! Append-only per-run result logs
//!
//! Two CSV streams per run, `stake_success_<run_id>.log` and
//! `stake_failed_<run_id>.log`. Every append is flushed and synced before it
//! returns. The failure stream carries an extra `reason` column and both keep
//! an `address,amount` header, so a failure log can be fed back as input.

use csv::WriterBuilder;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::csv_loader::Record;
use crate::error::Result;
use crate::submission::FailureReason;

const SUCCESS_HEADER: &[&str] = &["address", "amount"];
const FAILURE_HEADER: &[&str] = &["address", "amount", "reason"];

#[derive(Debug)]
pub struct ResultLedger {
    success_path: PathBuf,
    failure_path: PathBuf,
    success_records: usize,
    failure_records: usize,
}

impl ResultLedger {
    /// Create the log directory if needed. Files are created on first append.
    pub fn open<P: AsRef<Path>>(dir: P, run_id: &str) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        Ok(Self {
            success_path: dir.join(format!("stake_success_{}.log", run_id)),
            failure_path: dir.join(format!("stake_failed_{}.log", run_id)),
            success_records: 0,
            failure_records: 0,
        })
    }

    pub fn success_path(&self) -> &Path {
        &self.success_path
    }

    pub fn failure_path(&self) -> &Path {
        &self.failure_path
    }

    pub fn success_records(&self) -> usize {
        self.success_records
    }

    pub fn failure_records(&self) -> usize {
        self.failure_records
    }

    pub fn append_success(&mut self, records: &[Record]) -> Result<()> {
        let rows = records
            .iter()
            .map(|r| vec![r.address.to_string(), r.amount.clone()]);

        append_rows(&self.success_path, SUCCESS_HEADER, rows)?;
        self.success_records += records.len();
        Ok(())
    }

    pub fn append_failure(&mut self, records: &[Record], reason: &FailureReason) -> Result<()> {
        let reason = reason.to_string();
        let rows = records
            .iter()
            .map(|r| vec![r.address.to_string(), r.amount.clone(), reason.clone()]);

        append_rows(&self.failure_path, FAILURE_HEADER, rows)?;
        self.failure_records += records.len();
        Ok(())
    }
}

fn append_rows<I>(path: &Path, header: &[&str], rows: I) -> Result<()>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let fresh = file.metadata()?.len() == 0;

    let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
    if fresh {
        writer.write_record(header)?;
    }
    for row in rows {
        writer.write_record(&row)?;
    }

    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_data()?;

    Ok(())
}
