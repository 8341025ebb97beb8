//! Batch planning over the loaded record set

use alloy::primitives::Address;
use std::ops::Range;

use crate::csv_loader::Record;
use crate::error::{BatcherError, Result};

/// Contiguous slice of the record set submitted in one `stakeBehalf` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Position of this batch within the plan
    pub index: usize,
    /// Offset of the first record in the full record set
    pub start_offset: usize,
    /// One past the offset of the last record
    pub end_offset: usize,
    pub records: Vec<Record>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.records.iter().map(|r| r.address).collect()
    }

    pub fn range(&self) -> Range<usize> {
        self.start_offset..self.end_offset
    }
}

/// Resolve optional offsets against the record count.
pub fn resolve_range(
    total: usize,
    start_offset: usize,
    end_offset: Option<usize>,
) -> Result<Range<usize>> {
    let end = end_offset.unwrap_or(total);

    if end > total {
        return Err(BatcherError::Config(format!(
            "end offset {} exceeds record count {}",
            end, total
        )));
    }
    if start_offset > end {
        return Err(BatcherError::Config(format!(
            "start offset {} is past end offset {}",
            start_offset, end
        )));
    }

    Ok(start_offset..end)
}

/// Split `records[start_offset..end_offset]` into consecutive batches of at
/// most `batch_size` records, preserving source order.
pub fn plan(
    records: &[Record],
    batch_size: usize,
    start_offset: usize,
    end_offset: Option<usize>,
) -> Result<Vec<Batch>> {
    if batch_size == 0 {
        return Err(BatcherError::Config("batch size must be at least 1".to_string()));
    }

    let range = resolve_range(records.len(), start_offset, end_offset)?;

    let batches = records[range.clone()]
        .chunks(batch_size)
        .enumerate()
        .map(|(index, chunk)| {
            let start = range.start + index * batch_size;
            Batch {
                index,
                start_offset: start,
                end_offset: start + chunk.len(),
                records: chunk.to_vec(),
            }
        })
        .collect();

    Ok(batches)
}
