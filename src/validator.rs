//! Preflight validation of on-chain stake state
//!
//! Reads the stake of every address with one aggregated call and compares it
//! with the expected amount. Before a batch the expectation is zero, which
//! catches double submission; after the run it is the requested amount.
//! Individual read failures are tolerated and reported as unknown, but the
//! first confirmed mismatch aborts the check.

use alloy::primitives::{Address, U256};
use tracing::{debug, warn};

use crate::amount::to_decimal_string;
use crate::error::{BatcherError, Result};
use crate::ledger::{LedgerClient, StateRead};

/// Summary of a passed validation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Entries whose state was read and matched
    pub matched: usize,
    /// Entries whose state could not be read
    pub unknown: Vec<Address>,
}

impl ValidationReport {
    pub fn is_complete(&self) -> bool {
        self.unknown.is_empty()
    }
}

pub async fn validate<L>(
    addresses: &[Address],
    expected: &[U256],
    remote: &L,
) -> Result<ValidationReport>
where
    L: LedgerClient + ?Sized,
{
    if addresses.len() != expected.len() {
        return Err(BatcherError::ShapeMismatch {
            addresses: addresses.len(),
            amounts: expected.len(),
        });
    }

    let states = remote.batch_read_state(addresses).await?;
    let mut report = ValidationReport::default();

    for (address, expected) in addresses.iter().zip(expected) {
        match states.get(address) {
            Some(StateRead::State(state)) => {
                if state.amount != *expected {
                    return Err(BatcherError::ValidationMismatch {
                        address: *address,
                        expected: to_decimal_string(*expected),
                        actual: to_decimal_string(state.amount),
                    });
                }
                report.matched += 1;
            }
            Some(StateRead::Failed(reason)) => {
                warn!("Stake state read failed for {}: {}", address, reason);
                report.unknown.push(*address);
            }
            None => {
                warn!("Stake state missing from batched read for {}", address);
                report.unknown.push(*address);
            }
        }
    }

    debug!(
        "Validated {} addresses: {} matched, {} unknown",
        addresses.len(),
        report.matched,
        report.unknown.len()
    );

    Ok(report)
}
