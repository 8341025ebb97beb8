//! Per-batch submission: fee projection, broadcast, confirmation, outcome logging

use alloy::primitives::{utils::format_ether, TxHash, U256};
use std::fmt;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::amount::to_fixed_point;
use crate::error::{LedgerError, Result};
use crate::ledger::{Confirmation, FeeEstimate, LedgerClient, LedgerResult, StakeCall};
use crate::planner::Batch;
use crate::result_ledger::ResultLedger;

/// Why a batch was not applied. All of these are recoverable for the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Network(String),
    Reverted(String),
    Timeout,
    PermissionDenied(String),
    CostCapExceeded { projected: U256, cap: U256 },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Network(msg) => write!(f, "Network: {}", msg),
            FailureReason::Reverted(msg) => write!(f, "Reverted: {}", msg),
            FailureReason::Timeout => write!(f, "Timeout"),
            FailureReason::PermissionDenied(msg) => write!(f, "PermissionDenied: {}", msg),
            FailureReason::CostCapExceeded { projected, cap } => write!(
                f,
                "CostCapExceeded: projected {} exceeds cap {}",
                format_ether(*projected),
                format_ether(*cap)
            ),
        }
    }
}

impl From<LedgerError> for FailureReason {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Transport(msg) | LedgerError::Decode(msg) => FailureReason::Network(msg),
            LedgerError::Reverted(msg) => FailureReason::Reverted(msg),
            LedgerError::PermissionDenied(msg) => FailureReason::PermissionDenied(msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionStatus {
    Success,
    Failed(FailureReason),
}

/// Immutable record of one submission attempt
#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
    pub batch: Batch,
    pub tx_hash: Option<TxHash>,
    pub status: SubmissionStatus,
    /// Effective gas price when confirmed, quoted price otherwise
    pub gas_price: Option<u128>,
    pub gas_used: Option<u64>,
}

impl SubmissionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, SubmissionStatus::Success)
    }

    pub fn failure_reason(&self) -> Option<&FailureReason> {
        match &self.status {
            SubmissionStatus::Failed(reason) => Some(reason),
            SubmissionStatus::Success => None,
        }
    }

    /// Fee actually paid, when known
    pub fn fee_paid(&self) -> Option<U256> {
        match (self.gas_price, self.gas_used) {
            (Some(price), Some(used)) => Some(U256::from(price) * U256::from(used)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubmissionSettings {
    /// Upper bound on waiting for inclusion
    pub confirmation_timeout: Duration,
    /// Fixed gas price in wei instead of network pricing
    pub gas_price_override: Option<u128>,
    /// Extra gas limit on top of the estimate, in percent
    pub gas_limit_headroom_percent: u64,
    /// Skip batches whose projected cost exceeds this many wei
    pub max_cost_per_batch: Option<U256>,
}

impl Default for SubmissionSettings {
    fn default() -> Self {
        Self {
            confirmation_timeout: Duration::from_secs(300),
            gas_price_override: None,
            gas_limit_headroom_percent: 20,
            max_cost_per_batch: None,
        }
    }
}

#[derive(Default)]
struct Attempt {
    tx_hash: Option<TxHash>,
    gas_price: Option<u128>,
    gas_used: Option<u64>,
}

pub struct SubmissionEngine {
    settings: SubmissionSettings,
}

impl SubmissionEngine {
    pub fn new(settings: SubmissionSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SubmissionSettings {
        &self.settings
    }

    /// Build the mutating call for a batch. Amount errors are fatal for the run.
    pub fn build_call(&self, batch: &Batch) -> Result<StakeCall> {
        let amounts = batch
            .records
            .iter()
            .map(|r| to_fixed_point(&r.amount))
            .collect::<Result<Vec<_>>>()?;

        let mut call = StakeCall::new(batch.addresses(), amounts);
        call.gas_price = self.settings.gas_price_override;
        Ok(call)
    }

    /// Quote the batch without submitting it.
    pub async fn project_cost<L>(&self, batch: &Batch, remote: &L) -> Result<LedgerResult<FeeEstimate>>
    where
        L: LedgerClient + ?Sized,
    {
        let call = self.build_call(batch)?;
        Ok(remote.estimate_fee(&call).await)
    }

    /// Submit one batch and persist its outcome before returning.
    ///
    /// Remote failures become [`SubmissionStatus::Failed`]; only amount and
    /// result log errors are returned as `Err`.
    pub async fn submit<L>(
        &self,
        batch: &Batch,
        remote: &L,
        ledger: &mut ResultLedger,
    ) -> Result<SubmissionOutcome>
    where
        L: LedgerClient + ?Sized,
    {
        let mut call = self.build_call(batch)?;
        let mut attempt = Attempt::default();

        info!(
            "Staking batch {} (records {}..{}, {} stakers)",
            batch.index,
            batch.start_offset,
            batch.end_offset,
            batch.len()
        );

        let status = match self.execute(batch, &mut call, remote, &mut attempt).await {
            Ok(()) => {
                ledger.append_success(&batch.records)?;
                SubmissionStatus::Success
            }
            Err(reason) => {
                error!("Batch {} failed: {}", batch.index, reason);
                ledger.append_failure(&batch.records, &reason)?;
                SubmissionStatus::Failed(reason)
            }
        };

        Ok(SubmissionOutcome {
            batch: batch.clone(),
            tx_hash: attempt.tx_hash,
            status,
            gas_price: attempt.gas_price,
            gas_used: attempt.gas_used,
        })
    }

    async fn execute<L>(
        &self,
        batch: &Batch,
        call: &mut StakeCall,
        remote: &L,
        attempt: &mut Attempt,
    ) -> std::result::Result<(), FailureReason>
    where
        L: LedgerClient + ?Sized,
    {
        let fee = remote.estimate_fee(call).await?;
        let projected = fee.total_cost();
        attempt.gas_price = Some(fee.gas_price);

        info!(
            "Batch {} projected cost: {} (gas price {} wei x {} gas)",
            batch.index,
            format_ether(projected),
            fee.gas_price,
            fee.gas_units
        );

        if let Some(cap) = self.settings.max_cost_per_batch {
            if projected > cap {
                return Err(FailureReason::CostCapExceeded { projected, cap });
            }
        }

        call.gas_limit = Some(with_headroom(fee.gas_units, self.settings.gas_limit_headroom_percent));

        let tx_hash = remote.submit(call).await?;
        attempt.tx_hash = Some(tx_hash);
        info!("Batch {} submitted: 0x{}", batch.index, hex::encode(tx_hash));

        let confirmation = tokio::time::timeout(
            self.settings.confirmation_timeout,
            remote.await_confirmation(tx_hash),
        )
        .await;

        match confirmation {
            Err(_) => {
                warn!(
                    "Batch {} not confirmed within {:?}: 0x{}",
                    batch.index,
                    self.settings.confirmation_timeout,
                    hex::encode(tx_hash)
                );
                Err(FailureReason::Timeout)
            }
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(Confirmation::TimedOut)) => Err(FailureReason::Timeout),
            Ok(Ok(Confirmation::Reverted { gas_used })) => {
                attempt.gas_used = Some(gas_used);
                Err(FailureReason::Reverted(format!(
                    "transaction 0x{} reverted",
                    hex::encode(tx_hash)
                )))
            }
            Ok(Ok(Confirmation::Confirmed {
                gas_used,
                effective_gas_price,
                block_number,
            })) => {
                attempt.gas_used = Some(gas_used);
                attempt.gas_price = Some(effective_gas_price);
                info!(
                    "Batch {} confirmed in block {}: {} gas, fee {}",
                    batch.index,
                    block_number.map_or_else(|| "?".to_string(), |n| n.to_string()),
                    gas_used,
                    format_ether(U256::from(effective_gas_price) * U256::from(gas_used))
                );
                Ok(())
            }
        }
    }
}

/// `units` plus `percent` percent, saturating.
fn with_headroom(units: u64, percent: u64) -> u64 {
    let extra = (units as u128 * percent as u128) / 100;
    u64::try_from(units as u128 + extra).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_headroom() {
        assert_eq!(with_headroom(100_000, 20), 120_000);
        assert_eq!(with_headroom(100_000, 0), 100_000);
        assert_eq!(with_headroom(u64::MAX, 50), u64::MAX);
    }

    #[test]
    fn test_failure_reason_from_ledger_error() {
        assert_eq!(
            FailureReason::from(LedgerError::PermissionDenied("owner only".into())),
            FailureReason::PermissionDenied("owner only".into())
        );
        assert_eq!(
            FailureReason::from(LedgerError::Transport("reset".into())),
            FailureReason::Network("reset".into())
        );
        assert!(matches!(
            FailureReason::from(LedgerError::Reverted("x".into())),
            FailureReason::Reverted(_)
        ));
    }

    #[test]
    fn test_failure_reason_display() {
        assert_eq!(FailureReason::Timeout.to_string(), "Timeout");
        let cap = FailureReason::CostCapExceeded {
            projected: U256::from(2_000_000_000_000_000u64),
            cap: U256::from(1_000_000_000_000_000u64),
        };
        let text = cap.to_string();
        assert!(text.starts_with("CostCapExceeded: projected 0.002"));
        assert!(text.contains("exceeds cap 0.001"));
    }
}
