//! Run orchestration
//!
//! ```text
//! Init -> Loading -> Approving -> { Validating <-> Submitting }* -> FinalValidating -> Done
//! ```
//!
//! Any fatal error moves the run to `Aborted`. Inside the batch loop only a
//! validation mismatch or the contract being paused aborts; failed
//! submissions are logged and the loop moves on. Once the loop is over,
//! remote read failures are reported as unknown results and never abort.

use alloy::primitives::{utils::format_ether, Address, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::amount::{self, to_fixed_point};
use crate::csv_loader::{Record, RecordSource};
use crate::error::{BatcherError, Result};
use crate::ledger::LedgerClient;
use crate::planner::{self, Batch};
use crate::result_ledger::ResultLedger;
use crate::submission::{SubmissionEngine, SubmissionSettings};
use crate::validator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Init,
    Loading,
    Approving,
    Validating,
    Submitting,
    FinalValidating,
    Done,
    Aborted,
}

/// How much token allowance to grant the staking contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalPolicy {
    /// Exactly the sum of the planned amounts
    #[default]
    Exact,
    /// The signer's whole token balance
    FullBalance,
}

/// Process-scoped identity of a run
#[derive(Debug, Clone)]
pub struct RunContext {
    pub signer: Address,
    pub staking_contract: Address,
    pub token_contract: Address,
    pub network: String,
    pub rpc_url: String,
    pub started_at: DateTime<Utc>,
    /// Derived from `started_at`; names the result logs
    pub run_id: String,
}

impl RunContext {
    pub fn new(
        signer: Address,
        staking_contract: Address,
        token_contract: Address,
        network: impl Into<String>,
        rpc_url: impl Into<String>,
    ) -> Result<Self> {
        if signer == Address::ZERO {
            return Err(BatcherError::Config("signing key is required".to_string()));
        }
        if staking_contract == Address::ZERO {
            return Err(BatcherError::Config("staking contract address is required".to_string()));
        }
        if token_contract == Address::ZERO {
            return Err(BatcherError::Config("token contract address is required".to_string()));
        }

        let started_at = Utc::now();

        Ok(Self {
            signer,
            staking_contract,
            token_contract,
            network: network.into(),
            rpc_url: rpc_url.into(),
            run_id: started_at.format("%Y%m%dT%H%M%S%.3fZ").to_string(),
            started_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub batch_size: usize,
    pub start_offset: usize,
    pub end_offset: Option<usize>,
    pub approval: ApprovalPolicy,
    /// Plan, validate and quote only
    pub dry_run: bool,
    pub log_dir: PathBuf,
    pub submission: SubmissionSettings,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            batch_size: 1,
            start_offset: 0,
            end_offset: None,
            approval: ApprovalPolicy::default(),
            dry_run: false,
            log_dir: PathBuf::from("logs"),
            submission: SubmissionSettings::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub final_state: RunState,
    pub abort_reason: Option<String>,
    pub total_records: usize,
    pub planned_batches: usize,
    pub successful_batches: usize,
    pub failed_batches: usize,
    /// Batches never attempted because the run was stopped
    pub skipped_batches: usize,
    pub final_validation_passed: Option<bool>,
    pub final_validation_unknown: usize,
    pub total_fees_paid: U256,
    pub start_native_balance: U256,
    pub end_native_balance: Option<U256>,
    pub start_token_balance: U256,
    pub end_token_balance: Option<U256>,
    pub success_log: Option<PathBuf>,
    pub failure_log: Option<PathBuf>,
}

impl RunSummary {
    fn new(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            final_state: RunState::Init,
            abort_reason: None,
            total_records: 0,
            planned_batches: 0,
            successful_batches: 0,
            failed_batches: 0,
            skipped_batches: 0,
            final_validation_passed: None,
            final_validation_unknown: 0,
            total_fees_paid: U256::ZERO,
            start_native_balance: U256::ZERO,
            end_native_balance: None,
            start_token_balance: U256::ZERO,
            end_token_balance: None,
            success_log: None,
            failure_log: None,
        }
    }

    /// 0 when the run reached `Done`, even with failed batches
    pub fn exit_code(&self) -> i32 {
        match self.final_state {
            RunState::Done => 0,
            _ => 1,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "run_id": self.run_id,
            "final_state": self.final_state,
            "abort_reason": self.abort_reason,
            "total_records": self.total_records,
            "planned_batches": self.planned_batches,
            "successful_batches": self.successful_batches,
            "failed_batches": self.failed_batches,
            "skipped_batches": self.skipped_batches,
            "final_validation_passed": self.final_validation_passed,
            "final_validation_unknown": self.final_validation_unknown,
            "total_fees_paid": format_ether(self.total_fees_paid),
            "start_native_balance": format_ether(self.start_native_balance),
            "end_native_balance": self.end_native_balance.map(format_ether),
            "start_token_balance": amount::to_decimal_string(self.start_token_balance),
            "end_token_balance": self.end_token_balance.map(amount::to_decimal_string),
            "success_log": self.success_log,
            "failure_log": self.failure_log,
        })
    }
}

pub struct RunCoordinator<L> {
    remote: L,
    context: RunContext,
    options: RunOptions,
    engine: SubmissionEngine,
    cancel: CancellationToken,
    state: RunState,
    summary: RunSummary,
}

impl<L: LedgerClient> RunCoordinator<L> {
    pub fn new(remote: L, context: RunContext, options: RunOptions) -> Self {
        let engine = SubmissionEngine::new(options.submission.clone());
        let summary = RunSummary::new(&context.run_id);

        Self {
            remote,
            context,
            options,
            engine,
            cancel: CancellationToken::new(),
            state: RunState::Init,
            summary,
        }
    }

    /// Stop signal, honoured between batches only
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn remote(&self) -> &L {
        &self.remote
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// Drive the whole pipeline. Returns the summary of a run that reached
    /// `Done`; any fatal error leaves the coordinator `Aborted` and is returned.
    pub async fn run<S>(&mut self, source: &S) -> Result<RunSummary>
    where
        S: RecordSource + ?Sized,
    {
        match self.drive(source).await {
            Ok(()) => {
                self.transition(RunState::Done);
                self.summary.final_state = RunState::Done;
                info!(
                    "Run {} done: {} succeeded, {} failed, {} skipped of {} batches",
                    self.context.run_id,
                    self.summary.successful_batches,
                    self.summary.failed_batches,
                    self.summary.skipped_batches,
                    self.summary.planned_batches
                );
                Ok(self.summary.clone())
            }
            Err(err) => {
                error!("Run {} aborted in {:?}: {}", self.context.run_id, self.state, err);
                self.transition(RunState::Aborted);
                self.summary.final_state = RunState::Aborted;
                self.summary.abort_reason = Some(err.to_string());
                Err(err)
            }
        }
    }

    fn transition(&mut self, next: RunState) {
        if self.state != next {
            tracing::debug!("Run state {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    async fn drive<S>(&mut self, source: &S) -> Result<()>
    where
        S: RecordSource + ?Sized,
    {
        self.init().await?;

        self.transition(RunState::Loading);
        let records = source.load()?;
        let requested = records
            .iter()
            .map(|r| to_fixed_point(&r.amount))
            .collect::<Result<Vec<_>>>()?;
        let range = planner::resolve_range(
            records.len(),
            self.options.start_offset,
            self.options.end_offset,
        )?;
        let batches = planner::plan(
            &records,
            self.options.batch_size,
            self.options.start_offset,
            self.options.end_offset,
        )?;

        self.summary.total_records = records.len();
        self.summary.planned_batches = batches.len();
        info!(
            "Planned {} batches of up to {} for records {}..{} of {}",
            batches.len(),
            self.options.batch_size,
            range.start,
            range.end,
            records.len()
        );

        let mut ledger = ResultLedger::open(&self.options.log_dir, &self.context.run_id)?;
        self.summary.success_log = Some(ledger.success_path().to_path_buf());
        self.summary.failure_log = Some(ledger.failure_path().to_path_buf());

        self.transition(RunState::Approving);
        let required = amount::total(&requested[range.clone()]);
        self.approve(required).await?;

        self.batch_loop(&batches, &mut ledger).await?;

        self.transition(RunState::FinalValidating);
        self.final_validation(&records[range.clone()], &requested[range])
            .await?;

        self.snapshot_end_balances().await;
        self.log_balances();

        Ok(())
    }

    async fn init(&mut self) -> Result<()> {
        self.transition(RunState::Init);

        let signer = self.remote.signer();
        if signer != self.context.signer {
            return Err(BatcherError::Config(format!(
                "ledger client signs as {} but run context expects {}",
                signer, self.context.signer
            )));
        }
        if self.remote.staking_contract() != self.context.staking_contract {
            return Err(BatcherError::Config(format!(
                "ledger client targets {} but run context expects {}",
                self.remote.staking_contract(),
                self.context.staking_contract
            )));
        }

        if self.remote.is_paused().await? {
            return Err(BatcherError::ContractPaused(self.context.staking_contract));
        }

        self.summary.start_native_balance = self.remote.native_balance(signer).await?;
        self.summary.start_token_balance = self.remote.token_balance(signer).await?;

        info!(
            "Run {} started by {} on {}: native balance {}, token balance {}",
            self.context.run_id,
            signer,
            self.context.network,
            format_ether(self.summary.start_native_balance),
            amount::to_decimal_string(self.summary.start_token_balance)
        );

        Ok(())
    }

    async fn approve(&mut self, required: U256) -> Result<()> {
        let signer = self.context.signer;
        let target = match self.options.approval {
            ApprovalPolicy::Exact => required,
            ApprovalPolicy::FullBalance => self.summary.start_token_balance,
        };

        if target < required {
            warn!(
                "Approval target {} is below the {} required by this run",
                amount::to_decimal_string(target),
                amount::to_decimal_string(required)
            );
        }

        let current = self.remote.allowance(signer).await?;
        if current >= target {
            info!(
                "Existing allowance {} covers {}, skipping approval",
                amount::to_decimal_string(current),
                amount::to_decimal_string(target)
            );
            return Ok(());
        }

        if self.options.dry_run {
            info!(
                "Dry run: would approve {} for {}",
                amount::to_decimal_string(target),
                self.context.staking_contract
            );
            return Ok(());
        }

        info!(
            "Approving {} for staking contract {}",
            amount::to_decimal_string(target),
            self.context.staking_contract
        );
        self.remote.approve(target).await?;

        Ok(())
    }

    async fn batch_loop(&mut self, batches: &[Batch], ledger: &mut ResultLedger) -> Result<()> {
        for (position, batch) in batches.iter().enumerate() {
            if self.cancel.is_cancelled() {
                self.summary.skipped_batches = batches.len() - position;
                warn!(
                    "Stop requested, skipping {} remaining batches from offset {}",
                    self.summary.skipped_batches, batch.start_offset
                );
                break;
            }

            if self.remote.is_paused().await? {
                return Err(BatcherError::ContractPaused(self.context.staking_contract));
            }

            self.transition(RunState::Validating);
            let zeros = vec![U256::ZERO; batch.len()];
            let report = validator::validate(&batch.addresses(), &zeros, &self.remote).await?;
            if !report.is_complete() {
                warn!(
                    "Batch {}: {} stakers could not be pre-checked",
                    batch.index,
                    report.unknown.len()
                );
            }

            self.transition(RunState::Submitting);

            if self.options.dry_run {
                match self.engine.project_cost(batch, &self.remote).await? {
                    Ok(fee) => info!(
                        "Dry run: batch {} would cost {} ({} gas)",
                        batch.index,
                        format_ether(fee.total_cost()),
                        fee.gas_units
                    ),
                    Err(e) => warn!("Dry run: batch {} fee estimate failed: {}", batch.index, e),
                }
                continue;
            }

            let outcome = self.engine.submit(batch, &self.remote, ledger).await?;
            if let Some(fee) = outcome.fee_paid() {
                self.summary.total_fees_paid = self.summary.total_fees_paid.saturating_add(fee);
            }
            if outcome.is_success() {
                self.summary.successful_batches += 1;
            } else {
                self.summary.failed_batches += 1;
            }
        }

        Ok(())
    }

    async fn final_validation(&mut self, records: &[Record], requested: &[U256]) -> Result<()> {
        if self.options.dry_run {
            info!("Dry run: skipping final validation");
            return Ok(());
        }

        let addresses: Vec<Address> = records.iter().map(|r| r.address).collect();

        match validator::validate(&addresses, requested, &self.remote).await {
            Ok(report) => {
                self.summary.final_validation_passed = Some(true);
                self.summary.final_validation_unknown = report.unknown.len();
                info!(
                    "Final validation passed: {} stakes match, {} unreadable",
                    report.matched,
                    report.unknown.len()
                );
                Ok(())
            }
            Err(BatcherError::ValidationMismatch {
                address,
                expected,
                actual,
            }) => {
                self.summary.final_validation_passed = Some(false);
                error!(
                    "Final validation mismatch for {}: expected {}, actual {}",
                    address, expected, actual
                );
                Ok(())
            }
            Err(BatcherError::Ledger(e)) => {
                self.summary.final_validation_passed = None;
                self.summary.final_validation_unknown = addresses.len();
                warn!(
                    "Final validation could not read {} stakes, result unknown: {}",
                    addresses.len(),
                    e
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Read failures leave the end balances unknown.
    async fn snapshot_end_balances(&mut self) {
        let signer = self.context.signer;

        match self.remote.native_balance(signer).await {
            Ok(balance) => self.summary.end_native_balance = Some(balance),
            Err(e) => warn!("Could not read end native balance: {}", e),
        }
        match self.remote.token_balance(signer).await {
            Ok(balance) => self.summary.end_token_balance = Some(balance),
            Err(e) => warn!("Could not read end token balance: {}", e),
        }
    }

    fn log_balances(&self) {
        let s = &self.summary;
        info!(
            "Native balance {} -> {}, token balance {} -> {}, fees paid {}",
            format_ether(s.start_native_balance),
            s.end_native_balance
                .map(format_ether)
                .unwrap_or_else(|| "?".to_string()),
            amount::to_decimal_string(s.start_token_balance),
            s.end_token_balance
                .map(amount::to_decimal_string)
                .unwrap_or_else(|| "?".to_string()),
            format_ether(s.total_fees_paid)
        );
    }
}
