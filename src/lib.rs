//! Batched stake distribution for an EVM staking contract
//!
//! Reads `address,amount` records from a CSV export and stakes them on behalf
//! of each recipient through `stakeBehalf`, in bounded batches, built on top
//! of Alloy 1.0.38.
//!
//! # Pipeline
//!
//! - Amounts normalized to 18-decimal fixed point before anything is sent
//! - One token approval for the whole run, skipped when the allowance already covers it
//! - Every batch pre-checked against on-chain state with a single Multicall3 read
//! - Each batch outcome appended to a per-run success or failure log before the next batch
//! - Final validation of the whole range once all batches are attempted
//!
//! # Example
//!
//! ```rust,no_run
//! use stake_batcher::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = StakingClient::connect(StakingClientConfig {
//!         rpc_url: "http://127.0.0.1:8545".to_string(),
//!         private_key: "0x...".to_string(),
//!         chain_id: Some(1337),
//!         staking_contract: "0x...".parse().unwrap(),
//!         token_contract: "0x...".parse().unwrap(),
//!         multicall_address: MULTICALL3_ADDRESS,
//!         multicall_chunk_size: 500,
//!         receipt_poll_interval: std::time::Duration::from_secs(2),
//!     })
//!     .await?;
//!
//!     let context = RunContext::new(
//!         client.signer(),
//!         client.staking_contract(),
//!         "0x...".parse().unwrap(),
//!         "hardhat",
//!         "http://127.0.0.1:8545",
//!     )?;
//!
//!     let options = RunOptions {
//!         batch_size: 50,
//!         ..RunOptions::default()
//!     };
//!
//!     let mut coordinator = RunCoordinator::new(client, context, options);
//!     let summary = coordinator.run(&CsvRecordSource::new("stakes.csv")).await?;
//!
//!     println!("{} batches staked, {} failed",
//!              summary.successful_batches, summary.failed_batches);
//!
//!     Ok(())
//! }
//! ```

pub mod amount;
pub mod cli;
pub mod coordinator;
pub mod csv_loader;
pub mod error;
pub mod ledger;
pub mod planner;
pub mod result_ledger;
pub mod settings;
pub mod shutdown;
pub mod staking_client;
pub mod submission;
pub mod validator;

// Re-export commonly used types
pub use coordinator::{ApprovalPolicy, RunContext, RunCoordinator, RunOptions, RunState, RunSummary};
pub use csv_loader::{CsvRecordSource, Record, RecordSource};
pub use error::{BatcherError, LedgerError, Result};
pub use ledger::{
    Confirmation, FeeEstimate, LedgerClient, LedgerResult, RemoteState, StakeCall, StateRead,
};
pub use planner::Batch;
pub use result_ledger::ResultLedger;
pub use settings::{RunConfig, Settings};
pub use staking_client::{StakingClient, StakingClientConfig, MULTICALL3_ADDRESS};
pub use submission::{
    FailureReason, SubmissionEngine, SubmissionOutcome, SubmissionSettings, SubmissionStatus,
};
pub use validator::ValidationReport;

pub use alloy::primitives::{Address, TxHash, U256};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::amount::{to_decimal_string, to_fixed_point};
    pub use crate::coordinator::{
        ApprovalPolicy, RunContext, RunCoordinator, RunOptions, RunState, RunSummary,
    };
    pub use crate::csv_loader::{CsvRecordSource, Record, RecordSource};
    pub use crate::error::{BatcherError, LedgerError, Result};
    pub use crate::ledger::{
        Confirmation, FeeEstimate, LedgerClient, LedgerResult, RemoteState, StakeCall, StateRead,
    };
    pub use crate::planner::{plan, Batch};
    pub use crate::result_ledger::ResultLedger;
    pub use crate::staking_client::{StakingClient, StakingClientConfig, MULTICALL3_ADDRESS};
    pub use crate::submission::{
        FailureReason, SubmissionEngine, SubmissionOutcome, SubmissionSettings, SubmissionStatus,
    };
    pub use crate::validator::{validate, ValidationReport};
    pub use alloy::primitives::{Address, TxHash, U256};
}
