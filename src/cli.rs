//! CLI argument parsing

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::coordinator::ApprovalPolicy;

#[derive(Parser, Debug)]
#[command(name = "stake-batcher")]
#[command(about = "Stake CSV records on behalf of recipients in validated batches", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Settings file (TOML, YAML or JSON); `stake-batcher.*` in the working directory when omitted
    #[arg(long, env = "STAKER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Network entry to use (hardhat, ethereum, sepolia, base or one from the settings file)
    #[arg(short, long, env = "NETWORK", default_value = "hardhat")]
    pub network: String,

    /// RPC endpoint URL, overrides the network entry
    #[arg(short, long, env = "RPC_URL")]
    pub rpc_url: Option<String>,

    /// Private key for signing transactions
    #[arg(short = 'k', long, env = "PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<String>,

    /// Staking contract address
    #[arg(long, env = "STAKING_CONTRACT")]
    pub staking_contract: Option<String>,

    /// Staking token (ERC-20) address
    #[arg(long, env = "TOKEN_CONTRACT")]
    pub token_contract: Option<String>,

    /// CSV file with `address` and `amount` columns
    #[arg(short, long, env = "CSV_PATH")]
    pub csv: Option<PathBuf>,

    /// Records per stakeBehalf call
    #[arg(short = 'b', long)]
    pub batch_size: Option<usize>,

    /// First record offset to stake
    #[arg(long)]
    pub start: Option<usize>,

    /// Record offset to stop before
    #[arg(long)]
    pub end: Option<usize>,

    /// Allowance to grant the staking contract
    #[arg(long, value_enum)]
    pub approval: Option<ApprovalPolicy>,

    /// Seconds to wait for a batch transaction to be included
    #[arg(long)]
    pub confirmation_timeout: Option<u64>,

    /// Skip batches whose projected fee exceeds this amount of native currency (e.g. 0.05)
    #[arg(long)]
    pub max_cost_per_batch: Option<String>,

    /// Directory for the per-run result logs
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Validate and quote batches without approving or submitting
    #[arg(long)]
    pub dry_run: bool,

    /// Summary output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}
