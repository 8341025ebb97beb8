//! Configuration management
//!
//! Precedence, lowest first: built-in network table, settings file,
//! `STAKER_*` environment variables (nested keys separated by `__`, e.g.
//! `STAKER_BATCH__SIZE`), then command line flags and their plain env
//! fallbacks (`RPC_URL`, `PRIVATE_KEY`, ...).

use alloy::primitives::{Address, U256};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::amount::to_fixed_point;
use crate::cli::Cli;
use crate::coordinator::{ApprovalPolicy, RunOptions};
use crate::error::{BatcherError, Result};
use crate::staking_client::{StakingClientConfig, MULTICALL3_ADDRESS};
use crate::submission::SubmissionSettings;

const GWEI: u64 = 1_000_000_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NetworkConfig {
    pub rpc_url: Option<String>,
    pub chain_id: Option<u64>,
    /// Fixed gas price in wei
    pub gas_price_wei: Option<u64>,
}

impl NetworkConfig {
    /// Fields set in `self` win over `base`.
    fn over(self, base: NetworkConfig) -> NetworkConfig {
        NetworkConfig {
            rpc_url: self.rpc_url.or(base.rpc_url),
            chain_id: self.chain_id.or(base.chain_id),
            gas_price_wei: self.gas_price_wei.or(base.gas_price_wei),
        }
    }
}

/// Networks known without a settings file
pub fn builtin_network(name: &str) -> Option<NetworkConfig> {
    match name {
        "hardhat" | "localhost" => Some(NetworkConfig {
            rpc_url: Some("http://127.0.0.1:8545".to_string()),
            chain_id: Some(1337),
            gas_price_wei: None,
        }),
        "ethereum" | "mainnet" => Some(NetworkConfig {
            rpc_url: None,
            chain_id: Some(1),
            gas_price_wei: Some(10 * GWEI),
        }),
        "sepolia" => Some(NetworkConfig {
            rpc_url: None,
            chain_id: Some(11_155_111),
            gas_price_wei: Some(GWEI),
        }),
        "base" => Some(NetworkConfig {
            rpc_url: None,
            chain_id: Some(8453),
            gas_price_wei: None,
        }),
        _ => None,
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContractsConfig {
    pub staking: Option<String>,
    pub token: Option<String>,
    pub multicall: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub size: usize,
    pub start: usize,
    pub end: Option<usize>,
    pub approval: ApprovalPolicy,
    pub log_dir: PathBuf,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: 1,
            start: 0,
            end: None,
            approval: ApprovalPolicy::Exact,
            log_dir: PathBuf::from("logs"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SubmissionConfig {
    pub confirmation_timeout_secs: u64,
    pub gas_limit_headroom_percent: u64,
    /// Native currency amount, e.g. "0.05"
    pub max_cost_per_batch: Option<String>,
    pub receipt_poll_interval_ms: u64,
    pub multicall_chunk_size: usize,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout_secs: 300,
            gas_limit_headroom_percent: 20,
            max_cost_per_batch: None,
            receipt_poll_interval_ms: 2_000,
            multicall_chunk_size: 500,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub networks: HashMap<String, NetworkConfig>,
    pub contracts: ContractsConfig,
    pub batch: BatchConfig,
    pub submission: SubmissionConfig,
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let builder = config::Config::builder();
        let builder = match path {
            Some(path) => builder.add_source(config::File::from(path)),
            None => builder.add_source(config::File::with_name("stake-batcher").required(false)),
        };

        let settings: Settings = builder
            .add_source(
                config::Environment::with_prefix("STAKER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| BatcherError::Config(format!("Failed to load settings: {}", e)))?;

        Ok(settings)
    }

    /// Settings file entry merged over the built-in entry of the same name
    pub fn network(&self, name: &str) -> Option<NetworkConfig> {
        match (self.networks.get(name).cloned(), builtin_network(name)) {
            (Some(file), Some(builtin)) => Some(file.over(builtin)),
            (Some(file), None) => Some(file),
            (None, builtin) => builtin,
        }
    }
}

/// Fully resolved run configuration
#[derive(Clone)]
pub struct RunConfig {
    pub network: String,
    pub rpc_url: String,
    pub chain_id: Option<u64>,
    pub private_key: String,
    pub staking_contract: Address,
    pub token_contract: Address,
    pub multicall_address: Address,
    pub multicall_chunk_size: usize,
    pub receipt_poll_interval: Duration,
    pub csv_path: PathBuf,
    pub options: RunOptions,
}

impl RunConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let settings = Settings::load(cli.config.as_deref())?;
        Self::resolve(cli, &settings)
    }

    pub fn resolve(cli: &Cli, settings: &Settings) -> Result<Self> {
        let network = settings.network(&cli.network).unwrap_or_default();

        let rpc_url = cli
            .rpc_url
            .clone()
            .or(network.rpc_url)
            .ok_or_else(|| {
                BatcherError::Config(format!(
                    "no RPC URL for network '{}': pass --rpc-url or set RPC_URL",
                    cli.network
                ))
            })?;

        let private_key = cli
            .private_key
            .clone()
            .ok_or_else(|| BatcherError::Config("PRIVATE_KEY is required".to_string()))?;

        let staking_contract = parse_address(
            "STAKING_CONTRACT",
            cli.staking_contract.as_deref().or(settings.contracts.staking.as_deref()),
        )?;
        let token_contract = parse_address(
            "TOKEN_CONTRACT",
            cli.token_contract.as_deref().or(settings.contracts.token.as_deref()),
        )?;
        let multicall_address = match settings.contracts.multicall.as_deref() {
            Some(value) => parse_address("contracts.multicall", Some(value))?,
            None => MULTICALL3_ADDRESS,
        };

        let csv_path = cli
            .csv
            .clone()
            .ok_or_else(|| BatcherError::Config("CSV_PATH is required".to_string()))?;

        let max_cost = cli
            .max_cost_per_batch
            .as_deref()
            .or(settings.submission.max_cost_per_batch.as_deref())
            .map(parse_native_amount)
            .transpose()?;

        let submission = SubmissionSettings {
            confirmation_timeout: Duration::from_secs(
                cli.confirmation_timeout
                    .unwrap_or(settings.submission.confirmation_timeout_secs),
            ),
            gas_price_override: network.gas_price_wei.map(u128::from),
            gas_limit_headroom_percent: settings.submission.gas_limit_headroom_percent,
            max_cost_per_batch: max_cost,
        };

        let options = RunOptions {
            batch_size: cli.batch_size.unwrap_or(settings.batch.size),
            start_offset: cli.start.unwrap_or(settings.batch.start),
            end_offset: cli.end.or(settings.batch.end),
            approval: cli.approval.unwrap_or(settings.batch.approval),
            dry_run: cli.dry_run,
            log_dir: cli
                .log_dir
                .clone()
                .unwrap_or_else(|| settings.batch.log_dir.clone()),
            submission,
        };

        if options.batch_size == 0 {
            return Err(BatcherError::Config("batch size must be at least 1".to_string()));
        }

        Ok(Self {
            network: cli.network.clone(),
            rpc_url,
            chain_id: network.chain_id,
            private_key,
            staking_contract,
            token_contract,
            multicall_address,
            multicall_chunk_size: settings.submission.multicall_chunk_size,
            receipt_poll_interval: Duration::from_millis(settings.submission.receipt_poll_interval_ms),
            csv_path,
            options,
        })
    }

    pub fn client_config(&self) -> StakingClientConfig {
        StakingClientConfig {
            rpc_url: self.rpc_url.clone(),
            private_key: self.private_key.clone(),
            chain_id: self.chain_id,
            staking_contract: self.staking_contract,
            token_contract: self.token_contract,
            multicall_address: self.multicall_address,
            multicall_chunk_size: self.multicall_chunk_size,
            receipt_poll_interval: self.receipt_poll_interval,
        }
    }
}

fn parse_address(label: &str, value: Option<&str>) -> Result<Address> {
    let value = value.ok_or_else(|| BatcherError::Config(format!("{} is required", label)))?;
    let address: Address = value
        .trim()
        .parse()
        .map_err(|e| BatcherError::Config(format!("{} is not a valid address: {}", label, e)))?;

    if address == Address::ZERO {
        return Err(BatcherError::Config(format!("{} must not be the zero address", label)));
    }
    Ok(address)
}

fn parse_native_amount(value: &str) -> Result<U256> {
    to_fixed_point(value)
        .map_err(|e| BatcherError::Config(format!("invalid max cost per batch: {}", e)))
}
