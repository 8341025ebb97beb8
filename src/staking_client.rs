//! Alloy-backed [`LedgerClient`] for the staking contract

use alloy::{
    network::EthereumWallet,
    primitives::{address, Address, TxHash, U256},
    providers::{DynProvider, Provider, ProviderBuilder},
    signers::local::PrivateKeySigner,
    sol,
    sol_types::SolCall,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{BatcherError, LedgerError, Result};
use crate::ledger::{
    Confirmation, FeeEstimate, LedgerClient, LedgerResult, RemoteState, StakeCall, StateRead,
};

/// Canonical Multicall3 deployment, identical on every supported network
pub const MULTICALL3_ADDRESS: Address = address!("cA11bde05977b3631167028862bE2a173976CA11");

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract SimpleStaking {
        function stakeBehalf(address[] calldata stakers, uint256[] calldata amounts) external;

        function stakes(address staker)
            external
            view
            returns (uint256 amount, uint256 cumulativeWeight, uint256 lastUpdateTimestamp);

        function paused() external view returns (bool);
    }
}

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    interface IERC20 {
        function approve(address spender, uint256 amount) external returns (bool);
        function allowance(address owner, address spender) external view returns (uint256);
        function balanceOf(address account) external view returns (uint256);
    }
}

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract Multicall3 {
        struct Call3 {
            address target;
            bool allowFailure;
            bytes callData;
        }

        struct CallResult {
            bool success;
            bytes returnData;
        }

        function aggregate3(Call3[] calldata calls) external payable returns (CallResult[] memory returnData);
    }
}

/// Connection settings for [`StakingClient`]
#[derive(Clone)]
pub struct StakingClientConfig {
    pub rpc_url: String,
    pub private_key: String,
    /// Expected chain id; checked against the node when set
    pub chain_id: Option<u64>,
    pub staking_contract: Address,
    pub token_contract: Address,
    pub multicall_address: Address,
    /// Maximum stakers per `aggregate3` call
    pub multicall_chunk_size: usize,
    pub receipt_poll_interval: Duration,
}

pub struct StakingClient {
    provider: DynProvider,
    signer: Address,
    staking: SimpleStaking::SimpleStakingInstance<DynProvider>,
    token: IERC20::IERC20Instance<DynProvider>,
    multicall: Multicall3::Multicall3Instance<DynProvider>,
    multicall_chunk_size: usize,
    receipt_poll_interval: Duration,
}

impl StakingClient {
    /// Connect to the RPC endpoint with a local signer.
    pub async fn connect(config: StakingClientConfig) -> Result<Self> {
        let signer: PrivateKeySigner = config
            .private_key
            .parse()
            .map_err(|e| BatcherError::Config(format!("Invalid private key: {}", e)))?;
        let signer_address = signer.address();
        let wallet = EthereumWallet::from(signer);

        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect(&config.rpc_url)
            .await
            .map_err(|e| BatcherError::Config(format!("Failed to connect to {}: {}", config.rpc_url, e)))?;
        let provider = DynProvider::new(provider);

        let chain_id = provider.get_chain_id().await.map_err(LedgerError::classify)?;
        if let Some(expected) = config.chain_id {
            if expected != chain_id {
                return Err(BatcherError::Config(format!(
                    "RPC endpoint reports chain id {} but {} was configured",
                    chain_id, expected
                )));
            }
        }

        info!(
            "Connected to chain {} as {} (staking: {}, token: {})",
            chain_id, signer_address, config.staking_contract, config.token_contract
        );

        Ok(Self {
            staking: SimpleStaking::new(config.staking_contract, provider.clone()),
            token: IERC20::new(config.token_contract, provider.clone()),
            multicall: Multicall3::new(config.multicall_address, provider.clone()),
            provider,
            signer: signer_address,
            multicall_chunk_size: config.multicall_chunk_size.max(1),
            receipt_poll_interval: config.receipt_poll_interval,
        })
    }

    fn decode_stake_read(result: &Multicall3::CallResult) -> StateRead {
        if !result.success {
            return StateRead::Failed("stakes() call reverted".to_string());
        }

        match SimpleStaking::stakesCall::abi_decode_returns(&result.returnData) {
            Ok(ret) => StateRead::State(RemoteState {
                amount: ret.amount,
                cumulative_weight: ret.cumulativeWeight,
                last_update_timestamp: ret.lastUpdateTimestamp,
            }),
            Err(e) => StateRead::Failed(format!("undecodable stakes() return data: {}", e)),
        }
    }

    /// Record one `aggregate3` window. A failed window marks each of its
    /// stakers as a failed read instead of failing the whole read.
    fn collect_chunk(
        chunk: &[Address],
        results: LedgerResult<Vec<Multicall3::CallResult>>,
        states: &mut HashMap<Address, StateRead>,
    ) {
        let results = results.and_then(|results| {
            if results.len() == chunk.len() {
                Ok(results)
            } else {
                Err(LedgerError::Decode(format!(
                    "aggregate3 returned {} results for {} calls",
                    results.len(),
                    chunk.len()
                )))
            }
        });

        match results {
            Ok(results) => {
                for (staker, result) in chunk.iter().zip(results.iter()) {
                    states.insert(*staker, Self::decode_stake_read(result));
                }
                debug!("Read stake state for {} stakers", chunk.len());
            }
            Err(e) => {
                warn!("Stake state read failed for {} stakers: {}", chunk.len(), e);
                for staker in chunk {
                    states.insert(*staker, StateRead::Failed(e.to_string()));
                }
            }
        }
    }
}

#[async_trait]
impl LedgerClient for StakingClient {
    fn signer(&self) -> Address {
        self.signer
    }

    fn staking_contract(&self) -> Address {
        *self.staking.address()
    }

    async fn native_balance(&self, owner: Address) -> LedgerResult<U256> {
        self.provider
            .get_balance(owner)
            .await
            .map_err(LedgerError::classify)
    }

    async fn token_balance(&self, owner: Address) -> LedgerResult<U256> {
        self.token
            .balanceOf(owner)
            .call()
            .await
            .map_err(LedgerError::classify)
    }

    async fn allowance(&self, owner: Address) -> LedgerResult<U256> {
        self.token
            .allowance(owner, *self.staking.address())
            .call()
            .await
            .map_err(LedgerError::classify)
    }

    async fn approve(&self, amount: U256) -> LedgerResult<TxHash> {
        let receipt = self
            .token
            .approve(*self.staking.address(), amount)
            .from(self.signer)
            .send()
            .await
            .map_err(LedgerError::classify)?
            .get_receipt()
            .await
            .map_err(LedgerError::classify)?;

        if !receipt.status() {
            return Err(LedgerError::Reverted(format!(
                "approve transaction 0x{} reverted",
                hex::encode(receipt.transaction_hash)
            )));
        }

        info!("Approval confirmed: 0x{}", hex::encode(receipt.transaction_hash));
        Ok(receipt.transaction_hash)
    }

    async fn is_paused(&self) -> LedgerResult<bool> {
        self.staking
            .paused()
            .call()
            .await
            .map_err(LedgerError::classify)
    }

    async fn batch_read_state(
        &self,
        stakers: &[Address],
    ) -> LedgerResult<HashMap<Address, StateRead>> {
        let target = *self.staking.address();
        let mut states = HashMap::with_capacity(stakers.len());

        for chunk in stakers.chunks(self.multicall_chunk_size) {
            let calls: Vec<Multicall3::Call3> = chunk
                .iter()
                .map(|staker| Multicall3::Call3 {
                    target,
                    allowFailure: true,
                    callData: SimpleStaking::stakesCall { staker: *staker }.abi_encode().into(),
                })
                .collect();

            let results = self
                .multicall
                .aggregate3(calls)
                .call()
                .await
                .map_err(LedgerError::classify);

            Self::collect_chunk(chunk, results, &mut states);
        }

        Ok(states)
    }

    async fn estimate_fee(&self, call: &StakeCall) -> LedgerResult<FeeEstimate> {
        let gas_price = match call.gas_price {
            Some(price) => price,
            None => self
                .provider
                .get_gas_price()
                .await
                .map_err(LedgerError::classify)?,
        };

        let gas_units = self
            .staking
            .stakeBehalf(call.stakers.clone(), call.amounts.clone())
            .from(self.signer)
            .estimate_gas()
            .await
            .map_err(LedgerError::classify)?;

        Ok(FeeEstimate {
            gas_price,
            gas_units,
        })
    }

    async fn submit(&self, call: &StakeCall) -> LedgerResult<TxHash> {
        let mut builder = self
            .staking
            .stakeBehalf(call.stakers.clone(), call.amounts.clone())
            .from(self.signer);

        if let Some(gas_price) = call.gas_price {
            builder = builder.gas_price(gas_price);
        }
        if let Some(gas_limit) = call.gas_limit {
            builder = builder.gas(gas_limit);
        }

        let pending = builder.send().await.map_err(LedgerError::classify)?;
        Ok(*pending.tx_hash())
    }

    async fn await_confirmation(&self, tx_hash: TxHash) -> LedgerResult<Confirmation> {
        let mut dropped = DropTracker::default();

        loop {
            let receipt = self
                .provider
                .get_transaction_receipt(tx_hash)
                .await
                .map_err(LedgerError::classify)?;

            match receipt {
                Some(receipt) if receipt.status() => {
                    return Ok(Confirmation::Confirmed {
                        gas_used: receipt.gas_used,
                        effective_gas_price: receipt.effective_gas_price,
                        block_number: receipt.block_number,
                    });
                }
                Some(receipt) => {
                    return Ok(Confirmation::Reverted {
                        gas_used: receipt.gas_used,
                    });
                }
                None => {
                    let known = self
                        .provider
                        .get_transaction_by_hash(tx_hash)
                        .await
                        .map_err(LedgerError::classify)?
                        .is_some();

                    if dropped.observe(known) {
                        warn!(
                            "Transaction 0x{} left the node's pool without a receipt",
                            hex::encode(tx_hash)
                        );
                        return Ok(Confirmation::TimedOut);
                    }
                    tokio::time::sleep(self.receipt_poll_interval).await;
                }
            }
        }
    }
}

/// Consecutive polls in which the node no longer knows a pending transaction
const DROPPED_AFTER_POLLS: u32 = 3;

/// Tracks whether a pending transaction has been dropped or replaced
#[derive(Debug, Default)]
struct DropTracker {
    misses: u32,
}

impl DropTracker {
    /// Returns true once the transaction has been missing long enough.
    fn observe(&mut self, known: bool) -> bool {
        if known {
            self.misses = 0;
        } else {
            self.misses += 1;
        }
        self.misses >= DROPPED_AFTER_POLLS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Bytes;
    use alloy::sol_types::SolValue;

    #[test]
    fn test_stake_call_selector_matches_abi() {
        assert_eq!(
            SimpleStaking::stakeBehalfCall::SIGNATURE,
            "stakeBehalf(address[],uint256[])"
        );
        assert_eq!(SimpleStaking::stakesCall::SIGNATURE, "stakes(address)");
        assert_eq!(
            Multicall3::aggregate3Call::SIGNATURE,
            "aggregate3((address,bool,bytes)[])"
        );
    }

    #[test]
    fn test_decode_successful_read() {
        let encoded = (U256::from(5), U256::from(7), U256::from(1_700_000_000u64)).abi_encode_params();
        let result = Multicall3::CallResult {
            success: true,
            returnData: Bytes::from(encoded),
        };

        assert_eq!(
            StakingClient::decode_stake_read(&result),
            StateRead::State(RemoteState {
                amount: U256::from(5),
                cumulative_weight: U256::from(7),
                last_update_timestamp: U256::from(1_700_000_000u64),
            })
        );
    }

    #[test]
    fn test_drop_tracker_needs_consecutive_misses() {
        let mut tracker = DropTracker::default();
        assert!(!tracker.observe(false));
        assert!(!tracker.observe(false));
        // reappearing in the pool resets the count
        assert!(!tracker.observe(true));
        assert!(!tracker.observe(false));
        assert!(!tracker.observe(false));
        assert!(tracker.observe(false));
    }

    #[test]
    fn test_failed_window_marks_each_staker_failed() {
        let chunk = vec![Address::with_last_byte(1), Address::with_last_byte(2)];
        let mut states = HashMap::new();

        StakingClient::collect_chunk(
            &chunk,
            Err(LedgerError::Transport("request timed out".to_string())),
            &mut states,
        );

        assert_eq!(states.len(), 2);
        assert!(chunk
            .iter()
            .all(|staker| matches!(states.get(staker), Some(StateRead::Failed(_)))));
    }

    #[test]
    fn test_short_window_marks_each_staker_failed() {
        let chunk = vec![Address::with_last_byte(1), Address::with_last_byte(2)];
        let mut states = HashMap::new();
        let only_one = vec![Multicall3::CallResult {
            success: true,
            returnData: Bytes::from((U256::from(1), U256::ZERO, U256::ZERO).abi_encode_params()),
        }];

        StakingClient::collect_chunk(&chunk, Ok(only_one), &mut states);

        assert!(matches!(states.get(&chunk[1]), Some(StateRead::Failed(_))));
        assert!(matches!(states.get(&chunk[0]), Some(StateRead::Failed(_))));
    }

    #[test]
    fn test_decode_failed_and_garbage_reads() {
        let reverted = Multicall3::CallResult {
            success: false,
            returnData: Bytes::new(),
        };
        assert!(matches!(
            StakingClient::decode_stake_read(&reverted),
            StateRead::Failed(_)
        ));

        let garbage = Multicall3::CallResult {
            success: true,
            returnData: Bytes::from(vec![1u8, 2, 3]),
        };
        assert!(matches!(
            StakingClient::decode_stake_read(&garbage),
            StateRead::Failed(_)
        ));
    }
}
