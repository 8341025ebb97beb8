//! Capability contract of the remote ledger consumed by the pipeline

use alloy::primitives::{Address, TxHash, U256};
use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::LedgerError;

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// Per-staker snapshot reported by the staking contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemoteState {
    pub amount: U256,
    pub cumulative_weight: U256,
    pub last_update_timestamp: U256,
}

/// Outcome of a single entry in a batched state read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateRead {
    State(RemoteState),
    Failed(String),
}

/// Fee quote for a candidate call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEstimate {
    /// Wei per gas unit
    pub gas_price: u128,
    pub gas_units: u64,
}

impl FeeEstimate {
    /// Projected cost in wei
    pub fn total_cost(&self) -> U256 {
        U256::from(self.gas_price) * U256::from(self.gas_units)
    }
}

/// Batched `stakeBehalf` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakeCall {
    pub stakers: Vec<Address>,
    pub amounts: Vec<U256>,
    /// Fixed gas price; network pricing when unset
    pub gas_price: Option<u128>,
    /// Gas limit; estimated by the provider when unset
    pub gas_limit: Option<u64>,
}

impl StakeCall {
    pub fn new(stakers: Vec<Address>, amounts: Vec<U256>) -> Self {
        Self {
            stakers,
            amounts,
            gas_price: None,
            gas_limit: None,
        }
    }
}

/// Result of waiting for a submitted transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed {
        gas_used: u64,
        effective_gas_price: u128,
        block_number: Option<u64>,
    },
    Reverted {
        gas_used: u64,
    },
    /// Dropped or replaced before inclusion
    TimedOut,
}

/// Network boundary: one staking contract, its ERC-20 token, and a
/// multicall aggregator for bulk reads.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Address of the signing key
    fn signer(&self) -> Address;

    /// Staking contract address
    fn staking_contract(&self) -> Address;

    /// Native currency balance
    async fn native_balance(&self, owner: Address) -> LedgerResult<U256>;

    /// Staking token balance
    async fn token_balance(&self, owner: Address) -> LedgerResult<U256>;

    /// Token allowance granted by `owner` to the staking contract
    async fn allowance(&self, owner: Address) -> LedgerResult<U256>;

    /// Grant the staking contract an allowance of `amount` and wait for inclusion
    async fn approve(&self, amount: U256) -> LedgerResult<TxHash>;

    /// Global circuit breaker of the staking contract
    async fn is_paused(&self) -> LedgerResult<bool>;

    /// Read staking state for many stakers in one aggregated round trip
    async fn batch_read_state(
        &self,
        stakers: &[Address],
    ) -> LedgerResult<HashMap<Address, StateRead>>;

    async fn estimate_fee(&self, call: &StakeCall) -> LedgerResult<FeeEstimate>;

    /// Broadcast the mutating call, returning once the node has accepted it
    async fn submit(&self, call: &StakeCall) -> LedgerResult<TxHash>;

    /// Wait for inclusion of a submitted transaction
    async fn await_confirmation(&self, tx_hash: TxHash) -> LedgerResult<Confirmation>;
}
