//! In-memory ledger used by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use stake_batcher::prelude::*;

pub const ONE: u128 = 1_000_000_000_000_000_000;

/// Scripted result of the next submission
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Included and applied
    Confirm,
    /// Included but reverted
    Revert,
    /// Node reports the transaction as dropped
    Dropped,
    /// Never resolves
    Hang,
    /// Rejected at broadcast
    SubmitError(LedgerError),
}

struct State {
    stakes: HashMap<Address, U256>,
    failing_reads: HashSet<Address>,
    /// Batched reads numbered from 1 that fail as a whole from this one on
    failing_batch_reads_from: Option<usize>,
    failing_balance_reads: bool,
    paused: bool,
    pause_after_submissions: Option<usize>,
    outcomes: VecDeque<Scripted>,
    estimate_error: Option<LedgerError>,
    fee: FeeEstimate,
    submissions: Vec<StakeCall>,
    pending: HashMap<TxHash, (StakeCall, Scripted)>,
    approvals: Vec<U256>,
    allowance: U256,
    native_balance: U256,
    token_balance: U256,
    read_calls: usize,
    next_tx: u8,
    block: u64,
}

pub struct MockLedger {
    signer: Address,
    staking: Address,
    state: Mutex<State>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            signer: signer(),
            staking: staking(),
            state: Mutex::new(State {
                stakes: HashMap::new(),
                failing_reads: HashSet::new(),
                failing_batch_reads_from: None,
                failing_balance_reads: false,
                paused: false,
                pause_after_submissions: None,
                outcomes: VecDeque::new(),
                estimate_error: None,
                fee: FeeEstimate {
                    gas_price: 1_000_000_000,
                    gas_units: 100_000,
                },
                submissions: Vec::new(),
                pending: HashMap::new(),
                approvals: Vec::new(),
                allowance: U256::ZERO,
                native_balance: U256::from(10 * ONE),
                token_balance: U256::from(1_000_000 * ONE),
                read_calls: 0,
                next_tx: 0,
                block: 100,
            }),
        }
    }

    pub fn with_stake(self, staker: Address, amount: U256) -> Self {
        self.state.lock().unwrap().stakes.insert(staker, amount);
        self
    }

    pub fn with_failing_read(self, staker: Address) -> Self {
        self.state.lock().unwrap().failing_reads.insert(staker);
        self
    }

    /// Fail every batched read from the `call`-th one on with a transport error
    pub fn fail_batch_reads_from(self, call: usize) -> Self {
        self.state.lock().unwrap().failing_batch_reads_from = Some(call);
        self
    }

    /// Make balance reads fail after the first snapshot
    pub fn fail_balance_reads_later(self) -> Self {
        self.state.lock().unwrap().failing_balance_reads = true;
        self
    }

    pub fn with_outcomes(self, outcomes: Vec<Scripted>) -> Self {
        self.state.lock().unwrap().outcomes = outcomes.into();
        self
    }

    pub fn with_fee(self, gas_price: u128, gas_units: u64) -> Self {
        self.state.lock().unwrap().fee = FeeEstimate { gas_price, gas_units };
        self
    }

    pub fn with_estimate_error(self, err: LedgerError) -> Self {
        self.state.lock().unwrap().estimate_error = Some(err);
        self
    }

    pub fn with_allowance(self, allowance: U256) -> Self {
        self.state.lock().unwrap().allowance = allowance;
        self
    }

    pub fn with_token_balance(self, balance: U256) -> Self {
        self.state.lock().unwrap().token_balance = balance;
        self
    }

    pub fn paused(self) -> Self {
        self.state.lock().unwrap().paused = true;
        self
    }

    /// Engage the circuit breaker once `count` submissions were broadcast
    pub fn pause_after(self, count: usize) -> Self {
        self.state.lock().unwrap().pause_after_submissions = Some(count);
        self
    }

    pub fn submissions(&self) -> Vec<StakeCall> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn approvals(&self) -> Vec<U256> {
        self.state.lock().unwrap().approvals.clone()
    }

    pub fn stake_of(&self, staker: Address) -> U256 {
        self.state
            .lock()
            .unwrap()
            .stakes
            .get(&staker)
            .copied()
            .unwrap_or_default()
    }

    pub fn read_calls(&self) -> usize {
        self.state.lock().unwrap().read_calls
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    fn signer(&self) -> Address {
        self.signer
    }

    fn staking_contract(&self) -> Address {
        self.staking
    }

    async fn native_balance(&self, _owner: Address) -> LedgerResult<U256> {
        let state = self.state.lock().unwrap();
        if state.failing_balance_reads && state.read_calls > 0 {
            return Err(LedgerError::Transport("balance request timed out".to_string()));
        }
        Ok(state.native_balance)
    }

    async fn token_balance(&self, _owner: Address) -> LedgerResult<U256> {
        let state = self.state.lock().unwrap();
        if state.failing_balance_reads && state.read_calls > 0 {
            return Err(LedgerError::Transport("balance request timed out".to_string()));
        }
        Ok(state.token_balance)
    }

    async fn allowance(&self, _owner: Address) -> LedgerResult<U256> {
        Ok(self.state.lock().unwrap().allowance)
    }

    async fn approve(&self, amount: U256) -> LedgerResult<TxHash> {
        let mut state = self.state.lock().unwrap();
        state.approvals.push(amount);
        state.allowance = amount;
        state.next_tx += 1;
        Ok(TxHash::with_last_byte(state.next_tx))
    }

    async fn is_paused(&self) -> LedgerResult<bool> {
        Ok(self.state.lock().unwrap().paused)
    }

    async fn batch_read_state(
        &self,
        stakers: &[Address],
    ) -> LedgerResult<HashMap<Address, StateRead>> {
        let mut state = self.state.lock().unwrap();
        state.read_calls += 1;

        if state
            .failing_batch_reads_from
            .is_some_and(|from| state.read_calls >= from)
        {
            return Err(LedgerError::Transport("aggregate3 request timed out".to_string()));
        }

        Ok(stakers
            .iter()
            .map(|staker| {
                let read = if state.failing_reads.contains(staker) {
                    StateRead::Failed("stakes() call reverted".to_string())
                } else {
                    StateRead::State(RemoteState {
                        amount: state.stakes.get(staker).copied().unwrap_or_default(),
                        ..RemoteState::default()
                    })
                };
                (*staker, read)
            })
            .collect())
    }

    async fn estimate_fee(&self, _call: &StakeCall) -> LedgerResult<FeeEstimate> {
        let state = self.state.lock().unwrap();
        match &state.estimate_error {
            Some(err) => Err(err.clone()),
            None => Ok(state.fee),
        }
    }

    async fn submit(&self, call: &StakeCall) -> LedgerResult<TxHash> {
        let mut state = self.state.lock().unwrap();
        let scripted = match state.outcomes.pop_front().unwrap_or(Scripted::Confirm) {
            Scripted::SubmitError(err) => return Err(err),
            other => other,
        };

        state.submissions.push(call.clone());
        if state.pause_after_submissions == Some(state.submissions.len()) {
            state.paused = true;
        }

        state.next_tx += 1;
        let tx_hash = TxHash::with_last_byte(state.next_tx);
        state.pending.insert(tx_hash, (call.clone(), scripted));
        Ok(tx_hash)
    }

    async fn await_confirmation(&self, tx_hash: TxHash) -> LedgerResult<Confirmation> {
        let (call, scripted, fee) = {
            let mut state = self.state.lock().unwrap();
            let (call, scripted) = state
                .pending
                .remove(&tx_hash)
                .ok_or_else(|| LedgerError::Transport("unknown transaction".to_string()))?;
            (call, scripted, state.fee)
        };

        match scripted {
            Scripted::Hang => Ok(std::future::pending::<Confirmation>().await),
            Scripted::Dropped => Ok(Confirmation::TimedOut),
            Scripted::Revert => Ok(Confirmation::Reverted {
                gas_used: fee.gas_units / 2,
            }),
            Scripted::SubmitError(err) => Err(err),
            Scripted::Confirm => {
                // stakes land only once the receipt is observed
                let mut state = self.state.lock().unwrap();
                let staked = call
                    .amounts
                    .iter()
                    .fold(U256::ZERO, |acc, amount| acc + *amount);

                for (staker, amount) in call.stakers.iter().zip(&call.amounts) {
                    *state.stakes.entry(*staker).or_default() += *amount;
                }
                state.token_balance = state.token_balance.saturating_sub(staked);
                state.allowance = state.allowance.saturating_sub(staked);
                state.native_balance = state.native_balance.saturating_sub(fee.total_cost());
                state.block += 1;

                Ok(Confirmation::Confirmed {
                    gas_used: fee.gas_units,
                    effective_gas_price: fee.gas_price,
                    block_number: Some(state.block),
                })
            }
        }
    }
}

pub fn signer() -> Address {
    Address::with_last_byte(0xA1)
}

pub fn staking() -> Address {
    Address::with_last_byte(0xB2)
}

pub fn token() -> Address {
    Address::with_last_byte(0xC3)
}

pub fn staker(index: u8) -> Address {
    Address::with_last_byte(index + 1)
}

pub fn record(index: u8, amount: &str) -> Record {
    Record {
        address: staker(index),
        amount: amount.to_string(),
    }
}

pub fn ether(amount: &str) -> U256 {
    to_fixed_point(amount).unwrap()
}

pub fn context() -> RunContext {
    RunContext::new(signer(), staking(), token(), "hardhat", "http://127.0.0.1:8545").unwrap()
}

pub fn options(log_dir: &Path, batch_size: usize) -> RunOptions {
    RunOptions {
        batch_size,
        log_dir: log_dir.to_path_buf(),
        submission: SubmissionSettings {
            confirmation_timeout: Duration::from_secs(5),
            ..SubmissionSettings::default()
        },
        ..RunOptions::default()
    }
}

/// Data lines of a result log, header excluded
pub fn log_lines(path: &Path) -> Vec<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => content.lines().skip(1).map(str::to_string).collect(),
        Err(_) => Vec::new(),
    }
}
