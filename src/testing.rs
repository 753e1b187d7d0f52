//! In-memory chain for tests
//!
//! [`MockChain`] implements [`ChainClient`] over shared state, so a test keeps
//! one handle to script failures and inspect sends while the relay owns a
//! clone. [`MockConnector`] hands those clones out and can be told to fail.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::json_abi::JsonAbi;
use alloy::network::EthereumWallet;
use alloy::primitives::{address, keccak256, Address, Bytes, LogData, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;

use crate::chain::{ChainClient, Connector, LogQuery};
use crate::clock::Sleeper;
use crate::contracts::{abi_json, ContractCall, DestinationBridge, SourceBridge};
use crate::error::{RelayError, SubmissionError};
use crate::relay::{RelayConfig, RelaySetup};
use crate::types::{ChainEndpoint, ChainSide, EventKind, PendingTransaction, TxReceiptSummary};
use crate::writers::{Signer, SubmitterConfig};

/// Well-known development key (anvil account 0)
pub const TEST_PRIVATE_KEY: &str =
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
/// Address of [`TEST_PRIVATE_KEY`]
pub const TEST_ADMIN_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

pub const SOURCE_CONTRACT: Address = address!("1111111111111111111111111111111111111111");
pub const DESTINATION_CONTRACT: Address = address!("2222222222222222222222222222222222222222");

/// A mined Deposit or Unwrap log at `(block, log_index)`
pub fn bridge_log(
    kind: EventKind,
    contract: Address,
    token: Address,
    recipient: Address,
    amount: U256,
    block: u64,
    log_index: u64,
) -> Log {
    let data: LogData = match kind {
        EventKind::Deposit => SourceBridge::Deposit {
            token,
            recipient,
            amount,
        }
        .encode_log_data(),
        EventKind::Unwrap => DestinationBridge::Unwrap {
            token,
            recipient,
            amount,
        }
        .encode_log_data(),
    };

    Log {
        inner: alloy::primitives::Log {
            address: contract,
            data,
        },
        block_hash: Some(keccak256(block.to_be_bytes())),
        block_number: Some(block),
        block_timestamp: None,
        transaction_hash: Some(keccak256(format!("{kind}:{block}:{log_index}"))),
        transaction_index: Some(0),
        log_index: Some(log_index),
        removed: false,
    }
}

#[derive(Debug)]
struct MockState {
    side: ChainSide,
    chain_id: u64,
    head: u64,
    offline: bool,
    logs: Vec<Log>,
    log_queries: Vec<LogQuery>,
    max_log_range: Option<u64>,
    gas_price: u128,
    nonce: u64,
    send_attempts: Vec<PendingTransaction>,
    sent: Vec<PendingTransaction>,
    send_script: VecDeque<Result<(), SubmissionError>>,
    send_failure: Option<SubmissionError>,
    held_sends: usize,
    revert_receipts: bool,
    revert_calls: bool,
    preflight_calls: Vec<ContractCall>,
    receipts: HashMap<B256, TxReceiptSummary>,
}

/// Scriptable in-memory chain. Clones share state.
#[derive(Debug, Clone)]
pub struct MockChain {
    state: Arc<Mutex<MockState>>,
}

impl MockChain {
    pub fn new(side: ChainSide, chain_id: u64, head: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                side,
                chain_id,
                head,
                offline: false,
                logs: Vec::new(),
                log_queries: Vec::new(),
                max_log_range: None,
                gas_price: 1_000_000_000,
                nonce: 0,
                send_attempts: Vec::new(),
                sent: Vec::new(),
                send_script: VecDeque::new(),
                send_failure: None,
                held_sends: 0,
                revert_receipts: false,
                revert_calls: false,
                preflight_calls: Vec::new(),
                receipts: HashMap::new(),
            })),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock chain lock poisoned")
    }

    pub fn set_head(&self, head: u64) {
        self.state().head = head;
    }

    pub fn head(&self) -> u64 {
        self.state().head
    }

    /// While offline every RPC fails as a connectivity error and connects are refused
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    pub fn is_offline(&self) -> bool {
        self.state().offline
    }

    pub fn push_log(&self, log: Log) {
        self.state().logs.push(log);
    }

    pub fn log_queries(&self) -> Vec<LogQuery> {
        self.state().log_queries.clone()
    }

    /// Refuse log queries spanning more than `blocks` blocks
    pub fn set_max_log_range(&self, blocks: u64) {
        self.state().max_log_range = Some(blocks);
    }

    pub fn set_gas_price(&self, gas_price: u128) {
        self.state().gas_price = gas_price;
    }

    pub fn set_nonce(&self, nonce: u64) {
        self.state().nonce = nonce;
    }

    /// Every send fails with `error` until cleared
    pub fn fail_sends_with(&self, error: SubmissionError) {
        self.state().send_failure = Some(error);
    }

    pub fn clear_send_failures(&self) {
        let mut state = self.state();
        state.send_failure = None;
        state.send_script.clear();
    }

    /// Outcome of the next unscripted send
    pub fn push_send_result(&self, result: Result<(), SubmissionError>) {
        self.state().send_script.push_back(result);
    }

    /// The next `count` accepted sends stay pending forever
    pub fn hold_receipts_for_sends(&self, count: usize) {
        self.state().held_sends = count;
    }

    pub fn revert_receipts(&self, revert: bool) {
        self.state().revert_receipts = revert;
    }

    pub fn revert_calls(&self, revert: bool) {
        self.state().revert_calls = revert;
    }

    /// Every send, accepted or not
    pub fn send_attempts(&self) -> Vec<PendingTransaction> {
        self.state().send_attempts.clone()
    }

    /// Sends the chain accepted into its mempool
    pub fn sent_transactions(&self) -> Vec<PendingTransaction> {
        self.state().sent.clone()
    }

    /// Calls of accepted sends, in order
    pub fn submitted_calls(&self) -> Vec<ContractCall> {
        self.state().sent.iter().map(|tx| tx.call.clone()).collect()
    }

    pub fn preflight_calls(&self) -> Vec<ContractCall> {
        self.state().preflight_calls.clone()
    }
}

fn offline_error(side: ChainSide) -> RelayError {
    RelayError::connectivity(side, "connection refused")
}

#[async_trait]
impl ChainClient for MockChain {
    fn side(&self) -> ChainSide {
        self.state().side
    }

    fn chain_id(&self) -> u64 {
        self.state().chain_id
    }

    async fn current_block(&self) -> Result<u64, RelayError> {
        let state = self.state();
        if state.offline {
            return Err(offline_error(state.side));
        }
        Ok(state.head)
    }

    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<Log>, RelayError> {
        let mut state = self.state();
        state.log_queries.push(*query);
        if state.offline {
            return Err(offline_error(state.side));
        }
        if let Some(max) = state.max_log_range {
            if query.to_block.saturating_sub(query.from_block) + 1 > max {
                return Err(RelayError::RangeTooLarge {
                    chain: state.side,
                    from_block: query.from_block,
                    to_block: query.to_block,
                });
            }
        }
        Ok(state
            .logs
            .iter()
            .filter(|log| {
                log.address() == query.address
                    && log.topic0() == Some(&query.topic0)
                    && log
                        .block_number
                        .is_some_and(|b| b >= query.from_block && b <= query.to_block)
            })
            .cloned()
            .collect())
    }

    async fn call(
        &self,
        _from: Address,
        _contract: Address,
        call: &ContractCall,
    ) -> Result<Bytes, RelayError> {
        let mut state = self.state();
        if state.offline {
            return Err(offline_error(state.side));
        }
        state.preflight_calls.push(call.clone());
        if state.revert_calls {
            return Err(RelayError::Submission {
                chain: state.side,
                source: SubmissionError::Reverted { tx_hash: None },
            });
        }
        Ok(Bytes::new())
    }

    async fn pending_nonce(&self, _account: Address) -> Result<u64, RelayError> {
        let state = self.state();
        if state.offline {
            return Err(offline_error(state.side));
        }
        Ok(state.nonce)
    }

    async fn gas_price(&self) -> Result<u128, RelayError> {
        let state = self.state();
        if state.offline {
            return Err(offline_error(state.side));
        }
        Ok(state.gas_price)
    }

    async fn send(
        &self,
        tx: &PendingTransaction,
        _wallet: &EthereumWallet,
    ) -> Result<B256, SubmissionError> {
        let mut state = self.state();
        state.send_attempts.push(tx.clone());
        if state.offline {
            return Err(SubmissionError::Transport("connection refused".into()));
        }
        let scripted = match state.send_script.pop_front() {
            Some(result) => result,
            None => match &state.send_failure {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            },
        };
        scripted?;

        let tx_hash = keccak256(format!(
            "{}:{}:{}",
            state.chain_id,
            tx.nonce,
            state.send_attempts.len()
        ));
        state.nonce = state.nonce.max(tx.nonce + 1);
        state.sent.push(tx.clone());

        if state.held_sends > 0 {
            state.held_sends -= 1;
        } else {
            let receipt = TxReceiptSummary {
                tx_hash,
                block_number: Some(state.head),
                success: !state.revert_receipts,
            };
            state.receipts.insert(tx_hash, receipt);
        }
        Ok(tx_hash)
    }

    async fn receipt(&self, tx_hash: B256) -> Result<Option<TxReceiptSummary>, RelayError> {
        let state = self.state();
        if state.offline {
            return Err(offline_error(state.side));
        }
        Ok(state.receipts.get(&tx_hash).copied())
    }
}

/// Hands out [`MockChain`] clones keyed by side
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    chains: Arc<Mutex<HashMap<ChainSide, MockChain>>>,
    failures: Arc<Mutex<HashMap<ChainSide, u32>>>,
    connects: Arc<Mutex<HashMap<ChainSide, u32>>>,
}

impl MockConnector {
    pub fn new(source: MockChain, destination: MockChain) -> Self {
        let connector = Self::default();
        {
            let mut chains = connector.chains.lock().expect("mock connector lock poisoned");
            chains.insert(ChainSide::Source, source);
            chains.insert(ChainSide::Destination, destination);
        }
        connector
    }

    /// The next `count` connects to `side` fail as connectivity errors
    pub fn fail_connects(&self, side: ChainSide, count: u32) {
        self.failures
            .lock()
            .expect("mock connector lock poisoned")
            .insert(side, count);
    }

    /// Connect attempts made so far, failed ones included
    pub fn connect_count(&self, side: ChainSide) -> u32 {
        self.connects
            .lock()
            .expect("mock connector lock poisoned")
            .get(&side)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Client = MockChain;

    async fn connect(&self, endpoint: &ChainEndpoint) -> Result<MockChain, RelayError> {
        let side = endpoint.side;
        *self
            .connects
            .lock()
            .expect("mock connector lock poisoned")
            .entry(side)
            .or_default() += 1;

        {
            let mut failures = self.failures.lock().expect("mock connector lock poisoned");
            if let Some(remaining) = failures.get_mut(&side) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(RelayError::connectivity(side, "connection refused"));
                }
            }
        }

        let chain = self
            .chains
            .lock()
            .expect("mock connector lock poisoned")
            .get(&side)
            .cloned()
            .ok_or_else(|| RelayError::Configuration(format!("no mock chain for {side}")))?;

        if chain.is_offline() {
            return Err(RelayError::connectivity(side, "connection refused"));
        }
        let actual = chain.chain_id();
        if actual != endpoint.chain_id {
            return Err(RelayError::ChainIdMismatch {
                chain: side,
                expected: endpoint.chain_id,
                actual,
            });
        }
        Ok(chain)
    }
}

/// Records requested delays and returns immediately
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    calls: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn calls(&self) -> Vec<Duration> {
        self.calls.lock().expect("sleeper lock poisoned").clone()
    }

    pub fn total(&self) -> Duration {
        self.calls().iter().sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.calls
            .lock()
            .expect("sleeper lock poisoned")
            .push(duration);
        tokio::task::yield_now().await;
    }
}

/// Endpoint for a mock chain with the bridge contract ABI of that side
pub fn endpoint(side: ChainSide, chain_id: u64) -> ChainEndpoint {
    let abi: JsonAbi =
        serde_json::from_value(abi_json(side)).expect("bridge ABI fixture is valid");
    ChainEndpoint {
        side,
        rpc_urls: vec![format!("http://localhost:{}", 8545 + chain_id % 1000)],
        chain_id,
        contract: match side {
            ChainSide::Source => SOURCE_CONTRACT,
            ChainSide::Destination => DESTINATION_CONTRACT,
        },
        abi,
    }
}

/// Setup for a relay between two mock chains, with short confirmation waits
pub fn relay_setup(source_chain_id: u64, destination_chain_id: u64) -> RelaySetup {
    RelaySetup {
        source: endpoint(ChainSide::Source, source_chain_id),
        destination: endpoint(ChainSide::Destination, destination_chain_id),
        signer: Signer::from_private_key(TEST_PRIVATE_KEY).expect("test key is valid"),
        submitter: SubmitterConfig {
            confirmation_timeout: Duration::from_secs(10),
            receipt_poll_interval: Duration::from_secs(2),
            ..SubmitterConfig::default()
        },
        relay: RelayConfig {
            poll_interval: Duration::from_secs(1),
            ..RelayConfig::default()
        },
    }
}
