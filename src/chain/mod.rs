//! Chain connector
//!
//! [`ChainClient`] is a live, validated connection to one chain endpoint. It
//! exposes the current block height plus generic read, log, and send
//! primitives, and holds no relay state. [`Connector`] opens such connections;
//! the relay loop uses it again to reconnect after connectivity failures.

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, Bytes, B256};
use alloy::rpc::types::Log;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::clock::Sleeper;
use crate::contracts::ContractCall;
use crate::error::{RelayError, SubmissionError};
use crate::types::{ChainEndpoint, ChainSide, PendingTransaction, TxReceiptSummary};
use crate::writers::retry::RetryPolicy;

pub mod evm;
pub mod rpc_fallback;

pub use evm::{EvmClient, EvmConnector};

/// Log filter for a single event signature on a single contract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogQuery {
    pub address: Address,
    pub topic0: B256,
    pub from_block: u64,
    pub to_block: u64,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    fn side(&self) -> ChainSide;

    /// Chain id verified when the connection was opened
    fn chain_id(&self) -> u64;

    async fn current_block(&self) -> Result<u64, RelayError>;

    /// Raw logs matching the query. Fails with `RangeTooLarge` when the
    /// provider refuses the block span.
    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<Log>, RelayError>;

    /// `eth_call` of a contract function from `from`
    async fn call(
        &self,
        from: Address,
        contract: Address,
        call: &ContractCall,
    ) -> Result<Bytes, RelayError>;

    /// Next nonce for `account`, counting transactions still in the mempool
    async fn pending_nonce(&self, account: Address) -> Result<u64, RelayError>;

    async fn gas_price(&self) -> Result<u128, RelayError>;

    /// Sign and broadcast, returning the transaction hash
    async fn send(
        &self,
        tx: &PendingTransaction,
        wallet: &EthereumWallet,
    ) -> Result<B256, SubmissionError>;

    async fn receipt(&self, tx_hash: B256) -> Result<Option<TxReceiptSummary>, RelayError>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    type Client: ChainClient + 'static;

    /// Open a connection and verify the endpoint is live and reports the
    /// expected chain id. A mismatched chain id is a configuration error.
    async fn connect(&self, endpoint: &ChainEndpoint) -> Result<Self::Client, RelayError>;
}

/// Connect, retrying connectivity failures with exponential backoff.
///
/// Configuration errors (including a chain id mismatch) fail immediately.
/// Connectivity errors are retried up to `policy.max_attempts` times before the
/// last one is returned.
pub async fn connect_with_retry<C: Connector + ?Sized>(
    connector: &C,
    endpoint: &ChainEndpoint,
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
) -> Result<C::Client, RelayError> {
    let mut attempt = 0u32;
    loop {
        match connector.connect(endpoint).await {
            Ok(client) => {
                info!(
                    chain = %endpoint.side,
                    chain_id = client.chain_id(),
                    attempt = attempt + 1,
                    "Connected"
                );
                return Ok(client);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                attempt += 1;
                if attempt >= policy.max_attempts {
                    return Err(e);
                }
                let backoff = policy.backoff_for_attempt(attempt - 1);
                warn!(
                    chain = %endpoint.side,
                    attempt,
                    max = policy.max_attempts,
                    ?backoff,
                    error = %e,
                    "Connection failed, retrying"
                );
                sleeper.sleep(backoff).await;
            }
        }
    }
}
