//! Alloy-backed chain connector
//!
//! One HTTP provider per chain. The connector walks the configured RPC URLs in
//! order and keeps the first one that answers with the expected chain id.

use std::time::Duration;

use alloy::consensus::TxEnvelope;
use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::client::RpcClient;
use alloy::rpc::types::{Filter, Log, TransactionRequest};
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use tracing::{debug, warn};

use super::rpc_fallback::{parse_rpc_url, redact_url};
use super::{ChainClient, Connector, LogQuery};
use crate::contracts::ContractCall;
use crate::error::{RelayError, SubmissionError};
use crate::types::{ChainEndpoint, ChainSide, PendingTransaction, TxReceiptSummary};
use crate::writers::retry::{classify_error, submission_error_from_rpc, ErrorClass};

/// Opens [`EvmClient`] connections
#[derive(Debug, Clone)]
pub struct EvmConnector {
    /// Per-request HTTP timeout
    request_timeout: Duration,
}

impl EvmConnector {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }

    fn provider_for(&self, raw_url: &str) -> Result<RootProvider<Http<Client>>, String> {
        let url = parse_rpc_url(raw_url)?;
        let http_client = reqwest::Client::builder()
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {}", e))?;
        let transport = Http::with_client(http_client, url);
        let is_local = transport.guess_local();
        Ok(ProviderBuilder::new().on_client(RpcClient::new(transport, is_local)))
    }
}

impl Default for EvmConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl Connector for EvmConnector {
    type Client = EvmClient;

    async fn connect(&self, endpoint: &ChainEndpoint) -> Result<EvmClient, RelayError> {
        if endpoint.rpc_urls.is_empty() {
            return Err(RelayError::Configuration(format!(
                "no RPC URL configured for {}",
                endpoint.side
            )));
        }

        let mut last_error = String::new();
        for raw_url in &endpoint.rpc_urls {
            let provider = self
                .provider_for(raw_url)
                .map_err(RelayError::Configuration)?;

            match provider.get_chain_id().await {
                Ok(actual) if actual == endpoint.chain_id => {
                    debug!(
                        chain = %endpoint.side,
                        rpc = %redact_url(raw_url),
                        chain_id = actual,
                        "RPC endpoint is live"
                    );
                    return Ok(EvmClient {
                        side: endpoint.side,
                        chain_id: actual,
                        rpc: redact_url(raw_url),
                        provider,
                    });
                }
                Ok(actual) => {
                    return Err(RelayError::ChainIdMismatch {
                        chain: endpoint.side,
                        expected: endpoint.chain_id,
                        actual,
                    });
                }
                Err(e) => {
                    warn!(
                        chain = %endpoint.side,
                        rpc = %redact_url(raw_url),
                        error = %e,
                        "RPC endpoint unreachable, trying next"
                    );
                    last_error = e.to_string();
                }
            }
        }

        Err(RelayError::connectivity(
            endpoint.side,
            format!(
                "all {} RPC endpoints unreachable, last error: {}",
                endpoint.rpc_urls.len(),
                last_error
            ),
        ))
    }
}

/// Validated connection to one EVM chain
pub struct EvmClient {
    side: ChainSide,
    chain_id: u64,
    /// Redacted URL, for logs
    rpc: String,
    provider: RootProvider<Http<Client>>,
}

impl EvmClient {
    pub fn rpc(&self) -> &str {
        &self.rpc
    }

    fn connectivity(&self, context: &str, error: impl std::fmt::Display) -> RelayError {
        RelayError::connectivity(self.side, format!("{} via {}: {}", context, self.rpc, error))
    }
}

#[async_trait]
impl ChainClient for EvmClient {
    fn side(&self) -> ChainSide {
        self.side
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn current_block(&self) -> Result<u64, RelayError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| self.connectivity("Failed to get block number", e))
    }

    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<Log>, RelayError> {
        let filter = Filter::new()
            .address(query.address)
            .event_signature(query.topic0)
            .from_block(query.from_block)
            .to_block(query.to_block);

        self.provider.get_logs(&filter).await.map_err(|e| {
            let message = e.to_string();
            match classify_error(&message) {
                ErrorClass::RangeTooLarge => RelayError::RangeTooLarge {
                    chain: self.side,
                    from_block: query.from_block,
                    to_block: query.to_block,
                },
                _ => self.connectivity("Failed to get logs", message),
            }
        })
    }

    async fn call(
        &self,
        from: Address,
        contract: Address,
        call: &ContractCall,
    ) -> Result<Bytes, RelayError> {
        let request = TransactionRequest::default()
            .with_from(from)
            .with_to(contract)
            .with_input(call.calldata());

        self.provider.call(&request).await.map_err(|e| {
            let message = e.to_string();
            match classify_error(&message) {
                ErrorClass::Reverted => RelayError::Submission {
                    chain: self.side,
                    source: SubmissionError::Reverted { tx_hash: None },
                },
                _ => self.connectivity("eth_call failed", message),
            }
        })
    }

    async fn pending_nonce(&self, account: Address) -> Result<u64, RelayError> {
        self.provider
            .get_transaction_count(account)
            .pending()
            .await
            .map_err(|e| self.connectivity("Failed to get pending nonce", e))
    }

    async fn gas_price(&self) -> Result<u128, RelayError> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| self.connectivity("Failed to get gas price", e))
    }

    async fn send(
        &self,
        tx: &PendingTransaction,
        wallet: &EthereumWallet,
    ) -> Result<B256, SubmissionError> {
        let request = TransactionRequest::default()
            .with_from(tx.sender)
            .with_to(tx.contract)
            .with_input(tx.call.calldata())
            .with_nonce(tx.nonce)
            .with_gas_limit(tx.gas_limit)
            .with_gas_price(tx.gas_price)
            .with_chain_id(tx.chain_id);

        let envelope: TxEnvelope = request
            .build(wallet)
            .await
            .map_err(|e| SubmissionError::Signing(e.to_string()))?;

        let pending = self
            .provider
            .send_raw_transaction(&envelope.encoded_2718())
            .await
            .map_err(|e| match e.as_error_resp() {
                Some(payload) => submission_error_from_rpc(&payload.message),
                None if e.is_transport_error() => SubmissionError::Transport(e.to_string()),
                None => submission_error_from_rpc(&e.to_string()),
            })?;

        Ok(*pending.tx_hash())
    }

    async fn receipt(&self, tx_hash: B256) -> Result<Option<TxReceiptSummary>, RelayError> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| self.connectivity("Failed to get receipt", e))?;

        Ok(receipt.map(|r| TxReceiptSummary {
            tx_hash,
            block_number: r.block_number,
            success: r.status(),
        }))
    }
}
