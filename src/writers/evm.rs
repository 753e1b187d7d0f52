//! EVM Writer - Submits mirrored bridge calls
//!
//! Builds, signs, broadcasts and confirms one `wrap`/`withdraw` call, retrying
//! recoverable failures with exponential backoff and an escalating gas price.

use std::time::Duration;

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, B256};
use alloy::signers::local::PrivateKeySigner;
use tracing::{debug, info, warn};

use crate::chain::ChainClient;
use crate::clock::Sleeper;
use crate::contracts::ContractCall;
use crate::error::{RelayError, SubmissionError};
use crate::types::{PendingTransaction, TxReceiptSummary};
use crate::writers::retry::{RetryPolicy, RetryState};

/// Signing key and the admin address derived from it
#[derive(Clone)]
pub struct Signer {
    wallet: EthereumWallet,
    address: Address,
}

impl Signer {
    pub fn from_private_key(private_key: &str) -> Result<Self, RelayError> {
        let key = private_key.trim();
        let key = key.strip_prefix("0x").unwrap_or(key);
        let signer: PrivateKeySigner = key
            .parse()
            .map_err(|_| RelayError::Configuration("Invalid private key".into()))?;
        let address = signer.address();
        Ok(Self {
            wallet: EthereumWallet::from(signer),
            address,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn wallet(&self) -> &EthereumWallet {
        &self.wallet
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("address", &self.address)
            .field("wallet", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct SubmitterConfig {
    pub retry: RetryPolicy,
    pub gas_limit: u64,
    /// Longest wait for a receipt after each broadcast
    pub confirmation_timeout: Duration,
    pub receipt_poll_interval: Duration,
    /// Simulate the call with `eth_call` before spending gas
    pub preflight: bool,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            gas_limit: 2_000_000,
            confirmation_timeout: Duration::from_secs(120),
            receipt_poll_interval: Duration::from_secs(2),
            preflight: true,
        }
    }
}

/// Terminal success of a submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedReceipt {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
    /// Attempts used, counting the one that landed
    pub attempts: u32,
    pub gas_price: u128,
}

/// Submits mirrored calls to one target chain
pub struct TransactionSubmitter {
    contract: Address,
    signer: Signer,
    config: SubmitterConfig,
}

impl TransactionSubmitter {
    pub fn new(contract: Address, signer: Signer, config: SubmitterConfig) -> Self {
        Self {
            contract,
            signer,
            config,
        }
    }

    pub fn sender(&self) -> Address {
        self.signer.address()
    }

    pub fn config(&self) -> &SubmitterConfig {
        &self.config
    }

    /// Submit `call` and wait for it to be mined.
    ///
    /// Every attempt reads the pending nonce and gas price fresh. A reverted
    /// preflight or receipt ends the sequence immediately; other failures are
    /// retried until the policy's attempt budget is spent, which yields
    /// [`SubmissionError::Exhausted`].
    pub async fn submit<C: ChainClient + ?Sized>(
        &self,
        client: &C,
        call: &ContractCall,
        sleeper: &dyn Sleeper,
    ) -> Result<ConfirmedReceipt, SubmissionError> {
        let chain = client.side();
        let policy = &self.config.retry;

        if self.config.preflight {
            match client.call(self.sender(), self.contract, call).await {
                Ok(_) => {}
                Err(RelayError::Submission { source, .. }) => {
                    warn!(
                        chain = %chain,
                        function = call.function_name(),
                        error = %source,
                        "Preflight simulation rejected call"
                    );
                    return Err(source);
                }
                Err(e) => {
                    debug!(chain = %chain, error = %e, "Preflight unavailable, sending anyway");
                }
            }
        }

        let mut state = RetryState::new(policy);
        // Broadcasts so far with their gas price; any of them may still land
        let mut sent: Vec<(B256, u128)> = Vec::new();
        // Nonce of a broadcast that timed out, reused so the retry replaces it
        let mut stuck_nonce: Option<u64> = None;

        loop {
            let attempt = state.attempt;

            if let Some((receipt, gas_price)) = self.find_landed(client, &sent).await {
                return self.finish(receipt, attempt, gas_price);
            }

            let result = self
                .attempt(client, call, attempt, &mut stuck_nonce, &mut sent, sleeper)
                .await;

            let error = match result {
                Ok((receipt, gas_price)) => return self.finish(receipt, attempt + 1, gas_price),
                Err(e) => e,
            };

            if !error.is_retryable() {
                warn!(
                    chain = %chain,
                    function = call.function_name(),
                    attempt = attempt + 1,
                    error = %error,
                    "Submission failed permanently"
                );
                return Err(error);
            }

            match state.record_failure(policy) {
                Some(delay) => {
                    warn!(
                        chain = %chain,
                        function = call.function_name(),
                        attempt = attempt + 1,
                        max_attempts = policy.max_attempts,
                        next_fee_multiplier_bps = state.fee_multiplier_bps,
                        ?delay,
                        error = %error,
                        "Submission attempt failed, retrying"
                    );
                    sleeper.sleep(delay).await;
                }
                None => {
                    if let Some((receipt, gas_price)) = self.find_landed(client, &sent).await {
                        return self.finish(receipt, state.attempt, gas_price);
                    }
                    return Err(SubmissionError::Exhausted {
                        attempts: state.attempt,
                        last: Box::new(error),
                    });
                }
            }
        }
    }

    /// One nonce/price/sign/broadcast/confirm round
    async fn attempt<C: ChainClient + ?Sized>(
        &self,
        client: &C,
        call: &ContractCall,
        attempt: u32,
        stuck_nonce: &mut Option<u64>,
        sent: &mut Vec<(B256, u128)>,
        sleeper: &dyn Sleeper,
    ) -> Result<(TxReceiptSummary, u128), SubmissionError> {
        let fresh_nonce = client
            .pending_nonce(self.sender())
            .await
            .map_err(|e| SubmissionError::Transport(e.to_string()))?;
        let nonce = match *stuck_nonce {
            Some(stuck) => stuck.min(fresh_nonce),
            None => fresh_nonce,
        };

        let base_gas_price = client
            .gas_price()
            .await
            .map_err(|e| SubmissionError::Transport(e.to_string()))?;
        let gas_price = self
            .config
            .retry
            .gas_price_for_attempt(base_gas_price, attempt);

        let tx = PendingTransaction {
            target: client.side(),
            contract: self.contract,
            call: call.clone(),
            sender: self.sender(),
            nonce,
            gas_limit: self.config.gas_limit,
            gas_price,
            chain_id: client.chain_id(),
        };

        let tx_hash = match client.send(&tx, self.signer.wallet()).await {
            Ok(hash) => hash,
            Err(e) => {
                if matches!(e, SubmissionError::NonceConflict(_)) {
                    *stuck_nonce = None;
                }
                return Err(e);
            }
        };
        sent.push((tx_hash, gas_price));

        info!(
            chain = %tx.target,
            function = call.function_name(),
            tx_hash = %tx_hash,
            nonce,
            gas_price,
            attempt = attempt + 1,
            "Broadcast transaction"
        );

        match self.wait_for_receipt(client, tx_hash, sleeper).await {
            Ok(receipt) => {
                *stuck_nonce = None;
                Ok((receipt, gas_price))
            }
            Err(e @ SubmissionError::Timeout { .. }) => {
                *stuck_nonce = Some(nonce);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Poll for a receipt until the confirmation timeout elapses.
    /// Failed receipt queries count as empty polls.
    async fn wait_for_receipt<C: ChainClient + ?Sized>(
        &self,
        client: &C,
        tx_hash: B256,
        sleeper: &dyn Sleeper,
    ) -> Result<TxReceiptSummary, SubmissionError> {
        let timeout = self.config.confirmation_timeout;
        let interval = self.config.receipt_poll_interval.max(Duration::from_millis(1));
        let mut waited = Duration::ZERO;

        loop {
            match client.receipt(tx_hash).await {
                Ok(Some(receipt)) if receipt.success => return Ok(receipt),
                Ok(Some(_)) => return Err(SubmissionError::Reverted { tx_hash: Some(tx_hash) }),
                Ok(None) => {}
                Err(e) => {
                    debug!(tx_hash = %tx_hash, error = %e, "Receipt query failed");
                }
            }

            if waited >= timeout {
                return Err(SubmissionError::Timeout { tx_hash, waited });
            }
            let step = interval.min(timeout - waited);
            sleeper.sleep(step).await;
            waited += step;
        }
    }

    /// First previously broadcast hash that has since been mined successfully
    async fn find_landed<C: ChainClient + ?Sized>(
        &self,
        client: &C,
        sent: &[(B256, u128)],
    ) -> Option<(TxReceiptSummary, u128)> {
        for (hash, gas_price) in sent {
            if let Ok(Some(receipt)) = client.receipt(*hash).await {
                if receipt.success {
                    return Some((receipt, *gas_price));
                }
            }
        }
        None
    }

    fn finish(
        &self,
        receipt: TxReceiptSummary,
        attempts: u32,
        gas_price: u128,
    ) -> Result<ConfirmedReceipt, SubmissionError> {
        Ok(ConfirmedReceipt {
            tx_hash: receipt.tx_hash,
            block_number: receipt.block_number,
            attempts: attempts.max(1),
            gas_price,
        })
    }
}
