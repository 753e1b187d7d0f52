//! Event source adapter
//!
//! Fetches the logs of one bridge event over a block range and decodes them
//! into [`BridgeEvent`]s, ordered by block number then log index.

use alloy::primitives::Address;
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use tracing::{debug, warn};

use crate::chain::{ChainClient, LogQuery};
use crate::contracts::{event_signature, DestinationBridge, SourceBridge};
use crate::error::RelayError;
use crate::types::{BridgeEvent, EventKind};

/// Decoded events of one scan, plus how many logs were dropped as malformed
#[derive(Debug, Default)]
pub struct EventBatch {
    pub events: Vec<BridgeEvent>,
    pub decode_failures: usize,
}

/// Reads bridge events from one contract
#[derive(Debug, Clone, Copy)]
pub struct EventSource {
    contract: Address,
}

impl EventSource {
    pub fn new(contract: Address) -> Self {
        Self { contract }
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    /// Events of `kind` emitted in `[from_block, to_block]`.
    ///
    /// An empty range yields an empty batch without querying the chain.
    /// `RangeTooLarge` from the provider is passed through untouched.
    pub async fn get_events<C: ChainClient + ?Sized>(
        &self,
        client: &C,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<EventBatch, RelayError> {
        if from_block > to_block {
            return Ok(EventBatch::default());
        }

        let topic0 = event_signature(kind);
        let logs = client
            .get_logs(&LogQuery {
                address: self.contract,
                topic0,
                from_block,
                to_block,
            })
            .await?;

        let mut batch = EventBatch::default();
        for log in &logs {
            if log.removed {
                continue;
            }
            if log.address() != self.contract || log.topic0() != Some(&topic0) {
                continue;
            }
            match decode_log(kind, log) {
                Ok(event) => batch.events.push(event),
                Err(e) => {
                    warn!(
                        chain = %client.side(),
                        tx_hash = ?log.transaction_hash,
                        log_index = ?log.log_index,
                        error = %e,
                        "Skipping malformed log"
                    );
                    batch.decode_failures += 1;
                }
            }
        }

        batch.events.sort_by_key(BridgeEvent::position);

        debug!(
            chain = %client.side(),
            kind = %kind,
            from_block,
            to_block,
            logs = logs.len(),
            events = batch.events.len(),
            "Fetched events"
        );

        Ok(batch)
    }
}

/// Decode one `Deposit` or `Unwrap` log
pub fn decode_log(kind: EventKind, log: &Log) -> Result<BridgeEvent, RelayError> {
    let decode_error = |message: String| RelayError::EventDecode {
        kind: kind.to_string(),
        message,
    };

    let block_number = log
        .block_number
        .ok_or_else(|| decode_error("missing block number".into()))?;
    let log_index = log
        .log_index
        .ok_or_else(|| decode_error("missing log index".into()))?;
    let tx_hash = log
        .transaction_hash
        .ok_or_else(|| decode_error("missing transaction hash".into()))?;

    let (token, recipient, amount) = match kind {
        EventKind::Deposit => {
            let e = SourceBridge::Deposit::decode_log_data(log.data(), true)
                .map_err(|e| decode_error(e.to_string()))?;
            (e.token, e.recipient, e.amount)
        }
        EventKind::Unwrap => {
            let e = DestinationBridge::Unwrap::decode_log_data(log.data(), true)
                .map_err(|e| decode_error(e.to_string()))?;
            (e.token, e.recipient, e.amount)
        }
    };

    Ok(BridgeEvent {
        kind,
        token,
        recipient,
        amount,
        block_number,
        log_index,
        tx_hash,
    })
}
