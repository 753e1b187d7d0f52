//! Common types for the relay
//!
//! Chain sides, decoded bridge events and the transaction values built from them.

use std::fmt;
use std::str::FromStr;

use alloy::json_abi::JsonAbi;
use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::contracts::ContractCall;

// ============================================================================
// Chain sides
// ============================================================================

/// One of the two chains the relay watches
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainSide {
    Source,
    Destination,
}

impl ChainSide {
    pub const ALL: [ChainSide; 2] = [ChainSide::Source, ChainSide::Destination];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChainSide::Source => "source",
            ChainSide::Destination => "destination",
        }
    }

    pub fn opposite(&self) -> ChainSide {
        match self {
            ChainSide::Source => ChainSide::Destination,
            ChainSide::Destination => ChainSide::Source,
        }
    }

    /// Event kind emitted by this side's contract that the relay mirrors
    pub fn watched_event(&self) -> EventKind {
        match self {
            ChainSide::Source => EventKind::Deposit,
            ChainSide::Destination => EventKind::Unwrap,
        }
    }
}

impl fmt::Display for ChainSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChainSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source" => Ok(ChainSide::Source),
            "destination" => Ok(ChainSide::Destination),
            other => Err(format!("unknown chain: {other}")),
        }
    }
}

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Deposit,
    Unwrap,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Deposit => "Deposit",
            EventKind::Unwrap => "Unwrap",
        }
    }

    /// Chain whose contract emits this event
    pub fn emitted_on(&self) -> ChainSide {
        match self {
            EventKind::Deposit => ChainSide::Source,
            EventKind::Unwrap => ChainSide::Destination,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A decoded Deposit or Unwrap log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeEvent {
    pub kind: EventKind,
    pub token: Address,
    pub recipient: Address,
    pub amount: U256,
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: B256,
}

impl BridgeEvent {
    /// Position used to order events: block number, then log index
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }

    pub fn id(&self) -> EventId {
        EventId {
            chain: self.kind.emitted_on(),
            tx_hash: self.tx_hash,
            log_index: self.log_index,
        }
    }

    /// The call issued on the opposite chain in response to this event
    pub fn mirrored_call(&self) -> ContractCall {
        match self.kind {
            EventKind::Deposit => ContractCall::Wrap {
                token: self.token,
                recipient: self.recipient,
                amount: self.amount,
            },
            EventKind::Unwrap => ContractCall::Withdraw {
                token: self.token,
                recipient: self.recipient,
                amount: self.amount,
            },
        }
    }
}

/// Identity of an observed log, unique per chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId {
    pub chain: ChainSide,
    pub tx_hash: B256,
    pub log_index: u64,
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.chain, self.tx_hash, self.log_index)
    }
}

// ============================================================================
// Endpoints and transactions
// ============================================================================

/// Everything needed to reach one chain. Immutable after startup.
#[derive(Debug, Clone)]
pub struct ChainEndpoint {
    pub side: ChainSide,
    /// Primary RPC URL followed by fallbacks
    pub rpc_urls: Vec<String>,
    pub chain_id: u64,
    pub contract: Address,
    pub abi: JsonAbi,
}

/// A state-changing call ready to be signed and broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransaction {
    pub target: ChainSide,
    pub contract: Address,
    pub call: ContractCall,
    pub sender: Address,
    pub nonce: u64,
    pub gas_limit: u64,
    pub gas_price: u128,
    pub chain_id: u64,
}

/// The parts of a receipt the relay cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceiptSummary {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
    pub success: bool,
}
