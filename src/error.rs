//! Error taxonomy for the relay
//!
//! Errors are split by how the relay reacts to them:
//! - `Configuration` is fatal and never retried
//! - `Connectivity` is retried by the connector and escalates after repeated failure
//! - `RangeTooLarge` shrinks the scan window and never reaches the operator
//! - `Submission` is scoped to a single mirrored transaction; only its
//!   `Transport` failures count as connectivity
//! - `EventDecode` skips one log and the batch continues

use std::time::Duration;

use alloy::primitives::B256;
use thiserror::Error;

use crate::types::ChainSide;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RelayError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{chain} endpoint reports chain id {actual}, expected {expected}")]
    ChainIdMismatch {
        chain: ChainSide,
        expected: u64,
        actual: u64,
    },

    #[error("connectivity error on {chain}: {message}")]
    Connectivity { chain: ChainSide, message: String },

    #[error("log query {from_block}..={to_block} on {chain} exceeds provider limits")]
    RangeTooLarge {
        chain: ChainSide,
        from_block: u64,
        to_block: u64,
    },

    #[error("submission on {chain} failed: {source}")]
    Submission {
        chain: ChainSide,
        #[source]
        source: SubmissionError,
    },

    #[error("failed to decode {kind} log: {message}")]
    EventDecode { kind: String, message: String },
}

impl RelayError {
    /// Errors that must stop the process instead of being retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RelayError::Configuration(_) | RelayError::ChainIdMismatch { .. }
        )
    }

    pub fn is_connectivity(&self) -> bool {
        matches!(self, RelayError::Connectivity { .. })
    }

    /// Chain whose connection should be re-established after this error, if any.
    pub fn chain(&self) -> Option<ChainSide> {
        match self {
            RelayError::ChainIdMismatch { chain, .. }
            | RelayError::Connectivity { chain, .. }
            | RelayError::RangeTooLarge { chain, .. }
            | RelayError::Submission { chain, .. } => Some(*chain),
            RelayError::Configuration(_) | RelayError::EventDecode { .. } => None,
        }
    }

    pub fn connectivity(chain: ChainSide, message: impl Into<String>) -> Self {
        RelayError::Connectivity {
            chain,
            message: message.into(),
        }
    }
}

/// Failure of one mirrored transaction.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubmissionError {
    #[error("nonce conflict: {0}")]
    NonceConflict(String),

    #[error("transaction underpriced: {0}")]
    Underpriced(String),

    #[error("execution reverted{}", .tx_hash.map(|h| format!(" in {h}")).unwrap_or_default())]
    Reverted { tx_hash: Option<B256> },

    #[error("transaction {tx_hash} not confirmed after {waited:?}")]
    Timeout { tx_hash: B256, waited: Duration },

    #[error("transport failure: {0}")]
    Transport(String),

    /// Refused by the node before execution, e.g. no funds or over the gas cap
    #[error("transaction rejected: {0}")]
    Rejected(String),

    #[error("failed to sign transaction: {0}")]
    Signing(String),

    #[error("gave up after {attempts} attempts, last error: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<SubmissionError>,
    },
}

impl SubmissionError {
    /// Reverted calls are logically rejected; retrying them only burns fees.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            SubmissionError::Reverted { .. }
                | SubmissionError::Rejected(_)
                | SubmissionError::Signing(_)
                | SubmissionError::Exhausted { .. }
        )
    }

    /// The endpoint was unreachable, either directly or as the last failure
    /// before retries ran out.
    pub fn is_connectivity(&self) -> bool {
        match self {
            SubmissionError::Transport(_) => true,
            SubmissionError::Exhausted { last, .. } => last.is_connectivity(),
            _ => false,
        }
    }

    /// Short label used for metrics and log fields.
    pub fn outcome(&self) -> &'static str {
        match self {
            SubmissionError::NonceConflict(_) => "nonce_conflict",
            SubmissionError::Underpriced(_) => "underpriced",
            SubmissionError::Reverted { .. } => "reverted",
            SubmissionError::Timeout { .. } => "timeout",
            SubmissionError::Transport(_) => "transport",
            SubmissionError::Rejected(_) => "rejected",
            SubmissionError::Signing(_) => "signing",
            SubmissionError::Exhausted { .. } => "exhausted",
        }
    }
}
