//! Retry and fee escalation for transaction submission
//!
//! Provides exponential backoff, gas price bumping, and RPC error classification.

use std::time::Duration;

use tracing::debug;

use crate::error::SubmissionError;

/// Basis points in 1.0x
pub const BPS_DENOMINATOR: u32 = 10_000;

/// Transaction retry policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (the first send counts as one)
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_backoff: Duration,
    /// Upper bound for any single delay
    pub max_backoff: Duration,
    /// Gas price increase per retry, in basis points of the base price
    pub fee_bump_bps: u32,
    /// Maximum gas price multiplier, in basis points (30_000 = 3x)
    pub max_fee_multiplier_bps: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(60),
            fee_bump_bps: 2_000, // 20% gas increase per retry
            max_fee_multiplier_bps: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Backoff after the given failed attempt (0-indexed); doubles every attempt
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// All delays slept by a submission that fails every attempt
    pub fn backoff_schedule(&self) -> Vec<Duration> {
        (0..self.max_attempts.saturating_sub(1))
            .map(|attempt| self.backoff_for_attempt(attempt))
            .collect()
    }

    /// Fee multiplier for the given attempt: `1 + attempt * bump`, capped
    pub fn fee_multiplier_bps(&self, attempt: u32) -> u32 {
        let bumped = BPS_DENOMINATOR.saturating_add(attempt.saturating_mul(self.fee_bump_bps));
        bumped.min(self.max_fee_multiplier_bps.max(BPS_DENOMINATOR))
    }

    /// Calculate gas price for a given attempt
    pub fn gas_price_for_attempt(&self, base_gas_price: u128, attempt: u32) -> u128 {
        base_gas_price.saturating_mul(self.fee_multiplier_bps(attempt) as u128)
            / BPS_DENOMINATOR as u128
    }

    /// Whether the multiplier still grows on the last allowed attempt
    pub fn escalates_every_attempt(&self) -> bool {
        if self.max_attempts <= 1 {
            return true;
        }
        self.fee_bump_bps > 0
            && self.fee_multiplier_bps(self.max_attempts - 1)
                > self.fee_multiplier_bps(self.max_attempts - 2)
    }
}

/// Per-transaction retry state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    /// Attempts made so far
    pub attempt: u32,
    /// Delay before the next attempt
    pub delay: Duration,
    /// Fee multiplier of the next attempt, in basis points
    pub fee_multiplier_bps: u32,
}

impl RetryState {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 0,
            delay: policy.initial_backoff,
            fee_multiplier_bps: policy.fee_multiplier_bps(0),
        }
    }

    /// Record a failed attempt. Returns the delay to sleep before the next
    /// attempt, or `None` once the attempt budget is spent.
    pub fn record_failure(&mut self, policy: &RetryPolicy) -> Option<Duration> {
        let failed = self.attempt;
        self.attempt += 1;
        if self.attempt >= policy.max_attempts {
            return None;
        }
        let delay = policy.backoff_for_attempt(failed);
        self.delay = policy.backoff_for_attempt(self.attempt);
        self.fee_multiplier_bps = policy.fee_multiplier_bps(self.attempt);
        debug!(
            attempt = self.attempt,
            ?delay,
            fee_multiplier_bps = self.fee_multiplier_bps,
            "Scheduling retry"
        );
        Some(delay)
    }
}

/// Classifies RPC errors for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Temporary failure (RPC timeout, network issues)
    Transient,
    /// Provider refused a log query over too many blocks or results
    RangeTooLarge,
    /// Transaction underpriced, retry with higher gas
    Underpriced,
    /// Nonce already used or replaced
    NonceConflict,
    /// Execution rejected by the contract
    Reverted,
    /// Permanent failure (bad signature, no funds)
    Permanent,
    Unknown,
}

/// Classify an RPC error message
pub fn classify_error(error: &str) -> ErrorClass {
    let error_lower = error.to_lowercase();

    // Log range limits differ per provider
    if error_lower.contains("block range")
        || error_lower.contains("range too large")
        || error_lower.contains("query returned more than")
        || error_lower.contains("exceed maximum block range")
        || error_lower.contains("too many blocks")
        || error_lower.contains("response size exceeded")
        || error_lower.contains("log response size")
        || error_lower.contains("limit exceeded")
    {
        return ErrorClass::RangeTooLarge;
    }

    if error_lower.contains("underpriced")
        || error_lower.contains("gas price too low")
        || error_lower.contains("max fee per gas less than")
        || error_lower.contains("fee too low")
    {
        return ErrorClass::Underpriced;
    }

    if error_lower.contains("nonce too low")
        || error_lower.contains("nonce too high")
        || error_lower.contains("already known")
        || error_lower.contains("invalid nonce")
    {
        return ErrorClass::NonceConflict;
    }

    if error_lower.contains("reverted") || error_lower.contains("revert") {
        return ErrorClass::Reverted;
    }

    if error_lower.contains("insufficient funds")
        || error_lower.contains("invalid signature")
        || error_lower.contains("intrinsic gas too low")
        || error_lower.contains("invalid sender")
    {
        return ErrorClass::Permanent;
    }

    if error_lower.contains("timeout")
        || error_lower.contains("timed out")
        || error_lower.contains("connection")
        || error_lower.contains("network")
        || error_lower.contains("rate limit")
        || error_lower.contains("too many requests")
        || error_lower.contains("429")
        || error_lower.contains("503")
        || error_lower.contains("502")
        || error_lower.contains("temporarily unavailable")
    {
        return ErrorClass::Transient;
    }

    ErrorClass::Unknown
}

/// Map a broadcast failure onto the submission taxonomy
pub fn submission_error_from_rpc(error: &str) -> SubmissionError {
    match classify_error(error) {
        ErrorClass::Underpriced => SubmissionError::Underpriced(error.to_string()),
        ErrorClass::NonceConflict => SubmissionError::NonceConflict(error.to_string()),
        ErrorClass::Reverted => SubmissionError::Reverted { tx_hash: None },
        ErrorClass::Transient => SubmissionError::Transport(error.to_string()),
        // Only recognised network failures may stall the batch
        ErrorClass::Permanent | ErrorClass::RangeTooLarge | ErrorClass::Unknown => {
            SubmissionError::Rejected(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.backoff_for_attempt(0), Duration::from_secs(5));
        assert_eq!(policy.backoff_for_attempt(1), Duration::from_secs(10));
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_secs(20));
        assert_eq!(policy.backoff_for_attempt(3), Duration::from_secs(40));
        assert_eq!(policy.backoff_for_attempt(4), Duration::from_secs(60)); // capped
        assert_eq!(policy.backoff_for_attempt(64), Duration::from_secs(60));
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.backoff_schedule(),
            vec![Duration::from_secs(5), Duration::from_secs(10)]
        );
    }

    #[test]
    fn test_gas_bump() {
        let policy = RetryPolicy::default();
        let base = 1_000_000_000u128; // 1 gwei

        assert_eq!(policy.gas_price_for_attempt(base, 0), base);
        assert_eq!(policy.gas_price_for_attempt(base, 1), 1_200_000_000); // +20%
        assert_eq!(policy.gas_price_for_attempt(base, 2), 1_400_000_000); // +40%
        assert_eq!(policy.gas_price_for_attempt(base, 20), 3_000_000_000); // capped at 3x
    }

    #[test]
    fn test_escalation_check() {
        assert!(RetryPolicy::default().escalates_every_attempt());

        let capped = RetryPolicy {
            max_attempts: 20,
            ..RetryPolicy::default()
        };
        assert!(!capped.escalates_every_attempt());

        let flat = RetryPolicy {
            fee_bump_bps: 0,
            ..RetryPolicy::default()
        };
        assert!(!flat.escalates_every_attempt());
    }

    #[test]
    fn test_retry_state_bounded() {
        let policy = RetryPolicy::default();
        let mut state = RetryState::new(&policy);
        assert_eq!(state.fee_multiplier_bps, 10_000);

        assert_eq!(state.record_failure(&policy), Some(Duration::from_secs(5)));
        assert_eq!(state.fee_multiplier_bps, 12_000);
        assert_eq!(state.record_failure(&policy), Some(Duration::from_secs(10)));
        assert_eq!(state.fee_multiplier_bps, 14_000);
        assert_eq!(state.record_failure(&policy), None);
        assert_eq!(state.attempt, 3);
    }

    #[test]
    fn test_error_classification() {
        assert_eq!(classify_error("connection timeout"), ErrorClass::Transient);
        assert_eq!(
            classify_error("replacement transaction underpriced"),
            ErrorClass::Underpriced
        );
        assert_eq!(classify_error("nonce too low"), ErrorClass::NonceConflict);
        assert_eq!(classify_error("execution reverted"), ErrorClass::Reverted);
        assert_eq!(
            classify_error("query returned more than 10000 results"),
            ErrorClass::RangeTooLarge
        );
        assert_eq!(
            classify_error("eth_getLogs is limited to a 2048 block range"),
            ErrorClass::RangeTooLarge
        );
        assert_eq!(
            classify_error("insufficient funds for gas * price + value"),
            ErrorClass::Permanent
        );
        assert_eq!(classify_error("some unknown error"), ErrorClass::Unknown);
    }

    #[test]
    fn test_submission_error_mapping() {
        assert!(matches!(
            submission_error_from_rpc("transaction underpriced"),
            SubmissionError::Underpriced(_)
        ));
        assert!(matches!(
            submission_error_from_rpc("nonce too low: next nonce 5"),
            SubmissionError::NonceConflict(_)
        ));
        assert_eq!(
            submission_error_from_rpc("execution reverted: not admin"),
            SubmissionError::Reverted { tx_hash: None }
        );
        assert!(matches!(
            submission_error_from_rpc("error sending request: connection refused"),
            SubmissionError::Transport(_)
        ));
    }

    #[test]
    fn test_node_rejections_are_terminal() {
        for message in [
            "insufficient funds for gas * price + value",
            "invalid sender",
            "intrinsic gas too low",
            "exceeds block gas limit",
            "tx fee (1.20 ether) exceeds the configured cap (1.00 ether)",
        ] {
            let err = submission_error_from_rpc(message);
            assert!(
                matches!(err, SubmissionError::Rejected(_)),
                "{message} mapped to {err:?}"
            );
            assert!(!err.is_retryable(), "{message}");
            assert!(!err.is_connectivity(), "{message}");
        }
    }
}
