//! Transaction writers: signing, fee escalation and confirmation of mirrored calls

pub mod evm;
pub mod retry;

pub use evm::{ConfirmedReceipt, Signer, SubmitterConfig, TransactionSubmitter};
pub use retry::{classify_error, ErrorClass, RetryPolicy, RetryState};
