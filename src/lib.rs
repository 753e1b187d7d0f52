//! Bridge Relay - Library interface
//!
//! Re-exports internal modules for use in integration tests.

pub mod api;
pub mod bounded_cache;
pub mod chain;
pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod contracts;
pub mod error;
pub mod metrics;
pub mod relay;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;
pub mod watchers;
pub mod writers;
