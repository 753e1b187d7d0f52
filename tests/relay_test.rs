//! End-to-end relay tests against in-memory chains
//!
//! Run with: cargo test --features testing --test relay_test

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{address, Address, U256};
use bridge_relay::checkpoint::{CheckpointStore, JsonFileCheckpointStore, MemoryCheckpointStore};
use bridge_relay::contracts::ContractCall;
use bridge_relay::error::{RelayError, SubmissionError};
use bridge_relay::relay::{RelaySetup, Relayer};
use bridge_relay::testing::{
    bridge_log, relay_setup, MockChain, MockConnector, RecordingSleeper, DESTINATION_CONTRACT,
    SOURCE_CONTRACT,
};
use bridge_relay::types::{ChainSide, EventKind};
use bridge_relay::writers::retry::submission_error_from_rpc;
use tokio::sync::mpsc;

const SOURCE_CHAIN_ID: u64 = 43113;
const DESTINATION_CHAIN_ID: u64 = 97;
const TOKEN: Address = address!("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
const RECIPIENT: Address = address!("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");

// ============================================================================
// Helpers
// ============================================================================

struct Harness {
    source: MockChain,
    destination: MockChain,
    connector: MockConnector,
    sleeper: RecordingSleeper,
}

impl Harness {
    fn new(source_head: u64, destination_head: u64) -> Self {
        let source = MockChain::new(ChainSide::Source, SOURCE_CHAIN_ID, source_head);
        let destination =
            MockChain::new(ChainSide::Destination, DESTINATION_CHAIN_ID, destination_head);
        Self {
            connector: MockConnector::new(source.clone(), destination.clone()),
            source,
            destination,
            sleeper: RecordingSleeper::default(),
        }
    }

    fn deposit(&self, amount: u64, block: u64, log_index: u64) {
        self.source.push_log(bridge_log(
            EventKind::Deposit,
            SOURCE_CONTRACT,
            TOKEN,
            RECIPIENT,
            U256::from(amount),
            block,
            log_index,
        ));
    }

    fn unwrap_event(&self, amount: u64, block: u64, log_index: u64) {
        self.destination.push_log(bridge_log(
            EventKind::Unwrap,
            DESTINATION_CONTRACT,
            TOKEN,
            RECIPIENT,
            U256::from(amount),
            block,
            log_index,
        ));
    }

    async fn start(
        &self,
        setup: RelaySetup,
        store: Arc<dyn CheckpointStore>,
    ) -> Result<Relayer<MockConnector>, RelayError> {
        Relayer::start(
            self.connector.clone(),
            setup,
            store,
            Arc::new(self.sleeper.clone()),
        )
        .await
    }
}

fn setup() -> RelaySetup {
    relay_setup(SOURCE_CHAIN_ID, DESTINATION_CHAIN_ID)
}

/// Both chains already scanned up to `source` / `destination`
fn store_at(source: u64, destination: u64) -> Arc<MemoryCheckpointStore> {
    Arc::new(
        MemoryCheckpointStore::new()
            .with_checkpoint(ChainSide::Source, source)
            .with_checkpoint(ChainSide::Destination, destination),
    )
}

fn amounts(calls: &[ContractCall]) -> Vec<u64> {
    calls
        .iter()
        .map(|call| match call {
            ContractCall::Wrap { amount, .. } | ContractCall::Withdraw { amount, .. } => {
                amount.to::<u64>()
            }
        })
        .collect()
}

// ============================================================================
// Relaying
// ============================================================================

#[tokio::test]
async fn test_deposit_mirrored_as_wrap() {
    let h = Harness::new(1005, 500);
    h.deposit(100, 1000, 0);
    let store = Arc::new(MemoryCheckpointStore::new());

    let mut relayer = h.start(setup(), store.clone()).await.unwrap();
    // Started ten blocks behind the safe head
    assert_eq!(relayer.checkpoint(ChainSide::Source), 993);
    relayer.run_cycle().await.unwrap();

    assert_eq!(
        h.destination.submitted_calls(),
        vec![ContractCall::Wrap {
            token: TOKEN,
            recipient: RECIPIENT,
            amount: U256::from(100u64),
        }]
    );
    assert!(h.source.submitted_calls().is_empty());
    assert!(relayer.checkpoint(ChainSide::Source) >= 1000);
    assert_eq!(store.get(ChainSide::Source), Some(1004));

    let stats = relayer.stats().read().await.clone();
    assert_eq!(stats.relayed, 1);
    assert_eq!(stats.cycles, 1);
    assert_eq!(stats.source_checkpoint, 1004);
}

#[tokio::test]
async fn test_unwrap_mirrored_as_withdraw() {
    let h = Harness::new(100, 60);
    h.unwrap_event(42, 55, 3);

    let mut relayer = h.start(setup(), store_at(99, 50)).await.unwrap();
    relayer.run_cycle().await.unwrap();

    assert_eq!(
        h.source.submitted_calls(),
        vec![ContractCall::Withdraw {
            token: TOKEN,
            recipient: RECIPIENT,
            amount: U256::from(42u64),
        }]
    );
    let sent = h.source.sent_transactions();
    assert_eq!(sent[0].chain_id, SOURCE_CHAIN_ID);
    assert_eq!(sent[0].contract, SOURCE_CONTRACT);
    assert_eq!(relayer.checkpoint(ChainSide::Destination), 59);
}

#[tokio::test]
async fn test_events_relayed_in_chain_order() {
    let h = Harness::new(20, 20);
    h.deposit(71, 7, 1);
    h.deposit(50, 5, 0);
    h.deposit(70, 7, 0);

    let mut relayer = h.start(setup(), store_at(0, 19)).await.unwrap();
    relayer.run_cycle().await.unwrap();

    assert_eq!(amounts(&h.destination.submitted_calls()), vec![50, 70, 71]);
    let nonces: Vec<u64> = h
        .destination
        .sent_transactions()
        .iter()
        .map(|tx| tx.nonce)
        .collect();
    assert_eq!(nonces, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_head_block_waits_for_finality() {
    let h = Harness::new(1005, 500);
    h.deposit(1, 1005, 0);

    let mut relayer = h.start(setup(), store_at(1000, 499)).await.unwrap();
    relayer.run_cycle().await.unwrap();
    assert!(h.destination.submitted_calls().is_empty());
    assert_eq!(relayer.checkpoint(ChainSide::Source), 1004);

    h.source.set_head(1006);
    relayer.run_cycle().await.unwrap();
    assert_eq!(amounts(&h.destination.submitted_calls()), vec![1]);
}

#[tokio::test]
async fn test_idle_cycle_is_idempotent() {
    let h = Harness::new(200, 200);
    let mut relayer = h.start(setup(), store_at(150, 150)).await.unwrap();

    relayer.run_cycle().await.unwrap();
    let queries = h.source.log_queries().len();
    assert_eq!(queries, 1);
    assert_eq!(relayer.checkpoint(ChainSide::Source), 199);

    // Head unchanged: nothing to scan, nothing moves
    relayer.run_cycle().await.unwrap();
    assert_eq!(h.source.log_queries().len(), queries);
    assert_eq!(relayer.checkpoint(ChainSide::Source), 199);
    assert!(h.destination.send_attempts().is_empty());
}

#[tokio::test]
async fn test_duplicate_log_relayed_once() {
    let h = Harness::new(20, 20);
    h.deposit(9, 10, 0);
    h.deposit(9, 10, 0);

    let mut relayer = h.start(setup(), store_at(0, 19)).await.unwrap();
    relayer.run_cycle().await.unwrap();

    assert_eq!(h.destination.submitted_calls().len(), 1);
    assert_eq!(relayer.stats().read().await.duplicates_skipped, 1);
}

#[tokio::test]
async fn test_dry_run_sends_nothing() {
    let h = Harness::new(20, 20);
    h.deposit(5, 10, 0);
    let mut setup = setup();
    setup.relay.dry_run = true;

    let mut relayer = h.start(setup, store_at(0, 19)).await.unwrap();
    relayer.run_cycle().await.unwrap();

    assert!(h.destination.send_attempts().is_empty());
    assert!(h.destination.preflight_calls().is_empty());
    assert_eq!(relayer.checkpoint(ChainSide::Source), 19);
    let stats = relayer.stats().read().await.clone();
    assert!(stats.dry_run);
    assert_eq!(stats.relayed, 0);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_failed_event_does_not_block_batch() {
    let h = Harness::new(20, 20);
    h.deposit(3, 3, 0);
    h.deposit(6, 6, 0);
    h.destination
        .push_send_result(Err(SubmissionError::Reverted { tx_hash: None }));

    let mut relayer = h.start(setup(), store_at(0, 19)).await.unwrap();
    relayer.run_cycle().await.unwrap();

    assert_eq!(amounts(&h.destination.submitted_calls()), vec![6]);
    assert_eq!(relayer.checkpoint(ChainSide::Source), 19);
    let stats = relayer.stats().read().await.clone();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.relayed, 1);
}

#[tokio::test]
async fn test_unrecognised_rejection_skips_event() {
    let h = Harness::new(20, 20);
    h.deposit(5, 5, 0);
    h.deposit(8, 8, 0);
    h.destination
        .push_send_result(Err(submission_error_from_rpc("exceeds block gas limit")));

    let mut relayer = h.start(setup(), store_at(0, 19)).await.unwrap();
    relayer.run_cycle().await.unwrap();

    assert_eq!(amounts(&h.destination.submitted_calls()), vec![8]);
    assert_eq!(h.destination.send_attempts().len(), 2);
    assert_eq!(relayer.checkpoint(ChainSide::Source), 19);
    assert_eq!(h.connector.connect_count(ChainSide::Destination), 1);
    let stats = relayer.stats().read().await.clone();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.relayed, 1);
}

#[tokio::test]
async fn test_retries_bounded_per_event() {
    let h = Harness::new(20, 20);
    h.deposit(3, 3, 0);
    h.destination
        .fail_sends_with(SubmissionError::Underpriced("transaction underpriced".into()));

    let mut relayer = h.start(setup(), store_at(0, 19)).await.unwrap();
    relayer.run_cycle().await.unwrap();

    let attempts = h.destination.send_attempts();
    assert_eq!(attempts.len(), 3);
    assert!(attempts.windows(2).all(|w| w[1].gas_price > w[0].gas_price));
    assert_eq!(
        h.sleeper.calls(),
        vec![Duration::from_secs(5), Duration::from_secs(10)]
    );
    assert_eq!(relayer.stats().read().await.failed, 1);
    assert_eq!(relayer.checkpoint(ChainSide::Source), 19);
}

#[tokio::test]
async fn test_range_too_large_shrinks_window() {
    let h = Harness::new(101, 20);
    h.source.set_max_log_range(25);
    h.deposit(10, 10, 0);
    let mut setup = setup();
    setup.relay.max_block_range = 50;

    let mut relayer = h.start(setup, store_at(0, 19)).await.unwrap();
    relayer.run_cycle().await.unwrap();

    assert!(relayer.window_width(ChainSide::Source) <= 25);
    assert_eq!(relayer.checkpoint(ChainSide::Source), 25);
    assert_eq!(amounts(&h.destination.submitted_calls()), vec![10]);

    for _ in 0..3 {
        relayer.run_cycle().await.unwrap();
    }
    assert_eq!(relayer.checkpoint(ChainSide::Source), 100);

    // Accepted windows tile the range with no gap or overlap
    let accepted: Vec<_> = h
        .source
        .log_queries()
        .into_iter()
        .filter(|q| q.to_block - q.from_block < 25)
        .collect();
    assert_eq!(accepted.first().map(|q| q.from_block), Some(1));
    assert!(accepted
        .windows(2)
        .all(|w| w[1].from_block == w[0].to_block + 1));
    assert_eq!(accepted.last().map(|q| q.to_block), Some(100));
}

#[tokio::test]
async fn test_connectivity_failure_keeps_partial_progress() {
    let h = Harness::new(11, 20);
    h.deposit(5, 5, 0);
    h.deposit(8, 8, 0);
    h.destination.push_send_result(Ok(()));
    h.destination
        .fail_sends_with(SubmissionError::Transport("connection reset".into()));
    let store = store_at(0, 19);

    let mut relayer = h.start(setup(), store.clone()).await.unwrap();
    assert_eq!(h.connector.connect_count(ChainSide::Destination), 1);
    relayer.run_cycle().await.unwrap();

    // First event landed, second one's block is left for the next cycle
    assert_eq!(amounts(&h.destination.submitted_calls()), vec![5]);
    assert_eq!(relayer.checkpoint(ChainSide::Source), 7);
    assert_eq!(store.get(ChainSide::Source), Some(7));
    assert_eq!(h.connector.connect_count(ChainSide::Destination), 2);
    assert_eq!(relayer.stats().read().await.reconnects, 1);

    h.destination.clear_send_failures();
    relayer.run_cycle().await.unwrap();
    assert_eq!(amounts(&h.destination.submitted_calls()), vec![5, 8]);
    assert_eq!(relayer.checkpoint(ChainSide::Source), 10);
}

#[tokio::test]
async fn test_startup_retries_connect() {
    let h = Harness::new(20, 20);
    h.connector.fail_connects(ChainSide::Source, 2);

    let relayer = h.start(setup(), store_at(0, 0)).await;
    tokio_test::assert_ok!(&relayer);
    assert_eq!(h.connector.connect_count(ChainSide::Source), 3);
    assert_eq!(
        h.sleeper.calls(),
        vec![Duration::from_secs(5), Duration::from_secs(10)]
    );
}

#[tokio::test]
async fn test_chain_id_mismatch_is_fatal() {
    let h = Harness::new(20, 20);
    let setup = relay_setup(SOURCE_CHAIN_ID, 56);

    let err = h.start(setup, store_at(0, 0)).await.err().unwrap();
    assert!(err.is_fatal());
    assert!(matches!(
        err,
        RelayError::ChainIdMismatch {
            chain: ChainSide::Destination,
            expected: 56,
            actual: DESTINATION_CHAIN_ID,
        }
    ));
    // Never retried
    assert_eq!(h.connector.connect_count(ChainSide::Destination), 1);
}

#[tokio::test]
async fn test_failed_reconnect_surfaces() {
    let h = Harness::new(20, 20);
    let mut relayer = h.start(setup(), store_at(0, 0)).await.unwrap();

    h.source.set_offline(true);
    let err = relayer.run_cycle().await.unwrap_err();
    assert!(err.is_connectivity());
    assert_eq!(err.chain(), Some(ChainSide::Source));
    // The destination half still ran
    assert_eq!(relayer.checkpoint(ChainSide::Destination), 19);
    assert_eq!(relayer.checkpoint(ChainSide::Source), 0);
    // Initial connect plus the full reconnect budget
    assert_eq!(h.connector.connect_count(ChainSide::Source), 6);
}

// ============================================================================
// Loop control and persistence
// ============================================================================

#[tokio::test]
async fn test_bounded_run_exits_cleanly() {
    let h = Harness::new(20, 20);
    let mut setup = setup();
    setup.relay.max_iterations = Some(3);

    let mut relayer = h.start(setup, store_at(0, 0)).await.unwrap();
    let (_shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let stats = relayer.run(shutdown_rx).await.unwrap();

    assert_eq!(stats.cycles, 3);
    // No pause after the final cycle
    assert_eq!(
        h.sleeper.calls(),
        vec![Duration::from_secs(1), Duration::from_secs(1)]
    );
    assert_eq!(relayer.metrics().up.get(), 0);
}

#[tokio::test]
async fn test_shutdown_stops_unbounded_run() {
    let h = Harness::new(20, 20);
    let mut relayer = h.start(setup(), store_at(0, 0)).await.unwrap();

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    shutdown_tx.send(()).await.unwrap();
    let stats = relayer.run(shutdown_rx).await.unwrap();
    assert!(stats.cycles <= 1);
}

#[tokio::test]
async fn test_restart_resumes_from_checkpoint_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("relay_checkpoints.json");

    let h = Harness::new(300, 300);
    h.deposit(1, 295, 0);
    {
        let store = Arc::new(JsonFileCheckpointStore::new(&path));
        let mut relayer = h.start(setup(), store).await.unwrap();
        relayer.run_cycle().await.unwrap();
        assert_eq!(relayer.checkpoint(ChainSide::Source), 299);
    }

    // Same chains, new process: nothing is scanned or sent twice
    h.source.set_head(320);
    let store = Arc::new(JsonFileCheckpointStore::new(&path));
    let mut relayer = h.start(setup(), store).await.unwrap();
    assert_eq!(relayer.checkpoint(ChainSide::Source), 299);
    relayer.run_cycle().await.unwrap();

    assert_eq!(h.destination.submitted_calls().len(), 1);
    let last = h.source.log_queries().last().copied().unwrap();
    assert_eq!((last.from_block, last.to_block), (300, 319));
}
