//! Relay loop
//!
//! One cycle scans the source chain for `Deposit` events and mirrors each as a
//! `wrap` call on the destination, then scans the destination for `Unwrap`
//! events and mirrors each as a `withdraw` call on the source. Both halves run
//! sequentially so the admin account never has two submissions in flight.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::api::{RelayStats, SharedMetrics, SharedStats};
use crate::bounded_cache::{
    BoundedEventCache, DEFAULT_EVENT_CACHE_SIZE, DEFAULT_EVENT_CACHE_TTL_SECS,
};
use crate::chain::{connect_with_retry, ChainClient, Connector};
use crate::checkpoint::CheckpointStore;
use crate::clock::Sleeper;
use crate::error::RelayError;
use crate::metrics::Metrics;
use crate::types::{ChainEndpoint, ChainSide};
use crate::watchers::{BlockWindowTracker, EventSource, ScanWindow};
use crate::writers::{RetryPolicy, Signer, SubmitterConfig, TransactionSubmitter};

/// Loop behavior, independent of any chain
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Pause between cycles
    pub poll_interval: Duration,
    /// Stop after this many cycles; run forever when `None`
    pub max_iterations: Option<u64>,
    /// Initial and maximum scan window width, in blocks
    pub max_block_range: u64,
    /// Blocks behind the head to start from when no checkpoint is stored
    pub start_lookback_blocks: u64,
    /// Blocks behind the head considered final
    pub finality_blocks: u64,
    /// Backoff for (re)connecting to a chain
    pub reconnect: RetryPolicy,
    /// Log a progress line every N cycles
    pub heartbeat_cycles: u64,
    /// Detect and log events without signing anything
    pub dry_run: bool,
    pub event_cache_size: usize,
    pub event_cache_ttl: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_iterations: None,
            max_block_range: 2_000,
            start_lookback_blocks: 10,
            finality_blocks: 1,
            reconnect: RetryPolicy {
                max_attempts: 5,
                ..RetryPolicy::default()
            },
            heartbeat_cycles: 12,
            dry_run: false,
            event_cache_size: DEFAULT_EVENT_CACHE_SIZE,
            event_cache_ttl: Duration::from_secs(DEFAULT_EVENT_CACHE_TTL_SECS),
        }
    }
}

/// Everything the relay needs at startup. Immutable once the relay is built.
#[derive(Debug, Clone)]
pub struct RelaySetup {
    pub source: ChainEndpoint,
    pub destination: ChainEndpoint,
    pub signer: Signer,
    pub submitter: SubmitterConfig,
    pub relay: RelayConfig,
}

/// Connection and scan state of one chain
struct ChainHalf<Cl> {
    endpoint: ChainEndpoint,
    client: Cl,
    tracker: BlockWindowTracker,
    events: EventSource,
    /// Submits mirrored calls to this chain's contract
    submitter: TransactionSubmitter,
}

impl<Cl: ChainClient> ChainHalf<Cl> {
    fn side(&self) -> ChainSide {
        self.endpoint.side
    }
}

/// State shared by both halves
struct RelayContext {
    store: Arc<dyn CheckpointStore>,
    sleeper: Arc<dyn Sleeper>,
    seen: BoundedEventCache,
    metrics: SharedMetrics,
    stats: SharedStats,
    finality_blocks: u64,
    dry_run: bool,
}

pub struct Relayer<C: Connector> {
    connector: C,
    config: RelayConfig,
    source: ChainHalf<C::Client>,
    destination: ChainHalf<C::Client>,
    ctx: RelayContext,
}

impl<C: Connector> Relayer<C> {
    /// Connect both chains and restore (or derive) their checkpoints.
    ///
    /// Fails on configuration errors and when a chain cannot be reached within
    /// the reconnect policy.
    pub async fn start(
        connector: C,
        setup: RelaySetup,
        store: Arc<dyn CheckpointStore>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self, RelayError> {
        let RelaySetup {
            source,
            destination,
            signer,
            submitter,
            relay,
        } = setup;

        let source = Self::open_half(
            &connector,
            source,
            &signer,
            &submitter,
            &relay,
            store.as_ref(),
            sleeper.as_ref(),
        )
        .await?;
        let destination = Self::open_half(
            &connector,
            destination,
            &signer,
            &submitter,
            &relay,
            store.as_ref(),
            sleeper.as_ref(),
        )
        .await?;

        let metrics: SharedMetrics = Arc::new(Metrics::new());
        let stats: SharedStats = Arc::new(RwLock::new(RelayStats {
            source_checkpoint: source.tracker.last_processed_block(),
            destination_checkpoint: destination.tracker.last_processed_block(),
            dry_run: relay.dry_run,
            ..RelayStats::default()
        }));
        for half in [&source, &destination] {
            metrics.set_checkpoint(half.side(), half.tracker.last_processed_block());
            metrics.set_window_width(half.side(), half.tracker.max_width());
        }

        info!(
            source_checkpoint = source.tracker.last_processed_block(),
            destination_checkpoint = destination.tracker.last_processed_block(),
            admin = %signer.address(),
            dry_run = relay.dry_run,
            "Relay initialized"
        );

        Ok(Self {
            connector,
            ctx: RelayContext {
                store,
                sleeper,
                seen: BoundedEventCache::new(relay.event_cache_size, relay.event_cache_ttl),
                metrics,
                stats,
                finality_blocks: relay.finality_blocks,
                dry_run: relay.dry_run,
            },
            config: relay,
            source,
            destination,
        })
    }

    async fn open_half(
        connector: &C,
        endpoint: ChainEndpoint,
        signer: &Signer,
        submitter: &SubmitterConfig,
        relay: &RelayConfig,
        store: &dyn CheckpointStore,
        sleeper: &dyn Sleeper,
    ) -> Result<ChainHalf<C::Client>, RelayError> {
        let side = endpoint.side;
        let client = connect_with_retry(connector, &endpoint, &relay.reconnect, sleeper).await?;

        let stored = store.load(side).await.map_err(|e| {
            RelayError::Configuration(format!("cannot read {side} checkpoint: {e:#}"))
        })?;
        let checkpoint = match stored {
            Some(block) => {
                info!(chain = %side, checkpoint = block, "Resuming from stored checkpoint");
                block
            }
            None => {
                let head = client.current_block().await?;
                let safe_head = head.saturating_sub(relay.finality_blocks);
                let block = initial_checkpoint(safe_head, relay.start_lookback_blocks);
                info!(
                    chain = %side,
                    head,
                    checkpoint = block,
                    lookback = relay.start_lookback_blocks,
                    "No stored checkpoint, starting near head"
                );
                if let Err(e) = store.save(side, block).await {
                    warn!(chain = %side, error = %e, "Failed to persist initial checkpoint");
                }
                block
            }
        };

        Ok(ChainHalf {
            tracker: BlockWindowTracker::new(side, checkpoint, relay.max_block_range),
            events: EventSource::new(endpoint.contract),
            submitter: TransactionSubmitter::new(
                endpoint.contract,
                signer.clone(),
                submitter.clone(),
            ),
            client,
            endpoint,
        })
    }

    pub fn stats(&self) -> SharedStats {
        self.ctx.stats.clone()
    }

    pub fn metrics(&self) -> SharedMetrics {
        self.ctx.metrics.clone()
    }

    pub fn checkpoint(&self, side: ChainSide) -> u64 {
        self.half(side).tracker.last_processed_block()
    }

    pub fn window_width(&self, side: ChainSide) -> u64 {
        self.half(side).tracker.max_width()
    }

    fn half(&self, side: ChainSide) -> &ChainHalf<C::Client> {
        match side {
            ChainSide::Source => &self.source,
            ChainSide::Destination => &self.destination,
        }
    }

    /// Run cycles until shutdown, the iteration bound, or a fatal error.
    pub async fn run(&mut self, mut shutdown: mpsc::Receiver<()>) -> Result<RelayStats, RelayError> {
        let heartbeat = self.config.heartbeat_cycles.max(1);
        let mut cycle = 0u64;
        self.ctx.metrics.up.set(1);

        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            max_iterations = ?self.config.max_iterations,
            "Relay loop starting"
        );

        let result = loop {
            if self
                .config
                .max_iterations
                .is_some_and(|max| cycle >= max)
            {
                info!(cycles = cycle, "Reached max iterations, stopping");
                break Ok(());
            }
            cycle += 1;

            if cycle % heartbeat == 1 || heartbeat == 1 {
                let stats = self.ctx.stats.read().await;
                info!(
                    cycle,
                    source_checkpoint = self.source.tracker.last_processed_block(),
                    destination_checkpoint = self.destination.tracker.last_processed_block(),
                    relayed = stats.relayed,
                    failed = stats.failed,
                    reconnects = stats.reconnects,
                    "Relay heartbeat"
                );
            }

            tokio::select! {
                res = self.run_cycle() => {
                    if let Err(e) = res {
                        error!(cycle, error = %e, "Relay cycle failed fatally");
                        break Err(e);
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutdown signal received, stopping relay");
                    break Ok(());
                }
            }

            if self
                .config
                .max_iterations
                .is_some_and(|max| cycle >= max)
            {
                continue;
            }

            let sleeper = self.ctx.sleeper.clone();
            tokio::select! {
                _ = sleeper.sleep(self.config.poll_interval) => {}
                _ = shutdown.recv() => {
                    info!("Shutdown signal received, stopping relay");
                    break Ok(());
                }
            }
        };

        self.ctx.metrics.up.set(0);
        let stats = self.ctx.stats.read().await.clone();
        result.map(|_| stats)
    }

    /// One full cycle: source half, then destination half.
    ///
    /// Failures local to one half are logged and followed by a reconnect of the
    /// affected chain. Only configuration errors and failed reconnects escape.
    pub async fn run_cycle(&mut self) -> Result<(), RelayError> {
        let mut to_reconnect: Vec<ChainSide> = Vec::new();

        for side in ChainSide::ALL {
            let (watched, target) = match side {
                ChainSide::Source => (&mut self.source, &self.destination),
                ChainSide::Destination => (&mut self.destination, &self.source),
            };
            match relay_half(&mut self.ctx, watched, target).await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(chain = %side, error = %e, "Relay half interrupted");
                    if let Some(chain) = e.chain() {
                        if !to_reconnect.contains(&chain) {
                            to_reconnect.push(chain);
                        }
                    }
                }
            }
        }

        for chain in to_reconnect {
            self.reconnect(chain).await?;
        }

        self.ctx.metrics.cycles_total.inc();
        self.ctx
            .metrics
            .dedupe_cache_size
            .set(self.ctx.seen.len() as i64);
        let mut stats = self.ctx.stats.write().await;
        stats.cycles += 1;
        stats.last_cycle_at = Some(Utc::now());
        stats.source_checkpoint = self.source.tracker.last_processed_block();
        stats.destination_checkpoint = self.destination.tracker.last_processed_block();
        Ok(())
    }

    async fn reconnect(&mut self, chain: ChainSide) -> Result<(), RelayError> {
        let half = match chain {
            ChainSide::Source => &mut self.source,
            ChainSide::Destination => &mut self.destination,
        };
        info!(chain = %chain, "Reconnecting");
        match connect_with_retry(
            &self.connector,
            &half.endpoint,
            &self.config.reconnect,
            self.ctx.sleeper.as_ref(),
        )
        .await
        {
            Ok(client) => {
                half.client = client;
                self.ctx.metrics.record_reconnect(chain);
                self.ctx.stats.write().await.reconnects += 1;
                Ok(())
            }
            Err(e) => {
                error!(chain = %chain, error = %e, "Reconnect failed");
                Err(e)
            }
        }
    }
}

/// Checkpoint for a chain with no stored progress: scanning starts
/// `lookback` blocks behind `head`.
pub fn initial_checkpoint(head: u64, lookback: u64) -> u64 {
    head.saturating_sub(lookback).saturating_sub(1)
}

/// Scan one window of `watched` and mirror its events onto `target`.
async fn relay_half<Cl: ChainClient>(
    ctx: &mut RelayContext,
    watched: &mut ChainHalf<Cl>,
    target: &ChainHalf<Cl>,
) -> Result<(), RelayError> {
    let chain = watched.side();
    let kind = chain.watched_event();

    let head = watched.client.current_block().await?;
    let safe_head = head.saturating_sub(ctx.finality_blocks);

    let (window, batch) = loop {
        let Some(window) = watched.tracker.open_window(safe_head) else {
            debug!(chain = %chain, safe_head, "No new blocks");
            return Ok(());
        };
        match watched
            .events
            .get_events(&watched.client, kind, window.from_block, window.to_block)
            .await
        {
            Ok(batch) => break (window, batch),
            Err(RelayError::RangeTooLarge { .. }) if watched.tracker.max_width() > 1 => {
                let width = watched.tracker.range_too_large();
                ctx.metrics.set_window_width(chain, width);
            }
            Err(RelayError::RangeTooLarge { .. }) => {
                watched.tracker.abort();
                return Err(RelayError::connectivity(
                    chain,
                    format!("provider rejects log query for block {}", window.from_block),
                ));
            }
            Err(e) => {
                watched.tracker.abort();
                return Err(e);
            }
        }
    };

    ctx.metrics.record_events(chain, kind, batch.events.len());
    ctx.metrics.record_decode_failures(chain, batch.decode_failures);
    if batch.decode_failures > 0 {
        ctx.stats.write().await.decode_failures += batch.decode_failures as u64;
    }
    if !batch.events.is_empty() {
        info!(
            chain = %chain,
            kind = %kind,
            count = batch.events.len(),
            from_block = window.from_block,
            to_block = window.to_block,
            "Events detected"
        );
    }

    let target_side = target.side();
    for event in &batch.events {
        let id = event.id();
        if ctx.seen.contains(&id) {
            debug!(event = %id, "Event already relayed, skipping");
            ctx.metrics.record_submission(target_side, "duplicate");
            ctx.stats.write().await.duplicates_skipped += 1;
            continue;
        }

        let call = event.mirrored_call();
        if ctx.dry_run {
            info!(
                event = %id,
                block = event.block_number,
                function = call.function_name(),
                target = %target_side,
                token = %event.token,
                recipient = %event.recipient,
                amount = %event.amount,
                "Dry run, not submitting"
            );
            ctx.seen.insert(id);
            ctx.metrics.record_submission(target_side, "dry_run");
            continue;
        }

        match target
            .submitter
            .submit(&target.client, &call, ctx.sleeper.as_ref())
            .await
        {
            Ok(receipt) => {
                info!(
                    event = %id,
                    block = event.block_number,
                    function = call.function_name(),
                    target = %target_side,
                    token = %event.token,
                    recipient = %event.recipient,
                    amount = %event.amount,
                    tx_hash = %receipt.tx_hash,
                    attempts = receipt.attempts,
                    "Relayed event"
                );
                ctx.seen.insert(id);
                ctx.metrics.record_submission(target_side, "relayed");
                ctx.stats.write().await.relayed += 1;
            }
            Err(e) if e.is_connectivity() => {
                ctx.metrics.record_submission(target_side, e.outcome());
                // Everything before this event's block was handled
                let through = event.block_number.saturating_sub(1);
                if let Some(checkpoint) = watched.tracker.complete_through(through) {
                    commit_checkpoint(ctx, chain, checkpoint, None).await;
                }
                return Err(RelayError::Submission {
                    chain: target_side,
                    source: e,
                });
            }
            Err(e) => {
                error!(
                    event = %id,
                    block = event.block_number,
                    function = call.function_name(),
                    target = %target_side,
                    outcome = e.outcome(),
                    error = %e,
                    "Failed to relay event, skipping"
                );
                ctx.seen.insert(id);
                ctx.metrics.record_submission(target_side, e.outcome());
                ctx.stats.write().await.failed += 1;
            }
        }
    }

    if let Some(checkpoint) = watched.tracker.complete() {
        commit_checkpoint(ctx, chain, checkpoint, Some(window)).await;
    }
    ctx.metrics.set_window_width(chain, watched.tracker.max_width());
    Ok(())
}

async fn commit_checkpoint(
    ctx: &RelayContext,
    chain: ChainSide,
    checkpoint: u64,
    window: Option<ScanWindow>,
) {
    match window {
        Some(w) => ctx.metrics.record_scan(chain, w.width(), checkpoint),
        None => ctx.metrics.set_checkpoint(chain, checkpoint),
    }
    if let Err(e) = ctx.store.save(chain, checkpoint).await {
        warn!(chain = %chain, checkpoint, error = %e, "Failed to persist checkpoint");
    }
    debug!(chain = %chain, checkpoint, "Checkpoint advanced");
}
