//! Prometheus metrics for the bridge relay
//!
//! Exposed on the /metrics endpoint of the health server.

use prometheus::{IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};

use crate::types::{ChainSide, EventKind};

pub struct Metrics {
    pub cycles_total: IntCounter,
    pub blocks_scanned_total: IntCounterVec,
    pub events_detected_total: IntCounterVec,
    pub decode_failures_total: IntCounterVec,
    /// Terminal submission outcomes: relayed, dry_run, duplicate, or an error label
    pub submissions_total: IntCounterVec,
    pub checkpoint: IntGaugeVec,
    pub window_width: IntGaugeVec,
    pub reconnects_total: IntCounterVec,
    pub dedupe_cache_size: IntGauge,
    pub up: IntGauge,
    pub registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let cycles_total = IntCounter::new(
            "relay_cycles_total",
            "Total number of completed relay cycles",
        )
        .expect("constant metric name is valid");

        let blocks_scanned_total = IntCounterVec::new(
            Opts::new("relay_blocks_scanned_total", "Total number of blocks scanned"),
            &["chain"],
        )
        .expect("constant metric name is valid");

        let events_detected_total = IntCounterVec::new(
            Opts::new(
                "relay_events_detected_total",
                "Total number of bridge events detected",
            ),
            &["chain", "kind"],
        )
        .expect("constant metric name is valid");

        let decode_failures_total = IntCounterVec::new(
            Opts::new(
                "relay_decode_failures_total",
                "Logs skipped because they could not be decoded",
            ),
            &["chain"],
        )
        .expect("constant metric name is valid");

        let submissions_total = IntCounterVec::new(
            Opts::new(
                "relay_submissions_total",
                "Mirrored transactions by target chain and outcome",
            ),
            &["chain", "outcome"],
        )
        .expect("constant metric name is valid");

        let checkpoint = IntGaugeVec::new(
            Opts::new("relay_checkpoint_block", "Last block fully processed"),
            &["chain"],
        )
        .expect("constant metric name is valid");

        let window_width = IntGaugeVec::new(
            Opts::new("relay_scan_window_width", "Current maximum scan window width"),
            &["chain"],
        )
        .expect("constant metric name is valid");

        let reconnects_total = IntCounterVec::new(
            Opts::new("relay_reconnects_total", "Connections re-established"),
            &["chain"],
        )
        .expect("constant metric name is valid");

        let dedupe_cache_size = IntGauge::new(
            "relay_dedupe_cache_size",
            "Current entries in the relayed-events cache",
        )
        .expect("constant metric name is valid");

        let up = IntGauge::new("relay_up", "Whether the relay loop is running")
            .expect("constant metric name is valid");

        // Names are unique constants and this runs once per Metrics
        registry
            .register(Box::new(cycles_total.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(blocks_scanned_total.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(events_detected_total.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(decode_failures_total.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(submissions_total.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(checkpoint.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(window_width.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(reconnects_total.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(dedupe_cache_size.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(up.clone()))
            .expect("metric registration must not be called twice");

        Self {
            cycles_total,
            blocks_scanned_total,
            events_detected_total,
            decode_failures_total,
            submissions_total,
            checkpoint,
            window_width,
            reconnects_total,
            dedupe_cache_size,
            up,
            registry,
        }
    }

    pub fn record_scan(&self, chain: ChainSide, blocks: u64, checkpoint: u64) {
        self.blocks_scanned_total
            .with_label_values(&[chain.as_str()])
            .inc_by(blocks);
        self.set_checkpoint(chain, checkpoint);
    }

    pub fn set_checkpoint(&self, chain: ChainSide, block: u64) {
        self.checkpoint
            .with_label_values(&[chain.as_str()])
            .set(block as i64);
    }

    pub fn set_window_width(&self, chain: ChainSide, width: u64) {
        self.window_width
            .with_label_values(&[chain.as_str()])
            .set(width as i64);
    }

    pub fn record_events(&self, chain: ChainSide, kind: EventKind, count: usize) {
        self.events_detected_total
            .with_label_values(&[chain.as_str(), kind.as_str()])
            .inc_by(count as u64);
    }

    pub fn record_decode_failures(&self, chain: ChainSide, count: usize) {
        if count > 0 {
            self.decode_failures_total
                .with_label_values(&[chain.as_str()])
                .inc_by(count as u64);
        }
    }

    pub fn record_submission(&self, target: ChainSide, outcome: &str) {
        self.submissions_total
            .with_label_values(&[target.as_str(), outcome])
            .inc();
    }

    pub fn record_reconnect(&self, chain: ChainSide) {
        self.reconnects_total
            .with_label_values(&[chain.as_str()])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Encoder, TextEncoder};

    #[test]
    fn test_metrics_render() {
        let metrics = Metrics::new();
        metrics.cycles_total.inc();
        metrics.record_scan(ChainSide::Source, 50, 1000);
        metrics.record_events(ChainSide::Source, EventKind::Deposit, 2);
        metrics.record_submission(ChainSide::Destination, "relayed");

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metrics.registry.gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();

        assert!(text.contains("relay_cycles_total 1"));
        assert!(text.contains("relay_checkpoint_block{chain=\"source\"} 1000"));
        assert!(text.contains(
            "relay_submissions_total{chain=\"destination\",outcome=\"relayed\"} 1"
        ));
    }

    #[test]
    fn test_independent_registries() {
        // Each instance owns its registry, so tests can build many
        let a = Metrics::new();
        let b = Metrics::new();
        a.up.set(1);
        assert_eq!(b.up.get(), 0);
    }
}
