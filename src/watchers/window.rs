//! Block window tracker
//!
//! Owns the per-chain checkpoint and hands out inclusive scan windows
//! `[checkpoint + 1, min(head, checkpoint + width)]`. The checkpoint only moves
//! when a window is completed, and the width only ever shrinks.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::ChainSide;

/// Last block fully processed for a chain (inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCheckpoint {
    pub chain: ChainSide,
    pub last_processed_block: u64,
}

/// Inclusive block range examined in one scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanWindow {
    pub from_block: u64,
    pub to_block: u64,
}

impl ScanWindow {
    /// Blocks covered; 0 for an inverted range
    pub fn width(&self) -> u64 {
        self.to_block
            .checked_sub(self.from_block)
            .map_or(0, |span| span.saturating_add(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    WindowOpen(ScanWindow),
}

#[derive(Debug, Clone)]
pub struct BlockWindowTracker {
    checkpoint: ScanCheckpoint,
    max_width: u64,
    state: TrackerState,
}

impl BlockWindowTracker {
    pub fn new(chain: ChainSide, last_processed_block: u64, max_width: u64) -> Self {
        Self {
            checkpoint: ScanCheckpoint {
                chain,
                last_processed_block,
            },
            max_width: max_width.max(1),
            state: TrackerState::Idle,
        }
    }

    pub fn chain(&self) -> ChainSide {
        self.checkpoint.chain
    }

    pub fn checkpoint(&self) -> ScanCheckpoint {
        self.checkpoint
    }

    pub fn last_processed_block(&self) -> u64 {
        self.checkpoint.last_processed_block
    }

    pub fn max_width(&self) -> u64 {
        self.max_width
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    /// Claim the next window up to `head`. Returns `None` when there is nothing
    /// new to scan; the checkpoint is left untouched in that case.
    ///
    /// Opening a window while another one is open recomputes it from the same
    /// checkpoint, so an abandoned scan is simply retried.
    pub fn open_window(&mut self, head: u64) -> Option<ScanWindow> {
        let from_block = self.checkpoint.last_processed_block.saturating_add(1);
        if from_block > head {
            self.state = TrackerState::Idle;
            return None;
        }
        let to_block = head.min(from_block.saturating_add(self.max_width - 1));
        let window = ScanWindow {
            from_block,
            to_block,
        };
        self.state = TrackerState::WindowOpen(window);
        debug!(
            chain = %self.checkpoint.chain,
            from_block,
            to_block,
            width = window.width(),
            "Opened scan window"
        );
        Some(window)
    }

    /// Mark the open window fully processed and advance the checkpoint to its end.
    /// Returns the new checkpoint, or `None` when no window was open.
    pub fn complete(&mut self) -> Option<u64> {
        match self.state {
            TrackerState::WindowOpen(window) => {
                self.advance_to(window.to_block);
                self.state = TrackerState::Idle;
                Some(self.checkpoint.last_processed_block)
            }
            TrackerState::Idle => None,
        }
    }

    /// Close the open window after partial success: every block up to and
    /// including `block` was handled. Blocks outside the window are ignored.
    pub fn complete_through(&mut self, block: u64) -> Option<u64> {
        match self.state {
            TrackerState::WindowOpen(window) => {
                if block >= window.from_block {
                    self.advance_to(block.min(window.to_block));
                }
                self.state = TrackerState::Idle;
                Some(self.checkpoint.last_processed_block)
            }
            TrackerState::Idle => None,
        }
    }

    /// The provider refused the open window. Halves the width (floor 1) and
    /// returns to `Idle` without moving the checkpoint. Returns the new width.
    pub fn range_too_large(&mut self) -> u64 {
        let previous = self.max_width;
        self.max_width = (self.max_width / 2).max(1);
        self.state = TrackerState::Idle;
        warn!(
            chain = %self.checkpoint.chain,
            previous_width = previous,
            new_width = self.max_width,
            "Log range too large, shrinking scan window"
        );
        self.max_width
    }

    /// Drop the open window without touching the checkpoint
    pub fn abort(&mut self) {
        self.state = TrackerState::Idle;
    }

    fn advance_to(&mut self, block: u64) {
        // Never rolls back
        if block > self.checkpoint.last_processed_block {
            self.checkpoint.last_processed_block = block;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(checkpoint: u64, width: u64) -> BlockWindowTracker {
        BlockWindowTracker::new(ChainSide::Source, checkpoint, width)
    }

    #[test]
    fn test_inverted_window_has_no_width() {
        let window = ScanWindow {
            from_block: 10,
            to_block: 9,
        };
        assert_eq!(window.width(), 0);
        let single = ScanWindow {
            from_block: 10,
            to_block: 10,
        };
        assert_eq!(single.width(), 1);
    }

    #[test]
    fn test_window_bounds() {
        let mut t = tracker(100, 50);
        let w = t.open_window(1_000).unwrap();
        assert_eq!(w, ScanWindow { from_block: 101, to_block: 150 });
        assert_eq!(w.width(), 50);
        assert_eq!(t.state(), TrackerState::WindowOpen(w));
    }

    #[test]
    fn test_window_clamped_to_head() {
        let mut t = tracker(100, 50);
        let w = t.open_window(110).unwrap();
        assert_eq!(w, ScanWindow { from_block: 101, to_block: 110 });
    }

    #[test]
    fn test_empty_window_when_caught_up() {
        let mut t = tracker(100, 50);
        assert_eq!(t.open_window(100), None);
        assert_eq!(t.open_window(99), None);
        assert_eq!(t.state(), TrackerState::Idle);
        assert_eq!(t.complete(), None);
        assert_eq!(t.last_processed_block(), 100);
    }

    #[test]
    fn test_monotonic_windows() {
        let mut t = tracker(0, 7);
        let mut previous: Option<ScanWindow> = None;
        for head in [3u64, 3, 20, 21, 40, 40, 41] {
            if let Some(w) = t.open_window(head) {
                if let Some(p) = previous {
                    assert_eq!(w.from_block, p.to_block + 1);
                }
                t.complete();
                previous = Some(w);
            }
        }
        assert_eq!(t.last_processed_block(), 41);
    }

    #[test]
    fn test_no_gap_no_overlap() {
        let mut t = tracker(10, 4);
        let mut scanned = Vec::new();
        for head in [12u64, 30, 31, 31, 45] {
            while let Some(w) = t.open_window(head) {
                scanned.extend(w.from_block..=w.to_block);
                t.complete();
            }
        }
        let expected: Vec<u64> = (11..=45).collect();
        assert_eq!(scanned, expected);
    }

    #[test]
    fn test_range_too_large_halves_without_advancing() {
        let mut t = tracker(100, 50);
        t.open_window(1_000).unwrap();
        assert_eq!(t.range_too_large(), 25);
        assert_eq!(t.last_processed_block(), 100);
        assert_eq!(t.state(), TrackerState::Idle);

        let w = t.open_window(1_000).unwrap();
        assert_eq!(w, ScanWindow { from_block: 101, to_block: 125 });
    }

    #[test]
    fn test_width_floor_and_no_regrowth() {
        let mut t = tracker(0, 3);
        assert_eq!(t.range_too_large(), 1);
        assert_eq!(t.range_too_large(), 1);

        for _ in 0..5 {
            t.open_window(100).unwrap();
            t.complete();
        }
        assert_eq!(t.max_width(), 1);
        assert_eq!(t.last_processed_block(), 5);
    }

    #[test]
    fn test_complete_through_partial() {
        let mut t = tracker(100, 50);
        t.open_window(1_000).unwrap();
        assert_eq!(t.complete_through(119), Some(119));
        assert_eq!(t.open_window(1_000).unwrap().from_block, 120);
    }

    #[test]
    fn test_complete_through_before_window_keeps_checkpoint() {
        let mut t = tracker(100, 50);
        t.open_window(1_000).unwrap();
        assert_eq!(t.complete_through(100), Some(100));
        assert_eq!(t.complete_through(500), None);
        assert_eq!(t.last_processed_block(), 100);
    }

    #[test]
    fn test_abort_keeps_checkpoint() {
        let mut t = tracker(100, 50);
        t.open_window(1_000).unwrap();
        t.abort();
        assert_eq!(t.complete(), None);
        assert_eq!(t.last_processed_block(), 100);
    }
}
