//! Bounded cache of relayed event identities with TTL and max-size eviction.
//!
//! Guards against submitting the same mirrored call twice when a window is
//! rescanned after a partial failure. Entries are ~60 bytes, so the default
//! 100k entries stay around 6 MB.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::types::EventId;

pub const DEFAULT_EVENT_CACHE_SIZE: usize = 100_000;
pub const DEFAULT_EVENT_CACHE_TTL_SECS: u64 = 86_400; // 24 hours

/// Bounded set of [`EventId`]s.
///
/// - **Max capacity:** when full, the oldest entry is evicted on insert.
/// - **TTL:** expired entries are treated as absent and dropped on insert.
pub struct BoundedEventCache {
    map: HashMap<EventId, Instant>,
    /// Insertion order, oldest first
    order: VecDeque<(EventId, Instant)>,
    max_size: usize,
    ttl: Duration,
}

impl BoundedEventCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            max_size: max_size.max(1),
            ttl,
        }
    }

    pub fn contains(&self, id: &EventId) -> bool {
        self.map.get(id).is_some_and(|&t| t.elapsed() < self.ttl)
    }

    /// Record `id`. Returns false if it was already present and unexpired.
    pub fn insert(&mut self, id: EventId) -> bool {
        if self.contains(&id) {
            return false;
        }
        let now = Instant::now();
        self.evict(now);
        self.map.insert(id, now);
        self.order.push_back((id, now));
        true
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&(id, inserted)) = self.order.front() {
            let expired = now.duration_since(inserted) >= self.ttl;
            if !expired && self.map.len() < self.max_size {
                break;
            }
            self.order.pop_front();
            // A stale order entry for a re-inserted id must not drop the newer one
            if self.map.get(&id) == Some(&inserted) {
                self.map.remove(&id);
            }
        }
    }
}

impl Default for BoundedEventCache {
    fn default() -> Self {
        Self::new(
            DEFAULT_EVENT_CACHE_SIZE,
            Duration::from_secs(DEFAULT_EVENT_CACHE_TTL_SECS),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChainSide;
    use alloy::primitives::B256;

    fn id(n: u8) -> EventId {
        EventId {
            chain: ChainSide::Source,
            tx_hash: B256::repeat_byte(n),
            log_index: 0,
        }
    }

    #[test]
    fn test_insert_and_contains() {
        let mut cache = BoundedEventCache::new(10, Duration::from_secs(3600));
        assert!(cache.insert(id(1)));
        assert!(!cache.insert(id(1)));
        assert!(cache.contains(&id(1)));
        assert!(!cache.contains(&id(2)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_same_tx_different_chain_or_index() {
        let mut cache = BoundedEventCache::default();
        let a = id(1);
        let b = EventId { log_index: 1, ..a };
        let c = EventId {
            chain: ChainSide::Destination,
            ..a
        };
        assert!(cache.insert(a));
        assert!(cache.insert(b));
        assert!(cache.insert(c));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_max_size_evicts_oldest() {
        let mut cache = BoundedEventCache::new(3, Duration::from_secs(3600));
        for n in 1..=4 {
            cache.insert(id(n));
        }
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(&id(1)));
        assert!(cache.contains(&id(4)));
    }

    #[test]
    fn test_ttl_expiry() {
        let mut cache = BoundedEventCache::new(10, Duration::from_millis(1));
        cache.insert(id(1));
        std::thread::sleep(Duration::from_millis(5));
        assert!(!cache.contains(&id(1)));
        assert!(cache.insert(id(1)));
        assert_eq!(cache.len(), 1);
    }
}
