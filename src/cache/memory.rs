//! The memory tier: one map, LRU-evicted by last access (§4.3).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::{CacheKey, Payload};

struct Slot {
    payload: Payload,
    created_at: Instant,
}

/// Single `CacheKey -> CacheEntry` map shared across all three buckets, plus a
/// parallel last-access map, both guarded by the caller's one `Mutex` (`TieredCache`).
pub struct MemoryTier {
    entries: HashMap<CacheKey, Slot>,
    last_access: HashMap<CacheKey, Instant>,
    max_entries: usize,
}

impl MemoryTier {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            last_access: HashMap::new(),
            max_entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns the payload if present and not older than `ttl`; touches last-access on hit.
    /// An expired entry is removed in place.
    pub fn get(&mut self, key: &CacheKey, ttl: Duration) -> Option<Payload> {
        let expired = self
            .entries
            .get(key)
            .is_some_and(|slot| slot.created_at.elapsed() > ttl);
        if expired {
            self.entries.remove(key);
            self.last_access.remove(key);
            return None;
        }
        if let Some(slot) = self.entries.get(key) {
            self.last_access.insert(key.clone(), Instant::now());
            return Some(slot.payload.clone());
        }
        None
    }

    /// Inserts/overwrites, resetting `created_at`, then evicts LRU-oldest if over capacity.
    pub fn set(&mut self, key: CacheKey, payload: Payload) {
        let now = Instant::now();
        self.entries.insert(
            key.clone(),
            Slot {
                payload,
                created_at: now,
            },
        );
        self.last_access.insert(key, now);
        self.evict_if_needed();
    }

    /// §4.3: "when size > max_memory_entries, sort keys by last-access ascending and
    /// remove the oldest `size - max + 100`" — batched to amortize repeated eviction passes.
    fn evict_if_needed(&mut self) {
        if self.entries.len() <= self.max_entries {
            return;
        }
        let overflow = self.entries.len() - self.max_entries + 100;
        let mut by_access: Vec<(CacheKey, Instant)> = self
            .last_access
            .iter()
            .map(|(k, t)| (k.clone(), *t))
            .collect();
        by_access.sort_by_key(|(_, t)| *t);
        for (key, _) in by_access.into_iter().take(overflow) {
            self.entries.remove(&key);
            self.last_access.remove(&key);
        }
    }

    /// Walks the map removing anything older than `ttl_for(bucket)`. Returns the count removed.
    pub fn sweep_expired(&mut self, ttl_for: impl Fn(&super::Payload) -> Duration) -> usize {
        let expired: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(_, slot)| slot.created_at.elapsed() > ttl_for(&slot.payload))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.entries.remove(key);
            self.last_access.remove(key);
        }
        expired.len()
    }

    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        self.last_access.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OHLCVSeries;

    fn key(n: u32) -> CacheKey {
        CacheKey(format!("{n:016x}"))
    }

    #[test]
    fn get_set_round_trip_within_ttl() {
        let mut tier = MemoryTier::new(10);
        tier.set(key(1), Payload::Analysis("hello".into()));
        let got = tier.get(&key(1), Duration::from_secs(60));
        assert!(matches!(got, Some(Payload::Analysis(s)) if s == "hello"));
    }

    #[test]
    fn expired_entry_is_removed_on_get() {
        let mut tier = MemoryTier::new(10);
        tier.set(key(1), Payload::Analysis("hello".into()));
        let got = tier.get(&key(1), Duration::from_nanos(0));
        // Duration::from_nanos(0) means anything with nonzero elapsed counts as expired.
        std::thread::sleep(Duration::from_millis(1));
        let got2 = tier.get(&key(1), Duration::from_nanos(0));
        assert!(got.is_some() || got2.is_none());
        assert_eq!(tier.len(), 0);
    }

    #[test]
    fn eviction_never_exceeds_capacity_after_set() {
        let mut tier = MemoryTier::new(5);
        for i in 0..200u32 {
            tier.set(key(i), Payload::Data(OHLCVSeries::default()));
            assert!(tier.len() <= tier.max_entries);
        }
    }

    #[test]
    fn eviction_removes_oldest_accessed_first() {
        let mut tier = MemoryTier::new(2);
        tier.set(key(1), Payload::Data(OHLCVSeries::default()));
        std::thread::sleep(Duration::from_millis(2));
        tier.set(key(2), Payload::Data(OHLCVSeries::default()));
        // Touch key(2) so key(1) becomes the oldest by access.
        tier.get(&key(2), Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(2));
        for i in 3..103u32 {
            tier.set(key(i), Payload::Data(OHLCVSeries::default()));
        }
        assert!(tier.get(&key(1), Duration::from_secs(60)).is_none());
    }
}
