//! C3: two-tier (memory LRU + disk blob) TTL cache with three logical buckets (§4.3).
//!
//! Grounded on `backend/core/smart_cache.py`'s `SmartCache`: same two-tier get/set
//! protocol and LRU eviction-batch formula, reauthored around a `Mutex` scoped to the
//! memory tier alone instead of a module-level singleton guarded by a recursive Python
//! lock, and a monotonic `Instant` for the memory tier so TTL expiry survives a
//! wall-clock jump backward (§8 boundary behavior) — the disk tier still relies on file
//! mtime, as specified, and never runs while the memory lock is held.

mod disk;
mod memory;

use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::CacheConfig;
use crate::error::AppError;
use crate::fingerprint::{fingerprint_pairs, Fingerprint};
use crate::model::{Bucket, Interval, OHLCVSeries};

use disk::DiskTier;
use memory::MemoryTier;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    fn build(bucket: Bucket, pairs: &[(&str, &str)]) -> Self {
        let mut with_bucket = Vec::with_capacity(pairs.len() + 1);
        with_bucket.push(("bucket", bucket.as_str()));
        with_bucket.extend_from_slice(pairs);
        CacheKey(fingerprint_pairs(&with_bucket))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Payload {
    Data(OHLCVSeries),
    Chart(Vec<u8>),
    Analysis(String),
}

impl Payload {
    fn bucket(&self) -> Bucket {
        match self {
            Payload::Data(_) => Bucket::Data,
            Payload::Chart(_) => Bucket::Chart,
            Payload::Analysis(_) => Bucket::Analysis,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MemoryStats {
    pub size: usize,
    pub capacity: usize,
    pub pct: f64,
}

#[derive(Debug, Serialize)]
pub struct DiskStats {
    pub size_mb: f64,
    pub file_count: usize,
    pub capacity_mb: u64,
}

#[derive(Debug, Serialize)]
pub struct CacheStats {
    pub memory: MemoryStats,
    pub disk: DiskStats,
    pub data_ttl_secs: u64,
    pub chart_ttl_secs: u64,
    pub analysis_ttl_secs: u64,
}

/// Process-wide cache service. One instance, constructed at startup and shared via `Arc`.
///
/// The memory tier's map is guarded by its own short-lived lock; the disk tier holds no
/// in-process mutable state (the filesystem is its own synchronization point), so disk
/// reads/writes/sweeps never run while that lock is held (§4.3, §5: "disk I/O outside
/// the lock").
pub struct TieredCache {
    config: CacheConfig,
    memory: Mutex<MemoryTier>,
    disk: DiskTier,
}

impl TieredCache {
    pub fn new(config: CacheConfig) -> Self {
        let disk = DiskTier::new(config.storage_path.clone());
        let memory = MemoryTier::new(config.max_memory_entries);
        Self {
            config,
            memory: Mutex::new(memory),
            disk,
        }
    }

    fn ttl_for(&self, bucket: Bucket) -> Duration {
        let secs = match bucket {
            Bucket::Data => self.config.data_ttl,
            Bucket::Chart => self.config.chart_ttl,
            Bucket::Analysis => self.config.analysis_ttl,
        };
        Duration::from_secs(secs)
    }

    /// §4.3 Get protocol: memory first, then disk (promoting on hit), else absent.
    fn get(&self, bucket: Bucket, key: &CacheKey) -> Option<Payload> {
        if !self.config.enabled {
            return None;
        }
        let ttl = self.ttl_for(bucket);
        {
            let mut memory = self.memory.lock().expect("cache lock poisoned");
            if let Some(payload) = memory.get(key, ttl) {
                return Some(payload);
            }
        }
        let payload = self.disk.read(bucket, key, ttl)?;
        let mut memory = self.memory.lock().expect("cache lock poisoned");
        memory.set(key.clone(), payload.clone());
        Some(payload)
    }

    /// §4.3 Set protocol: memory write is synchronous; disk write is best-effort and
    /// never fails the caller — errors are logged, matching §7's cache propagation policy.
    /// The disk write happens after the memory lock is released.
    fn set(&self, key: CacheKey, payload: Payload) {
        if !self.config.enabled {
            return;
        }
        let bucket = payload.bucket();
        {
            let mut memory = self.memory.lock().expect("cache lock poisoned");
            memory.set(key.clone(), payload.clone());
        }
        if let Err(e) = self.disk.write(bucket, &key, &payload) {
            tracing::warn!(error = %e, key = %key.0, "disk cache write failed, continuing");
        }
    }

    pub fn get_data(&self, ticker: &str, interval: Interval) -> Option<OHLCVSeries> {
        let key = CacheKey::build(Bucket::Data, &[("ticker", ticker), ("interval", interval.as_str())]);
        match self.get(Bucket::Data, &key)? {
            Payload::Data(series) => Some(series),
            _ => None,
        }
    }

    pub fn set_data(&self, ticker: &str, interval: Interval, series: OHLCVSeries) {
        let key = CacheKey::build(Bucket::Data, &[("ticker", ticker), ("interval", interval.as_str())]);
        self.set(key, Payload::Data(series));
    }

    pub fn get_chart(&self, ticker: &str, interval: Interval, data_fingerprint: &Fingerprint) -> Option<Vec<u8>> {
        let key = CacheKey::build(
            Bucket::Chart,
            &[("ticker", ticker), ("interval", interval.as_str()), ("fp", data_fingerprint)],
        );
        match self.get(Bucket::Chart, &key)? {
            Payload::Chart(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn set_chart(&self, ticker: &str, interval: Interval, data_fingerprint: &Fingerprint, bytes: Vec<u8>) {
        let key = CacheKey::build(
            Bucket::Chart,
            &[("ticker", ticker), ("interval", interval.as_str()), ("fp", data_fingerprint)],
        );
        self.set(key, Payload::Chart(bytes));
    }

    /// Analysis intentionally excludes `interval` from its key (§4.5, §9 Open Question 3).
    pub fn get_analysis(&self, ticker: &str, data_fingerprint: &Fingerprint) -> Option<String> {
        let key = CacheKey::build(Bucket::Analysis, &[("ticker", ticker), ("fp", data_fingerprint)]);
        match self.get(Bucket::Analysis, &key)? {
            Payload::Analysis(text) => Some(text),
            _ => None,
        }
    }

    pub fn set_analysis(&self, ticker: &str, data_fingerprint: &Fingerprint, text: String) {
        let key = CacheKey::build(Bucket::Analysis, &[("ticker", ticker), ("fp", data_fingerprint)]);
        self.set(key, Payload::Analysis(text));
    }

    pub fn stats(&self) -> CacheStats {
        let size = self.memory.lock().expect("cache lock poisoned").len();
        let (size_mb, file_count) = self.disk.usage();
        let capacity = self.config.max_memory_entries;
        CacheStats {
            memory: MemoryStats {
                size,
                capacity,
                pct: if capacity > 0 { (size as f64 / capacity as f64) * 100.0 } else { 0.0 },
            },
            disk: DiskStats {
                size_mb,
                file_count,
                capacity_mb: self.config.max_disk_size_mb,
            },
            data_ttl_secs: self.config.data_ttl,
            chart_ttl_secs: self.config.chart_ttl,
            analysis_ttl_secs: self.config.analysis_ttl,
        }
    }

    /// Sweeps the memory tier in one short lock, then walks each disk bucket in its own
    /// pass, none of it under the memory lock (§4.3, §5: "the sweeper acquires the lock
    /// per-bucket, not globally").
    pub fn clear_expired(&self) -> usize {
        let data_ttl = self.ttl_for(Bucket::Data);
        let chart_ttl = self.ttl_for(Bucket::Chart);
        let analysis_ttl = self.ttl_for(Bucket::Analysis);
        let ttl_for = move |payload: &Payload| match payload.bucket() {
            Bucket::Data => data_ttl,
            Bucket::Chart => chart_ttl,
            Bucket::Analysis => analysis_ttl,
        };
        let mut removed = self.memory.lock().expect("cache lock poisoned").sweep_expired(ttl_for);
        for bucket in [Bucket::Data, Bucket::Chart, Bucket::Analysis] {
            removed += self.disk.sweep_expired(bucket, self.ttl_for(bucket));
        }
        removed
    }

    pub fn clear_all(&self) -> usize {
        let memory_cleared = self.memory.lock().expect("cache lock poisoned").clear();
        memory_cleared + self.disk.clear_all()
    }

    pub fn sweeper_interval(&self) -> Duration {
        Duration::from_secs(self.config.sweeper_interval())
    }
}

/// Spawns the background sweeper (§4.3, §5 liveness): a daemon task that wakes every
/// [`TieredCache::sweeper_interval`] and clears expired entries. Never joined — it must
/// not block process shutdown.
pub fn spawn_sweeper(cache: std::sync::Arc<TieredCache>) -> tokio::task::JoinHandle<()> {
    let interval = cache.sweeper_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = cache.clear_expired();
            if removed > 0 {
                tracing::info!(removed, "sweeper cleared expired cache entries");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Candle;

    fn cache_with(max_memory_entries: usize, ttl_secs: u64) -> TieredCache {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            storage_path: dir.path().to_path_buf(),
            max_memory_entries,
            data_ttl: ttl_secs,
            chart_ttl: ttl_secs,
            analysis_ttl: ttl_secs,
            ..CacheConfig::default()
        };
        // Leak the tempdir so it outlives the cache for the duration of the test.
        std::mem::forget(dir);
        TieredCache::new(config)
    }

    fn series() -> OHLCVSeries {
        OHLCVSeries::new(vec![Candle {
            time: 1,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 0.0,
        }])
    }

    #[test]
    fn read_your_writes_within_ttl() {
        let cache = cache_with(100, 60);
        cache.set_data("AAPL", Interval::OneDay, series());
        let got = cache.get_data("AAPL", Interval::OneDay).unwrap();
        assert_eq!(got.len(), 1);
    }

    #[test]
    fn set_idempotence_leaves_cache_observationally_identical() {
        let cache = cache_with(100, 60);
        cache.set_analysis("AAPL", &"fp".to_string(), "same text".into());
        cache.set_analysis("AAPL", &"fp".to_string(), "same text".into());
        assert_eq!(cache.get_analysis("AAPL", &"fp".to_string()).unwrap(), "same text");
        assert_eq!(cache.stats().memory.size, 1);
    }

    #[test]
    fn expired_entry_returns_absent_and_is_removed() {
        let cache = cache_with(100, 0);
        cache.set_data("AAPL", Interval::OneDay, series());
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get_data("AAPL", Interval::OneDay).is_none());
        assert_eq!(cache.stats().memory.size, 0);
    }

    #[test]
    fn analysis_key_excludes_interval() {
        let cache = cache_with(100, 60);
        cache.set_analysis("AAPL", &"fp".to_string(), "analysis text".into());
        // A lookup under a different (irrelevant) interval still hits, since the
        // Analysis bucket's key never incorporated interval in the first place.
        assert!(cache.get_analysis("AAPL", &"fp".to_string()).is_some());
    }

    #[test]
    fn memory_tier_never_exceeds_capacity_after_set() {
        let cache = cache_with(5, 60);
        for i in 0..200 {
            cache.set_chart(&format!("T{i}"), Interval::OneDay, &format!("fp{i}"), vec![0]);
        }
        assert!(cache.stats().memory.size <= 5);
    }

    #[test]
    fn clear_expired_reports_zero_after_full_sweep() {
        let cache = cache_with(100, 0);
        cache.set_data("AAPL", Interval::OneDay, series());
        std::thread::sleep(Duration::from_millis(5));
        cache.clear_expired();
        let stats = cache.stats();
        assert_eq!(stats.memory.size, 0);
        assert_eq!(stats.disk.file_count, 0);
    }
}
