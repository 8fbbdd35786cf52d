//! Per-operation telemetry and session rollups (§4.2).
//!
//! Grounded on `backend/core/performance_monitor.py`: bounded per-op ring buffers,
//! hit/miss counters per bucket, a weighted running mean for average response time.
//! Reauthored as an explicit process-wide service behind one `Mutex` rather than a
//! thread-local singleton (§9), with an English-language report instead of a
//! translation of the original's Chinese-language one.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Instant;

use serde_json::json;

use crate::model::{Bucket, OpKind, OperationRecord, SessionStats};

const RING_CAPACITY: usize = 1000;

#[derive(Debug, Default)]
struct CacheCounters {
    hits: u64,
    misses: u64,
}

struct Inner {
    operations: HashMap<OpKind, VecDeque<(Instant, OperationRecord)>>,
    cache_stats: HashMap<Bucket, CacheCounters>,
    session: SessionStats,
}

impl Default for Inner {
    fn default() -> Self {
        let mut cache_stats = HashMap::new();
        cache_stats.insert(Bucket::Data, CacheCounters::default());
        cache_stats.insert(Bucket::Chart, CacheCounters::default());
        cache_stats.insert(Bucket::Analysis, CacheCounters::default());
        Self {
            operations: HashMap::new(),
            cache_stats,
            session: SessionStats::default(),
        }
    }
}

/// Process-wide telemetry sink. One instance, constructed at startup and shared via `Arc`.
pub struct TelemetrySink {
    inner: Mutex<Inner>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct OpStats {
    pub op: &'static str,
    pub window_minutes: u64,
    pub count: usize,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub cache_hit_rate: f64,
}

impl Default for TelemetrySink {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetrySink {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// §4.2: append to the op's ring buffer; roll hit/miss into the matching bucket.
    pub fn track_operation(
        &self,
        op: OpKind,
        duration_ms: f64,
        cache_hit: bool,
        metadata: HashMap<String, String>,
    ) {
        let mut inner = self.inner.lock().expect("telemetry lock poisoned");
        let record = OperationRecord {
            op,
            duration_ms,
            cache_hit,
            wall_time_ns: 0,
            metadata,
        };
        let ring = inner.operations.entry(op).or_default();
        if ring.len() == RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back((Instant::now(), record));

        if let Some(bucket) = op.bucket() {
            let counters = inner.cache_stats.entry(bucket).or_default();
            if cache_hit {
                counters.hits += 1;
            } else {
                counters.misses += 1;
            }
        }
        tracing::info!(op = op.as_str(), duration_ms, cache_hit, "operation recorded");
    }

    /// §4.2: update session totals; `avg_response_ms` is a weighted running mean.
    pub fn track_request(&self, success: bool, total_ms: f64) {
        let mut inner = self.inner.lock().expect("telemetry lock poisoned");
        inner.session.total_requests += 1;
        if success {
            inner.session.successful_requests += 1;
        } else {
            inner.session.failed_requests += 1;
        }
        let n = inner.session.total_requests as f64;
        let current_avg = inner.session.avg_response_ms;
        inner.session.avg_response_ms = (current_avg * (n - 1.0) + total_ms) / n;
    }

    pub fn op_stats(&self, op: OpKind, window_minutes: u64) -> OpStats {
        let inner = self.inner.lock().expect("telemetry lock poisoned");
        let cutoff = window_minutes.saturating_mul(60);
        let recent: Vec<&OperationRecord> = inner
            .operations
            .get(&op)
            .map(|ring| {
                ring.iter()
                    .filter(|(t, _)| t.elapsed().as_secs() <= cutoff)
                    .map(|(_, r)| r)
                    .collect()
            })
            .unwrap_or_default();

        if recent.is_empty() {
            return OpStats {
                op: op.as_str(),
                window_minutes,
                count: 0,
                avg_ms: 0.0,
                min_ms: 0.0,
                max_ms: 0.0,
                cache_hit_rate: 0.0,
            };
        }

        let durations: Vec<f64> = recent.iter().map(|r| r.duration_ms).collect();
        let hits = recent.iter().filter(|r| r.cache_hit).count();
        OpStats {
            op: op.as_str(),
            window_minutes,
            count: recent.len(),
            avg_ms: durations.iter().sum::<f64>() / durations.len() as f64,
            min_ms: durations.iter().cloned().fold(f64::INFINITY, f64::min),
            max_ms: durations.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            cache_hit_rate: (hits as f64 / recent.len() as f64) * 100.0,
        }
    }

    pub fn cache_hit_rates(&self) -> HashMap<&'static str, f64> {
        let inner = self.inner.lock().expect("telemetry lock poisoned");
        inner
            .cache_stats
            .iter()
            .map(|(bucket, counters)| {
                let total = counters.hits + counters.misses;
                let rate = if total > 0 {
                    (counters.hits as f64 / total as f64) * 100.0
                } else {
                    0.0
                };
                (bucket.as_str(), rate)
            })
            .collect()
    }

    pub fn session_stats(&self) -> SessionStats {
        self.inner.lock().expect("telemetry lock poisoned").session.clone()
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("telemetry lock poisoned");
        *inner = Inner::default();
    }

    const KEY_OPS: [OpKind; 4] = [OpKind::DataFetch, OpKind::ChartGen, OpKind::LlmAnalyze, OpKind::ReportGen];

    pub fn performance_report(&self) -> String {
        let session = self.session_stats();
        let hit_rates = self.cache_hit_rates();
        let success_pct = if session.total_requests > 0 {
            (session.successful_requests as f64 / session.total_requests as f64) * 100.0
        } else {
            0.0
        };

        let mut lines = vec![
            "=== chart pipeline performance report ===".to_string(),
            format!("total requests:      {}", session.total_requests),
            format!("successful:           {}", session.successful_requests),
            format!("failed:               {}", session.failed_requests),
            format!("success rate:         {success_pct:.1}%"),
            format!("avg response time:    {:.2}ms", session.avg_response_ms),
            String::new(),
            "cache hit rates:".to_string(),
        ];
        for bucket in [Bucket::Data, Bucket::Chart, Bucket::Analysis] {
            let rate = hit_rates.get(bucket.as_str()).copied().unwrap_or(0.0);
            lines.push(format!("  {:<10} {rate:.1}%", bucket.as_str()));
        }
        lines.push(String::new());
        lines.push("per-operation (last 60 minutes):".to_string());
        for op in Self::KEY_OPS {
            let stats = self.op_stats(op, 60);
            if stats.count > 0 {
                lines.push(format!(
                    "  {:<14} count={} avg={:.2}ms min={:.2}ms max={:.2}ms hit_rate={:.1}%",
                    op.as_str(),
                    stats.count,
                    stats.avg_ms,
                    stats.min_ms,
                    stats.max_ms,
                    stats.cache_hit_rate
                ));
            }
        }
        lines.join("\n")
    }

    pub fn export_json(&self) -> serde_json::Value {
        let session = self.session_stats();
        let hit_rates = self.cache_hit_rates();
        let operations: HashMap<&str, OpStats> = Self::KEY_OPS
            .iter()
            .map(|&op| (op.as_str(), self.op_stats(op, 60)))
            .collect();
        json!({
            "session": {
                "total_requests": session.total_requests,
                "successful_requests": session.successful_requests,
                "failed_requests": session.failed_requests,
                "avg_response_ms": session.avg_response_ms,
                "session_duration_secs": session.session_start.elapsed().as_secs(),
            },
            "cache_hit_rates": hit_rates,
            "operations": operations,
        })
    }
}
