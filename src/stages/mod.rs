//! C5: StageRunners — Chart render and LLM analysis, each wrapped by one shared
//! cache-then-invoke helper (§4.5, §9: "one generic `run_cached` helper parameterized
//! over the bucket and the underlying trait call, so the two stages cannot drift").
//!
//! Grounded on `tools/fetch.rs`'s `QuoteProvider`/mock split for the trait-plus-test-double
//! shape, generalized to Chart/Analysis's cache-then-invoke pattern.

pub mod analyze;
pub mod chart;
pub mod compose;

use std::time::Instant;

use crate::cache::TieredCache;
use crate::fingerprint::Fingerprint;
use crate::model::OpKind;
use crate::telemetry::TelemetrySink;

/// Runs `miss` only if `lookup` reports a cache miss, writing the result back via `store`
/// on success. Records one `OperationRecord` either way. Shared by `ChartStage` and
/// `AnalyzeStage` so their caching behavior is defined exactly once.
pub(crate) async fn run_cached<T, F, Fut>(
    telemetry: &TelemetrySink,
    op: OpKind,
    lookup: impl FnOnce() -> Option<T>,
    miss: F,
    store: impl FnOnce(&T),
) -> Result<T, crate::error::AppError>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, crate::error::AppError>>,
{
    let start = Instant::now();
    if let Some(hit) = lookup() {
        telemetry.track_operation(op, start.elapsed().as_secs_f64() * 1000.0, true, Default::default());
        return Ok(hit);
    }
    match miss().await {
        Ok(value) => {
            store(&value);
            telemetry.track_operation(op, start.elapsed().as_secs_f64() * 1000.0, false, Default::default());
            Ok(value)
        }
        Err(e) => {
            telemetry.track_operation(op, start.elapsed().as_secs_f64() * 1000.0, false, Default::default());
            Err(e)
        }
    }
}

/// Shared collaborators every cached stage needs, bundled to keep call sites short.
pub(crate) struct StageContext<'a> {
    pub cache: &'a TieredCache,
    pub telemetry: &'a TelemetrySink,
    pub data_fingerprint: &'a Fingerprint,
}
