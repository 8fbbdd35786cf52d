//! C6: the Orchestrator — the single public operation `generate_report` that drives
//! the four-phase pipeline (§4.6).
//!
//! Phase 3's structured concurrency is grounded on `tools/fetch.rs`'s pattern of
//! wrapping external collaborators behind a trait and composing them from a thin
//! coordinating function; the `tokio::spawn` + `tokio::try_join!` pairing follows
//! §4.6 step 4 literally ("each branch's blocking portion moved to
//! spawn_blocking/task::spawn") so a branch's failure never cancels its sibling
//! mid-flight — only the JoinHandle is raced, not the underlying task.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;

use crate::cache::TieredCache;
use crate::config::Config;
use crate::data::{self, QuoteProvider};
use crate::error::AppError;
use crate::fingerprint::fingerprint_series;
use crate::indicators;
use crate::model::{IndicatorSnapshot, OHLCVSeries, OpKind, RequestSpec};
use crate::report_index::ReportIndex;
use crate::stages::analyze::{AnalysisProvider, AnalyzeStage};
use crate::stages::chart::{ChartRenderer, ChartStage};
use crate::stages::compose::ReportComposer;
use crate::telemetry::TelemetrySink;

#[derive(Serialize)]
struct DumpRow {
    date: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

/// Every external collaborator the Orchestrator depends on, constructed once at
/// startup and shared across requests via `Arc` (§5 shared-resources model).
pub struct Orchestrator {
    config: Config,
    cache: Arc<TieredCache>,
    telemetry: Arc<TelemetrySink>,
    provider: Arc<dyn QuoteProvider>,
    renderer: Arc<dyn ChartRenderer>,
    analysis_provider: Arc<dyn AnalysisProvider>,
    composer: Arc<dyn ReportComposer>,
    report_index: Arc<ReportIndex>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        cache: Arc<TieredCache>,
        telemetry: Arc<TelemetrySink>,
        provider: Arc<dyn QuoteProvider>,
        renderer: Arc<dyn ChartRenderer>,
        analysis_provider: Arc<dyn AnalysisProvider>,
        composer: Arc<dyn ReportComposer>,
        report_index: Arc<ReportIndex>,
    ) -> Self {
        Self {
            config,
            cache,
            telemetry,
            provider,
            renderer,
            analysis_provider,
            composer,
            report_index,
        }
    }

    /// `generate_report(spec) → (path, message) | AppError` (§4.6).
    pub async fn generate_report(&self, spec: RequestSpec) -> Result<(PathBuf, String), AppError> {
        let start = Instant::now();
        let result = self.run(&spec).await;
        let total_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.telemetry.track_request(result.is_ok(), total_ms);
        self.telemetry
            .track_operation(OpKind::ReportGen, total_ms, false, std::collections::HashMap::new());
        result
    }

    async fn run(&self, spec: &RequestSpec) -> Result<(PathBuf, String), AppError> {
        let now = Utc::now().with_timezone(&self.config.tz());
        let run_dir = self
            .config
            .output_dir
            .join(now.format("%Y-%m-%d").to_string())
            .join(format!(
                "report_{}_{}_{}",
                spec.ticker,
                spec.interval.as_str(),
                now.format("%Y%m%dT%H%M%S")
            ));
        std::fs::create_dir_all(&run_dir).map_err(|e| AppError::ReportComposeFailed {
            ticker: spec.ticker.clone(),
            reason: format!("cannot create {}: {e}", run_dir.display()),
        })?;
        let dump_path = run_dir.join("ohlcv.json");
        let chart_path = run_dir.join("chart.png");
        let analysis_path = run_dir.join("analysis.md");
        let report_path = run_dir.join("report.png");

        // Phase 1 — data.
        let series = self.fetch_data(spec).await?;
        dump_series(&series, &dump_path)?;

        // Phase 2 — indicators.
        let snapshot = indicators::compute_snapshot(&series, &spec.ticker)?;
        let data_fp = fingerprint_series(&series);

        // Phase 3 — parallel chart render + LLM analysis, each its own spawned task so
        // a sibling failure never aborts the other's cache-populating side effect.
        let chart_handle = {
            let cache = Arc::clone(&self.cache);
            let telemetry = Arc::clone(&self.telemetry);
            let renderer = Arc::clone(&self.renderer);
            let series = series.clone();
            let snapshot = snapshot;
            let ticker = spec.ticker.clone();
            let interval = spec.interval;
            let fp = data_fp.clone();
            tokio::spawn(async move {
                let stage = ChartStage {
                    cache: cache.as_ref(),
                    telemetry: telemetry.as_ref(),
                    renderer: renderer.as_ref(),
                };
                stage.run_cached(&series, &snapshot, &ticker, interval, &fp).await
            })
        };
        let analyze_handle = {
            let cache = Arc::clone(&self.cache);
            let telemetry = Arc::clone(&self.telemetry);
            let provider = Arc::clone(&self.analysis_provider);
            let snapshot = snapshot;
            let ticker = spec.ticker.clone();
            let fp = data_fp.clone();
            tokio::spawn(async move {
                let stage = AnalyzeStage {
                    cache: cache.as_ref(),
                    telemetry: telemetry.as_ref(),
                    provider: provider.as_ref(),
                };
                stage.run_cached(&ticker, &snapshot, &fp).await
            })
        };

        let (chart_result, analyze_result) = tokio::try_join!(chart_handle, analyze_handle)
            .map_err(|e| AppError::ChartRenderFailed {
                ticker: spec.ticker.clone(),
                reason: format!("stage task panicked: {e}"),
            })?;
        let chart_bytes = chart_result?;
        let analysis_text = analyze_result?;

        std::fs::write(&chart_path, &chart_bytes).map_err(|e| AppError::ChartRenderFailed {
            ticker: spec.ticker.clone(),
            reason: format!("cannot write {}: {e}", chart_path.display()),
        })?;
        std::fs::write(&analysis_path, &analysis_text).map_err(|e| AppError::ReportComposeFailed {
            ticker: spec.ticker.clone(),
            reason: format!("cannot write {}: {e}", analysis_path.display()),
        })?;

        // Phase 4 — compose.
        self.composer
            .compose(
                &analysis_path,
                &chart_path,
                &report_path,
                &spec.ticker,
                spec.interval,
                &snapshot,
                "chart-pipeline",
                None,
            )
            .await?;
        if !report_path.exists() {
            return Err(AppError::ReportComposeFailed {
                ticker: spec.ticker.clone(),
                reason: "composer returned success but produced no output file".into(),
            });
        }

        // Cleanup: best effort, logged on failure.
        if let Err(e) = std::fs::remove_file(&dump_path) {
            tracing::warn!(path = %dump_path.display(), error = %e, "failed to remove OHLCV dump");
        }

        // Record: index insert failure is logged, never fails an otherwise-successful request.
        if let Err(e) = self.report_index.record(
            None,
            &spec.ticker,
            spec.interval,
            &report_path.to_string_lossy(),
            now.with_timezone(&Utc),
            &snapshot,
        ) {
            tracing::warn!(ticker = %spec.ticker, error = %e, "failed to record report index entry");
        }

        let message = format!(
            "generated report for {} ({}) at {}",
            spec.ticker,
            spec.interval,
            report_path.display()
        );
        Ok((report_path, message))
    }

    async fn fetch_data(&self, spec: &RequestSpec) -> Result<OHLCVSeries, AppError> {
        crate::stages::run_cached(
            &self.telemetry,
            OpKind::DataFetch,
            || self.cache.get_data(&spec.ticker, spec.interval),
            || {
                data::fetch(
                    self.provider.as_ref(),
                    &spec.ticker,
                    spec.interval,
                    spec.num_candles,
                    spec.exchange.as_deref(),
                )
            },
            |series| self.cache.set_data(&spec.ticker, spec.interval, series.clone()),
        )
        .await
    }
}

/// Writes the OHLCV dump as a JSON array of `{date, open, high, low, close, volume}`
/// objects (§6), so an external chart renderer can read it without linking Polars.
fn dump_series(series: &OHLCVSeries, path: &std::path::Path) -> Result<(), AppError> {
    let rows: Vec<DumpRow> = series
        .candles
        .iter()
        .map(|c| DumpRow {
            date: chrono::DateTime::from_timestamp(c.time, 0)
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_default(),
            open: c.open,
            high: c.high,
            low: c.low,
            close: c.close,
            volume: c.volume,
        })
        .collect();
    let bytes = serde_json::to_vec(&rows).map_err(|e| AppError::SchemaMismatch {
        ticker: String::new(),
        reason: format!("dump encode failed: {e}"),
    })?;
    std::fs::write(path, bytes).map_err(|e| AppError::SchemaMismatch {
        ticker: String::new(),
        reason: format!("cannot write {}: {e}", path.display()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Candle, Interval};
    use crate::stages::chart::NullChartRenderer;
    use crate::stages::analyze::CannedAnalysisProvider;
    use crate::stages::compose::NullReportComposer;
    use async_trait::async_trait;
    use chrono::NaiveDate;

    struct FakeProvider;

    #[async_trait]
    impl QuoteProvider for FakeProvider {
        async fn fetch_quotes(
            &self,
            _ticker: &str,
            _interval: Interval,
            start: NaiveDate,
            end: NaiveDate,
        ) -> Result<Vec<data::RawQuote>, AppError> {
            let days = (end - start).num_days().max(1);
            Ok((0..days)
                .map(|i| {
                    let price = 100.0 + i as f64;
                    data::RawQuote {
                        timestamp: start.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp() + i * 86400,
                        open: price,
                        high: price + 1.0,
                        low: price - 1.0,
                        close: price,
                        adjclose: Some(price),
                        volume: Some(1000.0),
                    }
                })
                .collect())
        }
    }

    fn orchestrator() -> (tempfile::TempDir, Orchestrator) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.output_dir = dir.path().join("reports");
        config.cache.storage_path = dir.path().join("cache");

        let cache = Arc::new(TieredCache::new(config.cache.clone()));
        let telemetry = Arc::new(TelemetrySink::new());
        let report_index = Arc::new(ReportIndex::open(&dir.path().join("reports.sqlite")).unwrap());

        let orchestrator = Orchestrator::new(
            config,
            cache,
            telemetry,
            Arc::new(FakeProvider),
            Arc::new(NullChartRenderer),
            Arc::new(CannedAnalysisProvider("steady uptrend expected to continue".into())),
            Arc::new(NullReportComposer),
            report_index,
        );
        (dir, orchestrator)
    }

    #[tokio::test]
    async fn generate_report_produces_an_existing_file() {
        let (_dir, orchestrator) = orchestrator();
        let spec = RequestSpec::new("AAPL", Interval::OneDay, 60, None).unwrap();
        let (path, message) = orchestrator.generate_report(spec).await.unwrap();
        assert!(path.exists());
        assert!(message.contains("AAPL"));
    }

    #[tokio::test]
    async fn second_request_for_same_series_hits_the_data_cache() {
        let (_dir, orchestrator) = orchestrator();
        let spec = RequestSpec::new("AAPL", Interval::OneDay, 60, None).unwrap();
        orchestrator.generate_report(spec.clone()).await.unwrap();
        orchestrator.generate_report(spec).await.unwrap();
        assert!(orchestrator.cache.stats().memory.size >= 1);
    }

    #[test]
    fn dump_series_writes_a_json_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.json");
        let series = OHLCVSeries::new(vec![Candle {
            time: 0,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 10.0,
        }]);
        dump_series(&series, &path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with('['));
        assert!(contents.contains("\"close\":1.5"));
    }
}
