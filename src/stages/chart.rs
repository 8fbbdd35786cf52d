//! ChartStage: renders a candlestick chart with indicator overlays (§4.5).

use async_trait::async_trait;

use crate::cache::TieredCache;
use crate::error::AppError;
use crate::model::{IndicatorSnapshot, Interval, OHLCVSeries, OpKind};
use crate::telemetry::TelemetrySink;

use super::run_cached;

/// External headless-browser renderer, modeled as a narrow trait boundary. No concrete
/// subprocess-based implementation ships in this crate (§9); an embedding host supplies one.
#[async_trait]
pub trait ChartRenderer: Send + Sync {
    async fn render(
        &self,
        series: &OHLCVSeries,
        indicators: &IndicatorSnapshot,
        ticker: &str,
        interval: Interval,
    ) -> Result<Vec<u8>, AppError>;
}

/// Test double: deterministic bytes derived from the ticker/interval, no real rendering.
pub struct NullChartRenderer;

#[async_trait]
impl ChartRenderer for NullChartRenderer {
    async fn render(
        &self,
        _series: &OHLCVSeries,
        _indicators: &IndicatorSnapshot,
        ticker: &str,
        interval: Interval,
    ) -> Result<Vec<u8>, AppError> {
        Ok(format!("PNG:{ticker}:{interval}").into_bytes())
    }
}

pub struct ChartStage<'a> {
    pub cache: &'a TieredCache,
    pub telemetry: &'a TelemetrySink,
    pub renderer: &'a dyn ChartRenderer,
}

impl<'a> ChartStage<'a> {
    /// Cache key: `(ticker, interval, data_fingerprint)` (§4.5 step 1).
    pub async fn run_cached(
        &self,
        series: &OHLCVSeries,
        indicators: &IndicatorSnapshot,
        ticker: &str,
        interval: Interval,
        data_fingerprint: &str,
    ) -> Result<Vec<u8>, AppError> {
        let fp = data_fingerprint.to_string();
        run_cached(
            self.telemetry,
            OpKind::ChartGen,
            || self.cache.get_chart(ticker, interval, &fp),
            || async {
                self.renderer
                    .render(series, indicators, ticker, interval)
                    .await
                    .map_err(|e| AppError::ChartRenderFailed {
                        ticker: ticker.to_string(),
                        reason: e.to_string(),
                    })
            },
            |bytes| self.cache.set_chart(ticker, interval, &fp, bytes.clone()),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::model::Candle;

    fn cache() -> TieredCache {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            storage_path: dir.path().to_path_buf(),
            ..CacheConfig::default()
        };
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

    #[tokio::test]
    async fn second_call_hits_cache_and_skips_the_renderer() {
        let cache = cache();
        let telemetry = TelemetrySink::new();
        let stage = ChartStage {
            cache: &cache,
            telemetry: &telemetry,
            renderer: &NullChartRenderer,
        };
        let snap = IndicatorSnapshot::default();
        let bytes1 = stage
            .run_cached(&series(), &snap, "AAPL", Interval::OneDay, "fp1")
            .await
            .unwrap();
        let bytes2 = stage
            .run_cached(&series(), &snap, "AAPL", Interval::OneDay, "fp1")
            .await
            .unwrap();
        assert_eq!(bytes1, bytes2);
        assert_eq!(cache.stats().memory.size, 1);
    }
}
