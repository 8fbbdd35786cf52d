//! AnalyzeStage: narrative technical analysis from an `IndicatorSnapshot` (§4.5).
//!
//! The prompt template is grounded in `llm_analyzer.py`'s `_get_system_prompt`/
//! `_get_user_prompt` (same four-paragraph report structure: trend assessment, price
//! action, indicator synthesis, trading plan), reauthored in English rather than
//! translated — the original's literal wording is not carried over.

use async_trait::async_trait;

use crate::cache::TieredCache;
use crate::error::AppError;
use crate::model::{IndicatorSnapshot, OpKind};
use crate::telemetry::TelemetrySink;

use super::run_cached;

const SYSTEM_PROMPT: &str = "You are a professional financial technical analyst, an expert in \
Al Brooks' Price Action theory, Bollinger Bands, volume analysis, and the Stochastic RSI \
indicator. Your analytical style is decisive and professional, integrating signals from \
different tools into one coherent narrative with clear, actionable trading guidance.";

/// External LLM collaborator, mockable like `ChartRenderer`.
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    async fn analyze(&self, ticker: &str, indicators: &IndicatorSnapshot) -> Result<String, AppError>;
}

pub fn user_prompt(ticker: &str, indicators: &IndicatorSnapshot) -> String {
    format!(
        "Reference data (prefer these figures over any other source):\n\
         Latest close: {latest_close}\n\
         Period high: {period_high}\n\
         Period low: {period_low}\n\
         Bollinger upper band: {bb_upper}\n\
         Bollinger middle band: {bb_middle}\n\
         Bollinger lower band: {bb_lower}\n\
         Stochastic RSI %K: {stoch_k}\n\
         Stochastic RSI %D: {stoch_d}\n\n\
         Using the reference data above together with your general knowledge of this \
         symbol's recent behavior, write a technical analysis report for {ticker}. You \
         were not given a chart image, so base the analysis on the figures provided and \
         your general knowledge of this asset's recent price action.\n\n\
         Favor the reference data whenever you cite a specific price level, support, \
         resistance, or indicator value.\n\n\
         Analytical frameworks to draw on: Bollinger Bands (price relative to the three \
         bands and band-width changes), volume (paired with price moves to judge trend \
         health), Stochastic RSI (overbought/oversold and momentum-shift signals), Al \
         Brooks price action (trend bars, signal bars, micro channels, pullbacks, \
         breakouts, and major structure), and chart patterns (key support, resistance, \
         trendlines, simple formations).\n\n\
         Write the whole response as flowing, complete prose. Do not use bullet points, \
         numbered lists, or any list-like formatting. Cover four themes, one paragraph \
         each, in this order: an overall assessment of trend and market condition; a \
         detailed read of price action and chart structure; a synthesis of what the \
         indicators say together; and a close with a clear trading strategy and risk plan.",
        ticker = ticker,
        latest_close = format_value(indicators.latest_close),
        period_high = format_value(indicators.period_high),
        period_low = format_value(indicators.period_low),
        bb_upper = format_value(indicators.bb_upper),
        bb_middle = format_value(indicators.bb_middle),
        bb_lower = format_value(indicators.bb_lower),
        stoch_k = format_value(indicators.stoch_k),
        stoch_d = format_value(indicators.stoch_d),
    )
}

fn format_value(v: f64) -> String {
    if v.is_finite() {
        format!("{v}")
    } else {
        "N/A".to_string()
    }
}

/// Test double returning a fixed, deterministic analysis string.
pub struct CannedAnalysisProvider(pub String);

#[async_trait]
impl AnalysisProvider for CannedAnalysisProvider {
    async fn analyze(&self, _ticker: &str, _indicators: &IndicatorSnapshot) -> Result<String, AppError> {
        Ok(self.0.clone())
    }
}

pub struct AnalyzeStage<'a> {
    pub cache: &'a TieredCache,
    pub telemetry: &'a TelemetrySink,
    pub provider: &'a dyn AnalysisProvider,
}

impl<'a> AnalyzeStage<'a> {
    /// Cache key: `(ticker, data_fingerprint)` — interval intentionally excluded (§4.5, §9).
    pub async fn run_cached(
        &self,
        ticker: &str,
        indicators: &IndicatorSnapshot,
        data_fingerprint: &str,
    ) -> Result<String, AppError> {
        let fp = data_fingerprint.to_string();
        run_cached(
            self.telemetry,
            OpKind::LlmAnalyze,
            || self.cache.get_analysis(ticker, &fp),
            || async {
                let text = self.provider.analyze(ticker, indicators).await.map_err(|e| {
                    AppError::AnalysisUnavailable {
                        ticker: ticker.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                if text.trim().is_empty() {
                    return Err(AppError::AnalysisEmpty {
                        ticker: ticker.to_string(),
                    });
                }
                Ok(text)
            },
            |text| self.cache.set_analysis(ticker, &fp, text.clone()),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;

    fn cache() -> TieredCache {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            storage_path: dir.path().to_path_buf(),
            ..CacheConfig::default()
        };
        std::mem::forget(dir);
        TieredCache::new(config)
    }

    #[tokio::test]
    async fn empty_provider_response_is_treated_as_failure() {
        let cache = cache();
        let telemetry = TelemetrySink::new();
        let provider = CannedAnalysisProvider(String::new());
        let stage = AnalyzeStage {
            cache: &cache,
            telemetry: &telemetry,
            provider: &provider,
        };
        let err = stage
            .run_cached("AAPL", &IndicatorSnapshot::default(), "fp1")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AnalysisEmpty { .. }));
    }

    #[tokio::test]
    async fn second_call_hits_cache_and_skips_the_provider() {
        let cache = cache();
        let telemetry = TelemetrySink::new();
        let provider = CannedAnalysisProvider("bullish continuation expected".into());
        let stage = AnalyzeStage {
            cache: &cache,
            telemetry: &telemetry,
            provider: &provider,
        };
        let snap = IndicatorSnapshot::default();
        let first = stage.run_cached("AAPL", &snap, "fp1").await.unwrap();
        let second = stage.run_cached("AAPL", &snap, "fp1").await.unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn user_prompt_embeds_indicator_values_verbatim() {
        let snap = IndicatorSnapshot {
            latest_close: 123.45,
            ..IndicatorSnapshot::default()
        };
        let prompt = user_prompt("AAPL", &snap);
        assert!(prompt.contains("123.45"));
        assert!(prompt.contains("AAPL"));
    }
}
