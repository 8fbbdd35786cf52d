//! Unified error taxonomy (§7). Every stage returns `Result<T, AppError>`; the
//! CLI boundary (`main.rs`) is the only place these get folded into `anyhow::Error`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("missing credentials for {provider}")]
    MissingCredentials { provider: String },

    #[error("upstream unavailable for {ticker}: {reason}")]
    UpstreamUnavailable { ticker: String, reason: String },

    #[error("unknown symbol: {ticker}")]
    UnknownSymbol { ticker: String },

    #[error("invalid interval: {interval}")]
    InvalidInterval { interval: String },

    #[error("schema mismatch fetching {ticker}: {reason}")]
    SchemaMismatch { ticker: String, reason: String },

    #[error("indicator computation failed for {ticker}: {reason}")]
    IndicatorComputeFailed { ticker: String, reason: String },

    #[error("chart render failed for {ticker}: {reason}")]
    ChartRenderFailed { ticker: String, reason: String },

    #[error("analysis returned empty response for {ticker}")]
    AnalysisEmpty { ticker: String },

    #[error("analysis unavailable for {ticker}: {reason}")]
    AnalysisUnavailable { ticker: String, reason: String },

    #[error("report compose failed for {ticker}: {reason}")]
    ReportComposeFailed { ticker: String, reason: String },

    #[error("cache entry corrupt at {key}: {reason}")]
    CacheCorrupt { key: String, reason: String },

    #[error("invalid configuration: {reason}")]
    ConfigInvalid { reason: String },
}

impl AppError {
    /// The short, stable tag (§7: "a short stable error tag plus a human-readable sentence").
    pub fn tag(&self) -> &'static str {
        match self {
            AppError::MissingCredentials { .. } => "MissingCredentials",
            AppError::UpstreamUnavailable { .. } => "UpstreamUnavailable",
            AppError::UnknownSymbol { .. } => "UnknownSymbol",
            AppError::InvalidInterval { .. } => "InvalidInterval",
            AppError::SchemaMismatch { .. } => "SchemaMismatch",
            AppError::IndicatorComputeFailed { .. } => "IndicatorComputeFailed",
            AppError::ChartRenderFailed { .. } => "ChartRenderFailed",
            AppError::AnalysisEmpty { .. } => "AnalysisEmpty",
            AppError::AnalysisUnavailable { .. } => "AnalysisUnavailable",
            AppError::ReportComposeFailed { .. } => "ReportComposeFailed",
            AppError::CacheCorrupt { .. } => "CacheCorrupt",
            AppError::ConfigInvalid { .. } => "ConfigInvalid",
        }
    }

    /// Cache-layer errors are recovered locally per §7 and never surfaced to a caller.
    pub fn is_cache_local(&self) -> bool {
        matches!(self, AppError::CacheCorrupt { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_is_stable_short_identifier() {
        let err = AppError::UnknownSymbol {
            ticker: "NONEXIST".into(),
        };
        assert_eq!(err.tag(), "UnknownSymbol");
        assert!(err.to_string().contains("NONEXIST"));
    }

    #[test]
    fn cache_corrupt_is_local() {
        let err = AppError::CacheCorrupt {
            key: "abc".into(),
            reason: "bad encoding".into(),
        };
        assert!(err.is_cache_local());
    }
}
