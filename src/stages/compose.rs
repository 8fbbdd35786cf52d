//! ReportComposer: the final Markdown-to-image composition step (§4.6 Phase 4).
//!
//! Mirrors `ChartRenderer`/`AnalysisProvider`'s trait-boundary-plus-test-double shape;
//! no concrete implementation ships in this crate (§9).

use std::path::Path;

use async_trait::async_trait;

use crate::error::AppError;
use crate::model::{IndicatorSnapshot, Interval};

#[async_trait]
pub trait ReportComposer: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn compose(
        &self,
        analysis_path: &Path,
        chart_path: &Path,
        output_path: &Path,
        ticker: &str,
        interval: Interval,
        indicators: &IndicatorSnapshot,
        author: &str,
        avatar: Option<&Path>,
    ) -> Result<(), AppError>;
}

/// Test double: writes a small marker file to `output_path` instead of compositing a
/// real image, so callers can assert the output artifact exists.
pub struct NullReportComposer;

#[async_trait]
impl ReportComposer for NullReportComposer {
    async fn compose(
        &self,
        _analysis_path: &Path,
        _chart_path: &Path,
        output_path: &Path,
        ticker: &str,
        interval: Interval,
        _indicators: &IndicatorSnapshot,
        _author: &str,
        _avatar: Option<&Path>,
    ) -> Result<(), AppError> {
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::ReportComposeFailed {
                ticker: ticker.to_string(),
                reason: e.to_string(),
            })?;
        }
        std::fs::write(output_path, format!("composite report for {ticker} ({interval})")).map_err(|e| {
            AppError::ReportComposeFailed {
                ticker: ticker.to_string(),
                reason: e.to_string(),
            }
        })
    }
}
