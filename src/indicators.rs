//! C-none (Phase 2 of the Orchestrator): computes an `IndicatorSnapshot` from an
//! `OHLCVSeries` (§4.6 step 3).
//!
//! Grounded on `signals/volatility.rs`'s `moving_constant_bands` call for Bollinger
//! Bands and `signals/momentum.rs`'s `stochastic_oscillator`/`standard_indicators::bulk`
//! calls for the RSI leg of StochRSI — both used directly, nothing hand-rolled, per the
//! glossary's definition of StochRSI as RSI smoothed through two stochastic/SMA passes.

use rust_ti::standard_indicators::bulk as sti;

use crate::error::AppError;
use crate::model::{IndicatorSnapshot, OHLCVSeries};

const BB_PERIOD: usize = 20;
const BB_STD_DEVS: f64 = 2.0;
const RSI_PERIOD: usize = 14;
const STOCH_PERIOD: usize = 14;
const K_SMOOTH: usize = 3;
const D_SMOOTH: usize = 3;

/// Computes the latest-bar snapshot. Fields that can't be computed yet because the
/// series is shorter than the indicator's warm-up window come back as NaN, not an
/// error — only a wholly unusable series (empty, or no finite closes) is fatal.
pub fn compute_snapshot(series: &OHLCVSeries, ticker: &str) -> Result<IndicatorSnapshot, AppError> {
    let latest_close = series.latest_close().ok_or_else(|| AppError::IndicatorComputeFailed {
        ticker: ticker.to_string(),
        reason: "empty series".into(),
    })?;

    let closes: Vec<f64> = series.candles.iter().map(|c| c.close).collect();
    let period_high = series.candles.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
    let period_low = series.candles.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);

    let (bb_lower, bb_middle, bb_upper) = bollinger_bands(&closes);
    let (stoch_k, stoch_d) = stoch_rsi(&closes);

    Ok(IndicatorSnapshot {
        latest_close,
        period_high,
        period_low,
        bb_upper,
        bb_middle,
        bb_lower,
        stoch_k,
        stoch_d,
    }
    .rounded())
}

/// Bollinger(20,2): SMA-centered, ±2 standard deviations. Returns `(lower, middle, upper)`
/// of the latest period; NaN triple if there isn't a full period yet.
fn bollinger_bands(closes: &[f64]) -> (f64, f64, f64) {
    if closes.len() < BB_PERIOD {
        return (f64::NAN, f64::NAN, f64::NAN);
    }
    let bands = rust_ti::candle_indicators::bulk::moving_constant_bands(
        closes,
        rust_ti::ConstantModelType::SimpleMovingAverage,
        rust_ti::DeviationModel::StandardDeviation,
        BB_STD_DEVS,
        BB_PERIOD,
    );
    bands.last().copied().unwrap_or((f64::NAN, f64::NAN, f64::NAN))
}

/// StochRSI(14,14,3,3): RSI(14) of the close series, a rolling stochastic oscillator
/// over that RSI series, then two successive 3-period SMA smoothing passes for %K/%D.
fn stoch_rsi(closes: &[f64]) -> (f64, f64) {
    if closes.len() < RSI_PERIOD {
        return (f64::NAN, f64::NAN);
    }
    let rsi_values = sti::rsi(closes);
    if rsi_values.len() < STOCH_PERIOD {
        return (f64::NAN, f64::NAN);
    }

    let stoch_values: Vec<f64> = rsi_values
        .windows(STOCH_PERIOD)
        .map(rust_ti::momentum_indicators::single::stochastic_oscillator)
        .collect();
    if stoch_values.len() < K_SMOOTH {
        return (f64::NAN, f64::NAN);
    }

    let k_values = sti::simple_moving_average(&stoch_values, K_SMOOTH);
    if k_values.len() < D_SMOOTH {
        return (k_values.last().copied().unwrap_or(f64::NAN), f64::NAN);
    }
    let d_values = sti::simple_moving_average(&k_values, D_SMOOTH);

    (
        k_values.last().copied().unwrap_or(f64::NAN),
        d_values.last().copied().unwrap_or(f64::NAN),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Candle;

    fn series_of(n: usize) -> OHLCVSeries {
        let candles = (0..n)
            .map(|i| {
                let price = 100.0 + (i as f64 * 0.3).sin() * 5.0 + i as f64 * 0.05;
                Candle {
                    time: i as i64,
                    open: price,
                    high: price + 1.0,
                    low: price - 1.0,
                    close: price,
                    volume: 1000.0,
                }
            })
            .collect();
        OHLCVSeries::new(candles)
    }

    #[test]
    fn short_series_yields_nan_indicators_not_an_error() {
        let snap = compute_snapshot(&series_of(5), "AAPL").unwrap();
        assert!(snap.bb_upper.is_nan());
        assert!(snap.stoch_k.is_nan());
        assert!(snap.latest_close.is_finite());
    }

    #[test]
    fn long_series_yields_finite_bounded_indicators() {
        let snap = compute_snapshot(&series_of(120), "AAPL").unwrap();
        assert!(snap.bb_upper.is_finite());
        assert!(snap.stoch_k.is_finite());
        assert!(snap.satisfies_bounds());
    }

    #[test]
    fn period_high_low_bracket_latest_close() {
        let snap = compute_snapshot(&series_of(60), "AAPL").unwrap();
        assert!(snap.period_low <= snap.latest_close);
        assert!(snap.latest_close <= snap.period_high);
    }

    #[test]
    fn empty_series_is_a_fatal_compute_error() {
        let err = compute_snapshot(&OHLCVSeries::new(vec![]), "AAPL").unwrap_err();
        assert!(matches!(err, AppError::IndicatorComputeFailed { .. }));
    }
}
