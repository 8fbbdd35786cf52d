//! Data model entities shared across the pipeline (requests, candles, snapshots, telemetry records).

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use garde::Validate;
use serde::{Deserialize, Serialize};

/// One of the nine candle intervals the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinute,
    #[serde(rename = "15m")]
    FifteenMinute,
    #[serde(rename = "30m")]
    ThirtyMinute,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHour,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "1w")]
    OneWeek,
    #[serde(rename = "1mo")]
    OneMonth,
}

impl Interval {
    pub fn as_str(self) -> &'static str {
        match self {
            Interval::OneMinute => "1m",
            Interval::FiveMinute => "5m",
            Interval::FifteenMinute => "15m",
            Interval::ThirtyMinute => "30m",
            Interval::OneHour => "1h",
            Interval::FourHour => "4h",
            Interval::OneDay => "1d",
            Interval::OneWeek => "1w",
            Interval::OneMonth => "1mo",
        }
    }

    /// Roughly how many candles of this interval occur in one calendar day;
    /// used by the DataProvider to estimate the calendar window to fetch (§4.4).
    pub fn candles_per_day(self) -> f64 {
        match self {
            Interval::OneMinute => 1440.0,
            Interval::FiveMinute => 288.0,
            Interval::FifteenMinute => 96.0,
            Interval::ThirtyMinute => 48.0,
            Interval::OneHour => 24.0,
            Interval::FourHour => 6.0,
            Interval::OneDay => 1.0,
            Interval::OneWeek => 1.0 / 7.0,
            Interval::OneMonth => 1.0 / 30.0,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Interval::OneMinute),
            "5m" => Ok(Interval::FiveMinute),
            "15m" => Ok(Interval::FifteenMinute),
            "30m" => Ok(Interval::ThirtyMinute),
            "1h" => Ok(Interval::OneHour),
            "4h" => Ok(Interval::FourHour),
            "1d" => Ok(Interval::OneDay),
            "1w" => Ok(Interval::OneWeek),
            "1mo" => Ok(Interval::OneMonth),
            other => Err(format!("unknown interval {other:?}")),
        }
    }
}

/// A request for a report, validated at the edge before it reaches the orchestrator.
#[derive(Debug, Clone, Validate)]
pub struct RequestSpec {
    #[garde(length(min = 1, max = 32))]
    pub ticker: String,
    #[garde(skip)]
    pub interval: Interval,
    #[garde(range(min = 1, max = 5000))]
    pub num_candles: u32,
    #[garde(length(max = 32))]
    pub exchange: Option<String>,
}

impl RequestSpec {
    pub fn new(
        ticker: impl Into<String>,
        interval: Interval,
        num_candles: u32,
        exchange: Option<String>,
    ) -> Result<Self, garde::Report> {
        let spec = Self {
            ticker: ticker.into(),
            interval,
            num_candles,
            exchange,
        };
        spec.validate()?;
        Ok(spec)
    }
}

/// One OHLCV bar. `low <= min(open,close) <= max(open,close) <= high`, volume >= 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn is_valid(&self) -> bool {
        let lo = self.open.min(self.close);
        let hi = self.open.max(self.close);
        self.volume >= 0.0 && self.low <= lo && hi <= self.high && self.low <= self.high
    }
}

/// Strictly time-ascending, deduplicated sequence of candles, no longer than requested.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OHLCVSeries {
    pub candles: Vec<Candle>,
}

impl OHLCVSeries {
    pub fn new(candles: Vec<Candle>) -> Self {
        Self { candles }
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn latest_close(&self) -> Option<f64> {
        self.candles.last().map(|c| c.close)
    }

    /// Checked strictly-ascending, no-duplicate-timestamp invariant (§3, §8 invariant 3).
    pub fn is_strictly_ascending(&self) -> bool {
        self.candles.windows(2).all(|w| w[0].time < w[1].time)
    }
}

/// Scalar digest of the latest bar after indicator computation (§3).
/// NaN means "unavailable" (indicator warm-up) and serializes as JSON `null`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    #[serde(with = "nan_as_null")]
    pub latest_close: f64,
    #[serde(with = "nan_as_null")]
    pub period_high: f64,
    #[serde(with = "nan_as_null")]
    pub period_low: f64,
    #[serde(with = "nan_as_null")]
    pub bb_upper: f64,
    #[serde(with = "nan_as_null")]
    pub bb_middle: f64,
    #[serde(with = "nan_as_null")]
    pub bb_lower: f64,
    #[serde(with = "nan_as_null")]
    pub stoch_k: f64,
    #[serde(with = "nan_as_null")]
    pub stoch_d: f64,
}

impl IndicatorSnapshot {
    /// Rounds each field to the decimal precision §3 specifies: Bollinger to 2dp,
    /// stochastic to whole numbers, everything else to 4dp. NaN passes through untouched.
    pub fn rounded(self) -> Self {
        let r2 = |v: f64| if v.is_finite() { (v * 100.0).round() / 100.0 } else { v };
        let r0 = |v: f64| if v.is_finite() { v.round() } else { v };
        let r4 = |v: f64| {
            if v.is_finite() {
                (v * 10_000.0).round() / 10_000.0
            } else {
                v
            }
        };
        Self {
            latest_close: r4(self.latest_close),
            period_high: r4(self.period_high),
            period_low: r4(self.period_low),
            bb_upper: r2(self.bb_upper),
            bb_middle: r2(self.bb_middle),
            bb_lower: r2(self.bb_lower),
            stoch_k: r0(self.stoch_k),
            stoch_d: r0(self.stoch_d),
        }
    }

    /// §8 invariant 4: bounds hold whenever the relevant fields are finite.
    pub fn satisfies_bounds(&self) -> bool {
        let close_in_range = if self.period_low.is_finite()
            && self.latest_close.is_finite()
            && self.period_high.is_finite()
        {
            self.period_low <= self.latest_close && self.latest_close <= self.period_high
        } else {
            true
        };
        let bb_ordered = if self.bb_lower.is_finite() && self.bb_middle.is_finite() && self.bb_upper.is_finite()
        {
            self.bb_lower <= self.bb_middle && self.bb_middle <= self.bb_upper
        } else {
            true
        };
        let stoch_in_range = (!self.stoch_k.is_finite() || (0.0..=100.0).contains(&self.stoch_k))
            && (!self.stoch_d.is_finite() || (0.0..=100.0).contains(&self.stoch_d));
        close_in_range && bb_ordered && stoch_in_range
    }
}

mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, s: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            value.serialize(s)
        } else {
            s.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(d)?.unwrap_or(f64::NAN))
    }
}

/// The three semantic cache partitions (§3, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bucket {
    Data,
    Chart,
    Analysis,
}

impl Bucket {
    pub fn as_str(self) -> &'static str {
        match self {
            Bucket::Data => "data",
            Bucket::Chart => "chart",
            Bucket::Analysis => "analysis",
        }
    }
}

/// Which operation an [`OperationRecord`] describes (§3, §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    DataFetch,
    ChartGen,
    LlmAnalyze,
    ReportGen,
}

impl OpKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OpKind::DataFetch => "data_fetch",
            OpKind::ChartGen => "chart_gen",
            OpKind::LlmAnalyze => "llm_analyze",
            OpKind::ReportGen => "report_gen",
        }
    }

    /// The cache bucket this operation's hit/miss counters roll up into, if any (§4.2).
    pub fn bucket(self) -> Option<Bucket> {
        match self {
            OpKind::DataFetch => Some(Bucket::Data),
            OpKind::ChartGen => Some(Bucket::Chart),
            OpKind::LlmAnalyze => Some(Bucket::Analysis),
            OpKind::ReportGen => None,
        }
    }
}

/// One entry in a per-operation ring buffer (§3, bounded to 1000 by the sink).
#[derive(Debug, Clone, Serialize)]
pub struct OperationRecord {
    pub op: OpKind,
    pub duration_ms: f64,
    pub cache_hit: bool,
    pub wall_time_ns: u128,
    pub metadata: HashMap<String, String>,
}

/// Session-wide rolling counters (§3), updated atomically on each request outcome.
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub avg_response_ms: f64,
    pub session_start: Instant,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self {
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            avg_response_ms: 0.0,
            session_start: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candle_rejects_negative_volume() {
        let c = Candle {
            time: 0,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: -1.0,
        };
        assert!(!c.is_valid());
    }

    #[test]
    fn candle_rejects_high_below_body() {
        let c = Candle {
            time: 0,
            open: 5.0,
            high: 4.0,
            low: 1.0,
            close: 6.0,
            volume: 0.0,
        };
        assert!(!c.is_valid());
    }

    #[test]
    fn series_strictly_ascending() {
        let mk = |t| Candle { time: t, open: 1.0, high: 1.0, low: 1.0, close: 1.0, volume: 0.0 };
        let series = OHLCVSeries::new(vec![mk(1), mk(2), mk(3)]);
        assert!(series.is_strictly_ascending());
        let dup = OHLCVSeries::new(vec![mk(1), mk(1)]);
        assert!(!dup.is_strictly_ascending());
    }

    #[test]
    fn snapshot_rounding_matches_spec_precision() {
        let snap = IndicatorSnapshot {
            latest_close: 123.456_789,
            period_high: 130.0,
            period_low: 110.0,
            bb_upper: 140.126,
            bb_middle: 125.004,
            bb_lower: 110.001,
            stoch_k: 55.6,
            stoch_d: 44.4,
        }
        .rounded();
        assert_eq!(snap.bb_upper, 140.13);
        assert_eq!(snap.stoch_k, 56.0);
        assert_eq!(snap.latest_close, 123.4568);
    }

    #[test]
    fn snapshot_bounds_ignore_nan_fields() {
        let snap = IndicatorSnapshot {
            latest_close: f64::NAN,
            ..IndicatorSnapshot::default()
        };
        assert!(snap.satisfies_bounds());
    }

    #[test]
    fn snapshot_rejects_out_of_order_bollinger() {
        let snap = IndicatorSnapshot {
            bb_lower: 10.0,
            bb_middle: 5.0,
            bb_upper: 20.0,
            ..IndicatorSnapshot::default()
        };
        assert!(!snap.satisfies_bounds());
    }

    #[test]
    fn op_kind_maps_to_expected_bucket() {
        assert_eq!(OpKind::DataFetch.bucket(), Some(Bucket::Data));
        assert_eq!(OpKind::ReportGen.bucket(), None);
    }
}
