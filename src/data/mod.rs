//! C4: DataProvider adapter — fetch OHLCV, normalize schema, trim to N candles (§4.4).
//!
//! Grounded on `tools/fetch.rs`: the `QuoteProvider` trait/mock-provider split, the
//! `execute`/`execute_with_provider` separation for testability, and the
//! `build_dataframe_from_quotes` normalization shape, generalized from Yahoo's
//! specific quote type to the interval/exchange-aware contract §4.4 describes.

pub mod yahoo;

use async_trait::async_trait;
use chrono::NaiveDate;
use polars::prelude::*;

use crate::error::AppError;
use crate::model::{Candle, Interval, OHLCVSeries};

const CRYPTO_EXCHANGES: &[&str] = &["BINANCE", "KRAKEN", "COINBASE", "BYBIT", "OKX"];

/// Raw quote as returned by an upstream market-data API, before column normalization.
#[derive(Debug, Clone)]
pub struct RawQuote {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adjclose: Option<f64>,
    pub volume: Option<f64>,
}

/// External market-data collaborator, mockable exactly like `tools/fetch.rs`'s `QuoteProvider`.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    async fn fetch_quotes(
        &self,
        ticker: &str,
        interval: Interval,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawQuote>, AppError>;
}

/// §4.4 step 1: crypto iff a known crypto venue or a hyphenated ticker (e.g. "BTC-USD").
pub fn classify_is_crypto(ticker: &str, exchange: Option<&str>) -> bool {
    if let Some(exchange) = exchange {
        if CRYPTO_EXCHANGES.contains(&exchange.to_uppercase().as_str()) {
            return true;
        }
    }
    ticker.contains('-')
}

/// §4.4 step 2: calendar-day window to request from the upstream provider.
pub fn days_to_fetch(interval: Interval, num_candles: u32, is_crypto: bool) -> i64 {
    let buffer = if is_crypto { 1.2 } else { 1.7 };
    let raw = interval.candles_per_day().recip() * f64::from(num_candles) * buffer;
    raw.ceil() as i64 + 2
}

/// Fetches and normalizes one OHLCV series (§4.4). Errors are returned, not thrown;
/// the orchestrator decides propagation.
pub async fn fetch(
    provider: &dyn QuoteProvider,
    ticker: &str,
    interval: Interval,
    num_candles: u32,
    exchange: Option<&str>,
) -> Result<OHLCVSeries, AppError> {
    let is_crypto = classify_is_crypto(ticker, exchange);
    let window_days = days_to_fetch(interval, num_candles, is_crypto);
    let end = chrono::Utc::now().date_naive();
    let start = end - chrono::Duration::days(window_days);

    let quotes = provider.fetch_quotes(ticker, interval, start, end).await?;
    if quotes.is_empty() {
        return Err(AppError::UnknownSymbol {
            ticker: ticker.to_string(),
        });
    }

    let df = build_dataframe(&quotes, ticker)?;
    let series = normalize(df, ticker)?;
    Ok(trim_to_last_n(series, num_candles as usize))
}

fn build_dataframe(quotes: &[RawQuote], ticker: &str) -> Result<DataFrame, AppError> {
    let timestamp: Vec<i64> = quotes.iter().map(|q| q.timestamp).collect();
    let open: Vec<f64> = quotes.iter().map(|q| q.open).collect();
    let high: Vec<f64> = quotes.iter().map(|q| q.high).collect();
    let low: Vec<f64> = quotes.iter().map(|q| q.low).collect();
    let close: Vec<f64> = quotes.iter().map(|q| q.close).collect();
    let adjclose: Vec<f64> = quotes.iter().map(|q| q.adjclose.unwrap_or(q.close)).collect();
    let volume: Vec<f64> = quotes.iter().map(|q| q.volume.unwrap_or(0.0)).collect();

    df!(
        "timestamp" => timestamp,
        "open" => open,
        "high" => high,
        "low" => low,
        "close" => close,
        "adjclose" => adjclose,
        "volume" => volume,
    )
    .map_err(|e| AppError::SchemaMismatch {
        ticker: ticker.to_string(),
        reason: e.to_string(),
    })
}

/// §4.4 steps 4-5: coalesce close columns, require OHLC, synthesize volume, drop
/// non-finite rows. Grounded on `data/parquet.rs`'s `normalize_quote_datetime` shape.
fn normalize(df: DataFrame, ticker: &str) -> Result<OHLCVSeries, AppError> {
    let height = df.height();
    let ts = df.column("timestamp").and_then(|c| c.i64()).map_err(|e| schema_err(ticker, e))?;
    let open = df.column("open").and_then(|c| c.f64()).map_err(|e| schema_err(ticker, e))?;
    let high = df.column("high").and_then(|c| c.f64()).map_err(|e| schema_err(ticker, e))?;
    let low = df.column("low").and_then(|c| c.f64()).map_err(|e| schema_err(ticker, e))?;
    let close = df.column("close").and_then(|c| c.f64()).map_err(|e| schema_err(ticker, e))?;
    let volume = df.column("volume").and_then(|c| c.f64()).map_err(|e| schema_err(ticker, e))?;

    let mut candles = Vec::with_capacity(height);
    for i in 0..height {
        let (Some(t), Some(o), Some(h), Some(l), Some(c)) =
            (ts.get(i), open.get(i), high.get(i), low.get(i), close.get(i))
        else {
            continue;
        };
        if !o.is_finite() || !h.is_finite() || !l.is_finite() || !c.is_finite() {
            continue;
        }
        let v = volume.get(i).filter(|v| v.is_finite()).unwrap_or(0.0);
        candles.push(Candle {
            time: t,
            open: o,
            high: h,
            low: l,
            close: c,
            volume: v.max(0.0),
        });
    }
    candles.sort_by_key(|c| c.time);
    candles.dedup_by_key(|c| c.time);
    Ok(OHLCVSeries::new(candles))
}

fn schema_err(ticker: &str, e: PolarsError) -> AppError {
    AppError::SchemaMismatch {
        ticker: ticker.to_string(),
        reason: e.to_string(),
    }
}

fn trim_to_last_n(mut series: OHLCVSeries, n: usize) -> OHLCVSeries {
    if series.candles.len() > n {
        let skip = series.candles.len() - n;
        series.candles.drain(0..skip);
    }
    series
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hyphenated_ticker_classified_as_crypto() {
        assert!(classify_is_crypto("BTC-USD", None));
        assert!(!classify_is_crypto("AAPL", None));
    }

    #[test]
    fn known_crypto_exchange_classified_as_crypto() {
        assert!(classify_is_crypto("AAPL", Some("KRAKEN")));
    }

    #[test]
    fn days_to_fetch_matches_spec_scenario_2() {
        // RequestSpec{interval="1h", num_candles=150, exchange="KRAKEN"} -> >= 10.
        let days = days_to_fetch(Interval::OneHour, 150, true);
        assert!(days >= 10, "expected >= 10, got {days}");
    }

    #[test]
    fn normalize_drops_non_finite_rows() {
        let df = df!(
            "timestamp" => [1i64, 2, 3],
            "open" => [1.0, f64::NAN, 3.0],
            "high" => [1.0, 2.0, 3.0],
            "low" => [1.0, 2.0, 3.0],
            "close" => [1.0, 2.0, 3.0],
            "volume" => [0.0, 0.0, 0.0],
        )
        .unwrap();
        let series = normalize(df, "T").unwrap();
        assert_eq!(series.len(), 2);
    }

    #[test]
    fn normalize_fills_negative_volume_to_zero_floor() {
        let df = df!(
            "timestamp" => [1i64],
            "open" => [1.0],
            "high" => [1.0],
            "low" => [1.0],
            "close" => [1.0],
            "volume" => [-5.0],
        )
        .unwrap();
        let series = normalize(df, "T").unwrap();
        assert_eq!(series.candles[0].volume, 0.0);
    }

    #[test]
    fn trim_keeps_only_last_n_candles() {
        let candles = (0..10)
            .map(|i| Candle { time: i, open: 1.0, high: 1.0, low: 1.0, close: 1.0, volume: 0.0 })
            .collect();
        let series = trim_to_last_n(OHLCVSeries::new(candles), 3);
        assert_eq!(series.len(), 3);
        assert_eq!(series.candles[0].time, 7);
    }
}
