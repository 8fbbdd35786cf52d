//! Real `QuoteProvider` backed by the Yahoo Finance quote API.
//!
//! Grounded on `tools/fetch.rs`'s `YahooQuoteProvider`, which already depends on this
//! crate (the teacher's manifest was simply missing the entry — added in Cargo.toml).
//! Adds the retry/backoff this adapter needs per §4.4, in the shape of
//! `data/eodhd.rs`'s retry constants though not its literal values (no persistent
//! rate-limit counter is needed against Yahoo's unauthenticated quote endpoint).

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::AppError;
use crate::model::Interval;

use super::{QuoteProvider, RawQuote};

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 100;

pub struct YahooQuoteProvider;

impl YahooQuoteProvider {
    // `get_quote_history` returns daily bars for an explicit date range, matching §4.4's
    // "invoke the external market-data interface with the derived start date" (as opposed
    // to `get_quote_range`'s preset-range strings, which `tools/fetch.rs` uses but which
    // can't express an arbitrary computed start date). Sub-daily intervals are not
    // supported by this call; `interval` is accepted for contract symmetry with
    // `QuoteProvider` and validated rather than silently ignored.
    async fn fetch_once(
        ticker: &str,
        interval: Interval,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawQuote>, AppError> {
        if !matches!(interval, Interval::OneDay | Interval::OneWeek | Interval::OneMonth) {
            return Err(AppError::InvalidInterval {
                interval: interval.to_string(),
            });
        }

        let connector = yahoo_finance_api::YahooConnector::new().map_err(|e| AppError::UpstreamUnavailable {
            ticker: ticker.to_string(),
            reason: format!("connector init failed: {e}"),
        })?;

        let start_dt = start.and_hms_opt(0, 0, 0).unwrap().and_utc();
        let end_dt = end.and_hms_opt(23, 59, 59).unwrap().and_utc();

        let response = connector
            .get_quote_history(ticker, start_dt, end_dt)
            .await
            .map_err(|e| AppError::UpstreamUnavailable {
                ticker: ticker.to_string(),
                reason: e.to_string(),
            })?;

        let quotes = response.quotes().map_err(|e| AppError::SchemaMismatch {
            ticker: ticker.to_string(),
            reason: e.to_string(),
        })?;

        Ok(quotes
            .into_iter()
            .map(|q| RawQuote {
                timestamp: q.timestamp,
                open: q.open,
                high: q.high,
                low: q.low,
                close: q.close,
                adjclose: Some(q.adjclose),
                volume: Some(q.volume as f64),
            })
            .collect())
    }
}

#[async_trait]
impl QuoteProvider for YahooQuoteProvider {
    async fn fetch_quotes(
        &self,
        ticker: &str,
        interval: Interval,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawQuote>, AppError> {
        let mut attempt = 0;
        loop {
            match Self::fetch_once(ticker, interval, start, end).await {
                Ok(quotes) => return Ok(quotes),
                Err(e) if attempt < MAX_RETRIES => {
                    attempt += 1;
                    let backoff = BASE_BACKOFF_MS * 4u64.pow(attempt - 1);
                    tracing::warn!(ticker, attempt, backoff_ms = backoff, error = %e, "retrying quote fetch");
                    tokio::time::sleep(std::time::Duration::from_millis(backoff)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sub_daily_interval_is_rejected_before_any_network_call() {
        let err = YahooQuoteProvider::fetch_once(
            "AAPL",
            Interval::OneHour,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidInterval { .. }));
    }
}
