//! Content-addressed hashing for cache keys (§4.1).
//!
//! The source hashes `(shape, first timestamp, last timestamp, last close)` with
//! md5 rather than the full tick history, since that tuple is a sufficient
//! statistic for "same logical dataset" over monotonic append-only bars. This
//! crate uses `blake3` in place of md5 (see DESIGN.md) but keeps the same
//! concat-and-hash shape.

use crate::model::OHLCVSeries;

/// 16 hex characters, i.e. the first 8 bytes of the underlying digest.
pub type Fingerprint = String;

fn digest_to_fingerprint(bytes: &[u8]) -> Fingerprint {
    let hash = blake3::hash(bytes);
    hash.to_hex()[..16].to_string()
}

/// Deterministic fingerprint of an OHLCVSeries: `shape:RxC|start:T0|end:TN|last_close:X.XXXX`.
pub fn fingerprint_series(series: &OHLCVSeries) -> Fingerprint {
    let rows = series.len();
    const COLS: usize = 5; // open, high, low, close, volume
    let start = series.candles.first().map(|c| c.time).unwrap_or(0);
    let end = series.candles.last().map(|c| c.time).unwrap_or(0);
    let last_close = series.latest_close().unwrap_or(0.0);
    let material = format!("shape:{rows}x{COLS}|start:{start}|end:{end}|last_close:{last_close:.4}");
    digest_to_fingerprint(material.as_bytes())
}

/// Fingerprint of an arbitrary `(name, value)` bundle, used for non-series cache-key
/// material: pairs are sorted lexicographically by name before hashing so the result
/// doesn't depend on construction order.
pub fn fingerprint_pairs(pairs: &[(&str, &str)]) -> Fingerprint {
    let mut sorted: Vec<&(&str, &str)> = pairs.iter().collect();
    sorted.sort_by_key(|(k, _)| *k);
    let material = sorted
        .iter()
        .map(|(k, v)| format!("{k}:{v}"))
        .collect::<Vec<_>>()
        .join("_");
    digest_to_fingerprint(material.as_bytes())
}
