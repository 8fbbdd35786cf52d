//! A3: append-only index of generated reports, backed by `rusqlite` + `refinery`
//! migrations (§6 "Report index contract").
//!
//! Grounded on `database/connection.rs`'s `Database { conn: Mutex<Connection> }`
//! wrapper and table-per-method style, with schema management promoted to `refinery`
//! migrations (declared in the teacher's manifest but never wired up — wired up here).

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection};

use crate::error::AppError;
use crate::model::{IndicatorSnapshot, Interval};

refinery::embed_migrations!("migrations");

#[derive(Debug, Clone)]
pub struct ReportRow {
    pub id: i64,
    pub user_id: Option<String>,
    pub symbol: String,
    pub interval: String,
    pub filepath: String,
    pub generated_at: DateTime<Utc>,
    pub latest_close: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    pub stoch_k: Option<f64>,
    pub stoch_d: Option<f64>,
}

pub struct ReportIndex {
    conn: Mutex<Connection>,
}

impl ReportIndex {
    pub fn open(db_path: &Path) -> Result<Self, AppError> {
        let mut conn = Connection::open(db_path).map_err(|e| AppError::ConfigInvalid {
            reason: format!("cannot open report index at {}: {e}", db_path.display()),
        })?;
        migrations::runner().run(&mut conn).map_err(|e| AppError::ConfigInvalid {
            reason: format!("report index migration failed: {e}"),
        })?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// §4.6 step 7: one append per successful request. Insert failure is logged by the
    /// caller, never fatal to the request (§4 failure-semantics table).
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        user_id: Option<&str>,
        symbol: &str,
        interval: Interval,
        filepath: &str,
        generated_at: DateTime<Utc>,
        snapshot: &IndicatorSnapshot,
    ) -> Result<i64, AppError> {
        let conn = self.conn.lock().expect("report index lock poisoned");
        conn.execute(
            "INSERT INTO reports (
                user_id, symbol, interval, filepath, generated_at,
                latest_close, bb_upper, bb_middle, bb_lower, stoch_k, stoch_d
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                user_id,
                symbol,
                interval.as_str(),
                filepath,
                generated_at.to_rfc3339(),
                finite_or_null(snapshot.latest_close),
                finite_or_null(snapshot.bb_upper),
                finite_or_null(snapshot.bb_middle),
                finite_or_null(snapshot.bb_lower),
                finite_or_null(snapshot.stoch_k),
                finite_or_null(snapshot.stoch_d),
            ],
        )
        .map_err(|e| AppError::ConfigInvalid {
            reason: format!("report index insert failed: {e}"),
        })?;
        Ok(conn.last_insert_rowid())
    }

    /// Mirrors the original's query surface: optionally scoped by user and/or calendar day.
    pub fn list_reports(
        &self,
        user_id: Option<&str>,
        date: Option<NaiveDate>,
    ) -> Result<Vec<ReportRow>, AppError> {
        let conn = self.conn.lock().expect("report index lock poisoned");
        let mut sql = String::from(
            "SELECT id, user_id, symbol, interval, filepath, generated_at,
                    latest_close, bb_upper, bb_middle, bb_lower, stoch_k, stoch_d
             FROM reports WHERE 1=1",
        );
        if user_id.is_some() {
            sql.push_str(" AND user_id = ?1");
        }
        if date.is_some() {
            sql.push_str(if user_id.is_some() {
                " AND substr(generated_at, 1, 10) = ?2"
            } else {
                " AND substr(generated_at, 1, 10) = ?1"
            });
        }
        sql.push_str(" ORDER BY generated_at DESC");

        let mut stmt = conn.prepare(&sql).map_err(|e| AppError::ConfigInvalid {
            reason: format!("report index query failed: {e}"),
        })?;

        let date_str = date.map(|d| d.format("%Y-%m-%d").to_string());
        let bind: Vec<&dyn rusqlite::ToSql> = match (user_id, &date_str) {
            (Some(u), Some(d)) => vec![&u, d],
            (Some(u), None) => vec![&u],
            (None, Some(d)) => vec![d],
            (None, None) => vec![],
        };

        let rows = stmt
            .query_map(bind.as_slice(), |row| {
                Ok(ReportRow {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    symbol: row.get(2)?,
                    interval: row.get(3)?,
                    filepath: row.get(4)?,
                    generated_at: row
                        .get::<_, String>(5)?
                        .parse::<DateTime<Utc>>()
                        .unwrap_or_else(|_| Utc::now()),
                    latest_close: row.get(6)?,
                    bb_upper: row.get(7)?,
                    bb_middle: row.get(8)?,
                    bb_lower: row.get(9)?,
                    stoch_k: row.get(10)?,
                    stoch_d: row.get(11)?,
                })
            })
            .map_err(|e| AppError::ConfigInvalid {
                reason: format!("report index row decode failed: {e}"),
            })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(|e| AppError::ConfigInvalid {
            reason: format!("report index row decode failed: {e}"),
        })
    }
}

fn finite_or_null(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> (tempfile::TempDir, ReportIndex) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("reports.sqlite");
        let idx = ReportIndex::open(&db_path).unwrap();
        (dir, idx)
    }

    fn snapshot() -> IndicatorSnapshot {
        IndicatorSnapshot {
            latest_close: 123.45,
            period_high: 130.0,
            period_low: 110.0,
            bb_upper: 140.0,
            bb_middle: 125.0,
            bb_lower: 110.0,
            stoch_k: 55.0,
            stoch_d: 44.0,
        }
    }

    #[test]
    fn record_then_list_round_trips() {
        let (_dir, idx) = index();
        idx.record(Some("u1"), "AAPL", Interval::OneDay, "/out/a.png", Utc::now(), &snapshot())
            .unwrap();
        let rows = idx.list_reports(Some("u1"), None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol, "AAPL");
        assert_eq!(rows[0].latest_close, Some(123.45));
    }

    #[test]
    fn list_filters_by_user_id() {
        let (_dir, idx) = index();
        idx.record(Some("u1"), "AAPL", Interval::OneDay, "/out/a.png", Utc::now(), &snapshot())
            .unwrap();
        idx.record(Some("u2"), "MSFT", Interval::OneDay, "/out/b.png", Utc::now(), &snapshot())
            .unwrap();
        let rows = idx.list_reports(Some("u2"), None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol, "MSFT");
    }

    #[test]
    fn nan_indicator_fields_are_stored_as_null() {
        let (_dir, idx) = index();
        let mut snap = snapshot();
        snap.bb_upper = f64::NAN;
        idx.record(None, "AAPL", Interval::OneDay, "/out/a.png", Utc::now(), &snap)
            .unwrap();
        let rows = idx.list_reports(None, None).unwrap();
        assert_eq!(rows[0].bb_upper, None);
    }
}
