//! Bar storage: immutable OHLCV history shared by every run.

use crate::clock::Timeframe;
use crate::error::CoreResult;
use crate::models::Bar;
use crate::store::Database;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use rust_decimal::Decimal;
use std::sync::Arc;

pub struct BarStore {
    db: Arc<Database>,
}

impl BarStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Bulk insert inside one transaction. Existing `(symbol, timeframe,
    /// ts)` keys are left untouched: bars are immutable.
    pub fn insert_many(&self, bars: &[Bar]) -> CoreResult<usize> {
        let mut conn = self.db.lock();
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO bars (symbol, timeframe, ts, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for bar in bars {
                inserted += stmt.execute(params![
                    bar.symbol,
                    bar.timeframe.as_str(),
                    bar.ts.to_rfc3339(),
                    bar.open.to_string(),
                    bar.high.to_string(),
                    bar.low.to_string(),
                    bar.close.to_string(),
                    bar.volume.to_string(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Bars with `from <= ts < to`, ascending.
    pub fn range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> CoreResult<Vec<Bar>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT symbol, timeframe, ts, open, high, low, close, volume
             FROM bars
             WHERE symbol = ?1 AND timeframe = ?2 AND ts >= ?3 AND ts < ?4
             ORDER BY ts ASC LIMIT ?5",
        )?;
        let rows = stmt.query_map(
            params![
                symbol,
                timeframe.as_str(),
                from.to_rfc3339(),
                to.to_rfc3339(),
                limit as i64
            ],
            decode_bar,
        )?;
        Ok(rows.collect::<Result<_, _>>()?)
    }
}

fn decode_bar(row: &Row<'_>) -> rusqlite::Result<Bar> {
    fn bad(e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    }
    let parse_decimal = |text: String| text.parse::<Decimal>().map_err(bad);

    Ok(Bar {
        symbol: row.get(0)?,
        timeframe: row.get::<_, String>(1)?.parse().map_err(|m: String| {
            bad(std::io::Error::new(std::io::ErrorKind::InvalidData, m))
        })?,
        ts: DateTime::parse_from_rfc3339(&row.get::<_, String>(2)?)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(bad)?,
        open: parse_decimal(row.get(3)?)?,
        high: parse_decimal(row.get(4)?)?,
        low: parse_decimal(row.get(5)?)?,
        close: parse_decimal(row.get(6)?)?,
        volume: parse_decimal(row.get(7)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn flat_bar(ts: &str) -> Bar {
        Bar {
            symbol: "BTC".to_string(),
            timeframe: Timeframe::M1,
            ts: ts.parse().unwrap(),
            open: dec!(100),
            high: dec!(100),
            low: dec!(100),
            close: dec!(100),
            volume: dec!(1),
        }
    }

    #[test]
    fn test_range_is_half_open() {
        let store = BarStore::new(Database::open_in_memory().unwrap());
        store
            .insert_many(&[
                flat_bar("2026-01-01T00:00:00Z"),
                flat_bar("2026-01-01T00:01:00Z"),
                flat_bar("2026-01-01T00:02:00Z"),
            ])
            .unwrap();

        let bars = store
            .range(
                "BTC",
                Timeframe::M1,
                "2026-01-01T00:00:00Z".parse().unwrap(),
                "2026-01-01T00:02:00Z".parse().unwrap(),
                100,
            )
            .unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].ts, "2026-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn test_reinsert_is_ignored() {
        let store = BarStore::new(Database::open_in_memory().unwrap());
        let bar = flat_bar("2026-01-01T00:00:00Z");
        assert_eq!(store.insert_many(&[bar.clone()]).unwrap(), 1);
        assert_eq!(store.insert_many(&[bar]).unwrap(), 0);
    }
}
