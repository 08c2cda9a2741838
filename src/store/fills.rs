//! Fill tape: append-only record of executions.

use crate::error::CoreResult;
use crate::models::FillRecord;
use crate::store::Database;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

pub struct FillStore {
    db: Arc<Database>,
}

impl FillStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn append(&self, fill: &FillRecord) -> CoreResult<()> {
        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO fills (id, order_id, run_id, ts, price, qty, commission, slippage, bar_index)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                fill.id.to_string(),
                fill.order_id.to_string(),
                fill.run_id.to_string(),
                fill.ts.to_rfc3339(),
                fill.price.to_string(),
                fill.qty.to_string(),
                fill.commission.to_string(),
                fill.slippage.to_string(),
                fill.bar_index as i64,
            ],
        )?;
        Ok(())
    }

    pub fn for_run(&self, run_id: Uuid) -> CoreResult<Vec<FillRecord>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, order_id, run_id, ts, price, qty, commission, slippage, bar_index
             FROM fills WHERE run_id = ?1 ORDER BY ts ASC, bar_index ASC",
        )?;
        let rows = stmt.query_map(params![run_id.to_string()], decode_fill)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }
}

fn decode_fill(row: &Row<'_>) -> rusqlite::Result<FillRecord> {
    fn bad(e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    }
    let parse_decimal = |text: String| text.parse::<Decimal>().map_err(bad);

    Ok(FillRecord {
        id: Uuid::parse_str(&row.get::<_, String>(0)?).map_err(bad)?,
        order_id: Uuid::parse_str(&row.get::<_, String>(1)?).map_err(bad)?,
        run_id: Uuid::parse_str(&row.get::<_, String>(2)?).map_err(bad)?,
        ts: DateTime::parse_from_rfc3339(&row.get::<_, String>(3)?)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(bad)?,
        price: parse_decimal(row.get(4)?)?,
        qty: parse_decimal(row.get(5)?)?,
        commission: parse_decimal(row.get(6)?)?,
        slippage: parse_decimal(row.get(7)?)?,
        bar_index: row.get::<_, i64>(8)? as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_append_and_read_back() {
        let store = FillStore::new(Database::open_in_memory().unwrap());
        let run_id = Uuid::new_v4();
        let fill = FillRecord {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            run_id,
            ts: Utc::now(),
            price: dec!(100.5),
            qty: dec!(2),
            commission: dec!(0.1),
            slippage: dec!(0.05),
            bar_index: 3,
        };
        store.append(&fill).unwrap();

        let fills = store.for_run(run_id).unwrap();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].price, dec!(100.5));
        assert_eq!(fills[0].bar_index, 3);
        assert!(store.for_run(Uuid::new_v4()).unwrap().is_empty());
    }
}
