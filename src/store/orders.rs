//! Order persistence.
//!
//! `(run_id, client_order_id)` is unique: the idempotency key. The insert
//! used on the live order path runs inside the durable outbox transaction
//! via `insert_in_tx`, so the order row and its `orders.Created` event
//! commit atomically.

use crate::error::{CoreError, CoreResult};
use crate::models::{OrderRecord, OrderStatus};
use crate::store::{Database, Page};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row, Transaction};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

pub struct OrderStore {
    db: Arc<Database>,
}

const INSERT_SQL: &str = "INSERT INTO orders
    (id, run_id, client_order_id, exchange_order_id, symbol, side, order_type,
     qty, limit_price, stop_price, time_in_force, filled_qty, filled_avg_price,
     status, created_at, updated_at)
 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)";

const SELECT_COLS: &str = "SELECT id, run_id, client_order_id, exchange_order_id, symbol, side,
     order_type, qty, limit_price, stop_price, time_in_force, filled_qty,
     filled_avg_price, status, created_at, updated_at FROM orders";

fn insert_params(order: &OrderRecord) -> [rusqlite::types::Value; 16] {
    use rusqlite::types::Value;
    [
        Value::Text(order.id.to_string()),
        Value::Text(order.run_id.to_string()),
        Value::Text(order.client_order_id.clone()),
        order.exchange_order_id.clone().map(Value::Text).unwrap_or(Value::Null),
        Value::Text(order.symbol.clone()),
        Value::Text(order.side.as_str().to_string()),
        Value::Text(order.order_type.as_str().to_string()),
        Value::Text(order.qty.to_string()),
        order.limit_price.map(|p| Value::Text(p.to_string())).unwrap_or(Value::Null),
        order.stop_price.map(|p| Value::Text(p.to_string())).unwrap_or(Value::Null),
        Value::Text(order.time_in_force.as_str().to_string()),
        Value::Text(order.filled_qty.to_string()),
        order.filled_avg_price.map(|p| Value::Text(p.to_string())).unwrap_or(Value::Null),
        Value::Text(order.status.as_str().to_string()),
        Value::Text(order.created_at.to_rfc3339()),
        Value::Text(order.updated_at.to_rfc3339()),
    ]
}

impl OrderStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn insert(&self, order: &OrderRecord) -> CoreResult<()> {
        let conn = self.db.lock();
        conn.execute(INSERT_SQL, rusqlite::params_from_iter(insert_params(order)))
            .map_err(map_unique_violation)?;
        Ok(())
    }

    /// Insert inside a caller-owned transaction (the durable outbox append).
    pub fn insert_in_tx(tx: &Transaction<'_>, order: &OrderRecord) -> rusqlite::Result<()> {
        tx.execute(INSERT_SQL, rusqlite::params_from_iter(insert_params(order)))?;
        Ok(())
    }

    /// Persist fill/status mutations of an existing order.
    pub fn update(&self, order: &OrderRecord) -> CoreResult<()> {
        let conn = self.db.lock();
        let changed = conn.execute(
            "UPDATE orders SET exchange_order_id = ?2, filled_qty = ?3,
                               filled_avg_price = ?4, status = ?5, updated_at = ?6
             WHERE id = ?1",
            params![
                order.id.to_string(),
                order.exchange_order_id,
                order.filled_qty.to_string(),
                order.filled_avg_price.map(|p| p.to_string()),
                order.status.as_str(),
                order.updated_at.to_rfc3339(),
            ],
        )?;
        if changed == 0 {
            return Err(CoreError::not_found(format!("order {}", order.id)));
        }
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> CoreResult<Option<OrderRecord>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare_cached(&format!("{SELECT_COLS} WHERE id = ?1"))?;
        let mut rows = stmt.query_map(params![id.to_string()], decode_order)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Lookup by idempotency key.
    pub fn get_by_client_id(&self, run_id: Uuid, client_order_id: &str) -> CoreResult<Option<OrderRecord>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "{SELECT_COLS} WHERE run_id = ?1 AND client_order_id = ?2"
        ))?;
        let mut rows = stmt.query_map(params![run_id.to_string(), client_order_id], decode_order)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn list(
        &self,
        run_id: Option<Uuid>,
        status: Option<OrderStatus>,
        page: Page,
    ) -> CoreResult<(Vec<OrderRecord>, u64)> {
        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<String> = Vec::new();
        if let Some(run_id) = run_id {
            args.push(run_id.to_string());
            clauses.push(format!("run_id = ?{}", args.len()));
        }
        if let Some(status) = status {
            args.push(status.as_str().to_string());
            clauses.push(format!("status = ?{}", args.len()));
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let conn = self.db.lock();
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM orders{where_sql}"),
            rusqlite::params_from_iter(args.iter()),
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLS}{where_sql} ORDER BY created_at DESC LIMIT {} OFFSET {}",
            page.limit(),
            page.offset()
        ))?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), decode_order)?;
        Ok((rows.collect::<Result<_, _>>()?, total as u64))
    }
}

/// A duplicate `(run_id, client_order_id)` is a conflict, not a storage
/// failure: callers resolve it by returning the existing order.
fn map_unique_violation(e: rusqlite::Error) -> CoreError {
    if let rusqlite::Error::SqliteFailure(inner, _) = &e {
        if inner.code == rusqlite::ErrorCode::ConstraintViolation {
            return CoreError::conflict("duplicate client_order_id for run");
        }
    }
    e.into()
}

fn decode_order(row: &Row<'_>) -> rusqlite::Result<OrderRecord> {
    fn bad(e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    }
    fn bad_text(message: String) -> rusqlite::Error {
        bad(std::io::Error::new(std::io::ErrorKind::InvalidData, message))
    }

    let parse_ts = |text: String| {
        DateTime::parse_from_rfc3339(&text)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(bad)
    };
    let parse_decimal = |text: String| text.parse::<Decimal>().map_err(bad);
    let parse_opt_decimal =
        |text: Option<String>| text.map(|t| t.parse::<Decimal>().map_err(bad)).transpose();

    Ok(OrderRecord {
        id: Uuid::parse_str(&row.get::<_, String>(0)?).map_err(bad)?,
        run_id: Uuid::parse_str(&row.get::<_, String>(1)?).map_err(bad)?,
        client_order_id: row.get(2)?,
        exchange_order_id: row.get(3)?,
        symbol: row.get(4)?,
        side: row.get::<_, String>(5)?.parse().map_err(bad_text)?,
        order_type: row.get::<_, String>(6)?.parse().map_err(bad_text)?,
        qty: parse_decimal(row.get(7)?)?,
        limit_price: parse_opt_decimal(row.get(8)?)?,
        stop_price: parse_opt_decimal(row.get(9)?)?,
        time_in_force: row.get::<_, String>(10)?.parse().map_err(bad_text)?,
        filled_qty: parse_decimal(row.get(11)?)?,
        filled_avg_price: parse_opt_decimal(row.get(12)?)?,
        status: row.get::<_, String>(13)?.parse().map_err(bad_text)?,
        created_at: parse_ts(row.get(14)?)?,
        updated_at: parse_ts(row.get(15)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderIntent, OrderSide, OrderType, TimeInForce};
    use rust_decimal_macros::dec;

    fn store() -> OrderStore {
        OrderStore::new(Database::open_in_memory().unwrap())
    }

    fn order(run_id: Uuid, key: &str) -> OrderRecord {
        let intent = OrderIntent {
            run_id,
            client_order_id: Some(key.to_string()),
            symbol: "BTC".to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            qty: dec!(10),
            limit_price: Some(dec!(50.25)),
            stop_price: None,
            time_in_force: TimeInForce::Gtc,
            extended_hours: false,
        };
        OrderRecord::from_intent(&intent, key.to_string(), Utc::now())
    }

    #[test]
    fn test_insert_get_preserves_decimals() {
        let store = store();
        let run_id = Uuid::new_v4();
        let record = order(run_id, "k-1");
        store.insert(&record).unwrap();

        let loaded = store.get(record.id).unwrap().unwrap();
        assert_eq!(loaded.qty, dec!(10));
        assert_eq!(loaded.limit_price, Some(dec!(50.25)));
        assert_eq!(loaded.status, OrderStatus::Pending);
    }

    #[test]
    fn test_duplicate_client_id_is_conflict() {
        let store = store();
        let run_id = Uuid::new_v4();
        store.insert(&order(run_id, "k-1")).unwrap();
        let err = store.insert(&order(run_id, "k-1")).unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));

        // Same key on a different run is fine.
        store.insert(&order(Uuid::new_v4(), "k-1")).unwrap();
    }

    #[test]
    fn test_update_persists_fill_state() {
        let store = store();
        let mut record = order(Uuid::new_v4(), "k-1");
        store.insert(&record).unwrap();

        record.apply_fill(dec!(10), dec!(50), Utc::now()).unwrap();
        store.update(&record).unwrap();

        let loaded = store.get(record.id).unwrap().unwrap();
        assert_eq!(loaded.status, OrderStatus::Filled);
        assert_eq!(loaded.filled_qty, dec!(10));
        assert_eq!(loaded.filled_avg_price, Some(dec!(50)));
    }

    #[test]
    fn test_list_by_run_and_status() {
        let store = store();
        let run_a = Uuid::new_v4();
        let run_b = Uuid::new_v4();
        store.insert(&order(run_a, "a-1")).unwrap();
        store.insert(&order(run_a, "a-2")).unwrap();
        store.insert(&order(run_b, "b-1")).unwrap();

        let (orders, total) = store.list(Some(run_a), None, Page::new(None, None)).unwrap();
        assert_eq!(total, 2);
        assert_eq!(orders.len(), 2);

        let (filled, total) = store
            .list(Some(run_a), Some(OrderStatus::Filled), Page::new(None, None))
            .unwrap();
        assert_eq!(total, 0);
        assert!(filled.is_empty());
    }
}
