//! Run persistence. Used for listing, detail, and crash recovery.

use crate::error::{CoreError, CoreResult};
use crate::models::{Run, RunMode, RunStatus};
use crate::store::{Database, Page};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use std::sync::Arc;
use uuid::Uuid;

pub struct RunStore {
    db: Arc<Database>,
}

impl RunStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn insert(&self, run: &Run) -> CoreResult<()> {
        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO runs (id, strategy_id, mode, status, symbols, timeframe, config,
                               created_at, started_at, stopped_at, backtest_start, backtest_end)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                run.id.to_string(),
                run.strategy_id,
                run.mode.as_str(),
                run.status.as_str(),
                serde_json::to_string(&run.symbols)?,
                run.timeframe.as_str(),
                serde_json::to_string(&run.config)?,
                run.created_at.to_rfc3339(),
                run.started_at.map(|ts| ts.to_rfc3339()),
                run.stopped_at.map(|ts| ts.to_rfc3339()),
                run.backtest_start.map(|ts| ts.to_rfc3339()),
                run.backtest_end.map(|ts| ts.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Persist a state transition together with its timestamps.
    pub fn update_status(
        &self,
        id: Uuid,
        status: RunStatus,
        started_at: Option<DateTime<Utc>>,
        stopped_at: Option<DateTime<Utc>>,
    ) -> CoreResult<()> {
        let conn = self.db.lock();
        let changed = conn.execute(
            "UPDATE runs SET status = ?2,
                             started_at = COALESCE(?3, started_at),
                             stopped_at = COALESCE(?4, stopped_at)
             WHERE id = ?1",
            params![
                id.to_string(),
                status.as_str(),
                started_at.map(|ts| ts.to_rfc3339()),
                stopped_at.map(|ts| ts.to_rfc3339()),
            ],
        )?;
        if changed == 0 {
            return Err(CoreError::not_found(format!("run {id}")));
        }
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> CoreResult<Option<Run>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, strategy_id, mode, status, symbols, timeframe, config,
                    created_at, started_at, stopped_at, backtest_start, backtest_end
             FROM runs WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id.to_string()], decode_run)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn list(&self, status: Option<RunStatus>, page: Page) -> CoreResult<(Vec<Run>, u64)> {
        let conn = self.db.lock();
        let (runs, total): (Vec<Run>, u64) = match status {
            Some(status) => {
                let total: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM runs WHERE status = ?1",
                    params![status.as_str()],
                    |row| row.get(0),
                )?;
                let mut stmt = conn.prepare_cached(
                    "SELECT id, strategy_id, mode, status, symbols, timeframe, config,
                            created_at, started_at, stopped_at, backtest_start, backtest_end
                     FROM runs WHERE status = ?1
                     ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
                )?;
                let rows = stmt.query_map(
                    params![status.as_str(), page.limit(), page.offset()],
                    decode_run,
                )?;
                (rows.collect::<Result<_, _>>()?, total as u64)
            }
            None => {
                let total: i64 =
                    conn.query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))?;
                let mut stmt = conn.prepare_cached(
                    "SELECT id, strategy_id, mode, status, symbols, timeframe, config,
                            created_at, started_at, stopped_at, backtest_start, backtest_end
                     FROM runs ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
                )?;
                let rows = stmt.query_map(params![page.limit(), page.offset()], decode_run)?;
                (rows.collect::<Result<_, _>>()?, total as u64)
            }
        };
        Ok((runs, total))
    }

    /// Compare-and-swap state transition. Returns false when the row is no
    /// longer in `from` (lost race or illegal transition), true on success.
    pub fn transition(
        &self,
        id: Uuid,
        from: RunStatus,
        to: RunStatus,
        started_at: Option<DateTime<Utc>>,
        stopped_at: Option<DateTime<Utc>>,
    ) -> CoreResult<bool> {
        let conn = self.db.lock();
        let changed = conn.execute(
            "UPDATE runs SET status = ?3,
                             started_at = COALESCE(?4, started_at),
                             stopped_at = COALESCE(?5, stopped_at)
             WHERE id = ?1 AND status = ?2",
            params![
                id.to_string(),
                from.as_str(),
                to.as_str(),
                started_at.map(|ts| ts.to_rfc3339()),
                stopped_at.map(|ts| ts.to_rfc3339()),
            ],
        )?;
        Ok(changed == 1)
    }

    /// Rows still marked `running`; consulted once at process start.
    pub fn running(&self) -> CoreResult<Vec<Run>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, strategy_id, mode, status, symbols, timeframe, config,
                    created_at, started_at, stopped_at, backtest_start, backtest_end
             FROM runs WHERE status = 'running'",
        )?;
        let rows = stmt.query_map([], decode_run)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }
}

fn decode_run(row: &Row<'_>) -> rusqlite::Result<Run> {
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
    let parse_opt_ts = |text: Option<String>| text.map(parse_ts).transpose();

    let symbols_text: String = row.get(4)?;
    let config_text: String = row.get(6)?;

    Ok(Run {
        id: Uuid::parse_str(&row.get::<_, String>(0)?).map_err(bad)?,
        strategy_id: row.get(1)?,
        mode: row.get::<_, String>(2)?.parse::<RunMode>().map_err(bad_text)?,
        status: row.get::<_, String>(3)?.parse::<RunStatus>().map_err(bad_text)?,
        symbols: serde_json::from_str(&symbols_text).map_err(bad)?,
        timeframe: row.get::<_, String>(5)?.parse().map_err(bad_text)?,
        config: serde_json::from_str(&config_text).map_err(bad)?,
        created_at: parse_ts(row.get(7)?)?,
        started_at: parse_opt_ts(row.get(8)?)?,
        stopped_at: parse_opt_ts(row.get(9)?)?,
        backtest_start: parse_opt_ts(row.get(10)?)?,
        backtest_end: parse_opt_ts(row.get(11)?)?,
    })
}
