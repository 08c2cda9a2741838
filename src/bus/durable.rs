//! Durable event log on SQLite.
//!
//! `append` writes the outbox row atomically with any caller-provided
//! transactional work, then signals subscribers post-commit. Offsets are
//! persisted, so consumers resume across restarts.

use crate::bus::envelope::{Envelope, OutboxEntry};
use crate::bus::filter::EventFilter;
use crate::bus::registry::SchemaRegistry;
use crate::bus::{mark_unknown_type, EventLog, SubscriberSet, Subscription, DEFAULT_SUBSCRIBER_QUEUE};
use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, Transaction};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;
PRAGMA busy_timeout = 5000;

CREATE TABLE IF NOT EXISTS outbox (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    type TEXT NOT NULL,
    version INTEGER NOT NULL,
    run_id TEXT,
    corr_id TEXT NOT NULL,
    causation_id TEXT,
    trace_id TEXT,
    ts TEXT NOT NULL,
    producer TEXT NOT NULL,
    headers TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_outbox_type ON outbox(type, seq);
CREATE INDEX IF NOT EXISTS idx_outbox_run ON outbox(run_id, seq);

CREATE TABLE IF NOT EXISTS consumer_offsets (
    consumer_name TEXT PRIMARY KEY,
    last_processed_seq INTEGER NOT NULL,
    updated_at TEXT NOT NULL
) WITHOUT ROWID;
"#;

pub struct SqliteEventLog {
    conn: Mutex<Connection>,
    subscribers: SubscriberSet,
    registry: Arc<SchemaRegistry>,
}

impl SqliteEventLog {
    pub fn open(path: impl AsRef<Path>, registry: Arc<SchemaRegistry>) -> CoreResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch(SCHEMA_SQL)?;
        info!(path = %path.as_ref().display(), "durable outbox opened");
        Ok(Self {
            conn: Mutex::new(conn),
            subscribers: SubscriberSet::new(DEFAULT_SUBSCRIBER_QUEUE),
            registry,
        })
    }

    /// Append atomically with caller-provided work in the same transaction.
    /// Either the outbox row and the caller's writes all commit, or none do.
    /// Subscribers are signalled only after commit.
    pub fn append_with<F>(&self, mut envelope: Envelope, work: F) -> CoreResult<u64>
    where
        F: FnOnce(&Transaction) -> rusqlite::Result<()>,
    {
        if let Some(version) = self.registry.validate(&envelope.event_type, &envelope.payload)? {
            envelope.version = version;
        }

        let created_at = Utc::now();
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(CoreError::from)?;
        tx.execute(
            "INSERT INTO outbox (id, kind, type, version, run_id, corr_id, causation_id,
                                 trace_id, ts, producer, headers, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                envelope.id.to_string(),
                match envelope.kind {
                    crate::bus::EnvelopeKind::Event => "event",
                    crate::bus::EnvelopeKind::Command => "command",
                },
                envelope.event_type,
                envelope.version,
                envelope.run_id.map(|id| id.to_string()),
                envelope.corr_id.to_string(),
                envelope.causation_id.map(|id| id.to_string()),
                envelope.trace_id,
                envelope.ts.to_rfc3339(),
                envelope.producer,
                serde_json::to_string(&envelope.headers)?,
                serde_json::to_string(&envelope.payload)?,
                created_at.to_rfc3339(),
            ],
        )?;
        let seq = tx.last_insert_rowid() as u64;
        work(&tx)?;
        tx.commit().map_err(CoreError::from)?;

        // Still under the connection lock: dispatch order == seq order.
        self.subscribers.dispatch(&OutboxEntry {
            seq,
            envelope,
            created_at,
        });
        Ok(seq)
    }

    fn decode_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutboxEntry> {
        let parse_uuid = |text: String| {
            uuid::Uuid::parse_str(&text).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
            })
        };
        let parse_ts = |text: String| {
            DateTime::parse_from_rfc3339(&text)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
                })
        };

        let kind_text: String = row.get(1)?;
        let run_id: Option<String> = row.get(4)?;
        let causation_id: Option<String> = row.get(6)?;
        let headers_text: String = row.get(10)?;
        let payload_text: String = row.get(11)?;

        Ok(OutboxEntry {
            seq: row.get::<_, i64>(0)? as u64,
            envelope: Envelope {
                id: parse_uuid(row.get(2)?)?,
                kind: if kind_text == "command" {
                    crate::bus::EnvelopeKind::Command
                } else {
                    crate::bus::EnvelopeKind::Event
                },
                event_type: row.get(3)?,
                version: row.get::<_, i64>(12)? as u32,
                run_id: run_id.map(parse_uuid).transpose()?,
                corr_id: parse_uuid(row.get(5)?)?,
                causation_id: causation_id.map(parse_uuid).transpose()?,
                trace_id: row.get(7)?,
                ts: parse_ts(row.get(8)?)?,
                producer: row.get(9)?,
                headers: serde_json::from_str(&headers_text).unwrap_or_default(),
                payload: serde_json::from_str(&payload_text).unwrap_or(serde_json::Value::Null),
            },
            created_at: parse_ts(row.get(13)?)?,
        })
    }
}

impl EventLog for SqliteEventLog {
    fn append(&self, envelope: Envelope) -> CoreResult<u64> {
        self.append_with(envelope, |_| Ok(()))
    }

    fn append_with_order(
        &self,
        envelope: Envelope,
        order: &crate::models::OrderRecord,
        _orders: &crate::store::OrderStore,
    ) -> CoreResult<u64> {
        // Same database file as the stores: the outbox row and the order
        // snapshot commit or roll back together.
        self.append_with(envelope, |tx| crate::store::OrderStore::insert_in_tx(tx, order))
    }

    fn read(
        &self,
        from_seq: u64,
        limit: usize,
        filter: Option<&EventFilter>,
    ) -> CoreResult<Vec<OutboxEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT seq, kind, id, type, run_id, corr_id, causation_id, trace_id, ts,
                    producer, headers, payload, version, created_at
             FROM outbox WHERE seq > ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![from_seq as i64], Self::decode_row)?;

        let mut out = Vec::new();
        for row in rows {
            let mut entry = row?;
            if let Some(f) = filter {
                if !f.matches(&entry.envelope) {
                    continue;
                }
            }
            mark_unknown_type(&self.registry, &mut entry.envelope);
            out.push(entry);
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    fn subscribe(&self, types: &[&str], filter: Option<EventFilter>) -> Subscription {
        self.subscribers.subscribe(types, filter)
    }

    fn unsubscribe(&self, id: u64) {
        self.subscribers.unsubscribe(id);
    }

    fn commit_offset(&self, consumer: &str, seq: u64) -> CoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO consumer_offsets (consumer_name, last_processed_seq, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(consumer_name) DO UPDATE SET
                 last_processed_seq = MAX(last_processed_seq, excluded.last_processed_seq),
                 updated_at = excluded.updated_at",
            params![consumer, seq as i64, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn load_offset(&self, consumer: &str) -> CoreResult<u64> {
        let conn = self.conn.lock();
        let seq: Option<i64> = conn
            .query_row(
                "SELECT last_processed_seq FROM consumer_offsets WHERE consumer_name = ?1",
                params![consumer],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(seq.unwrap_or(0) as u64)
    }

    fn last_seq(&self) -> u64 {
        let conn = self.conn.lock();
        conn.query_row("SELECT COALESCE(MAX(seq), 0) FROM outbox", [], |row| {
            row.get::<_, i64>(0)
        })
        .unwrap_or(0) as u64
    }

    fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }
}
