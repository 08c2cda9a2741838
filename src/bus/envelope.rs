//! Canonical event envelope.
//!
//! Every event on the bus is one of these records: immutable once appended,
//! identified by `id`, ordered by the outbox `seq`, and causally linked via
//! `corr_id`/`causation_id` so a receiver can reconstruct the DAG.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Event,
    Command,
}

/// Canonical record of one event on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    pub kind: EnvelopeKind,
    /// Case-sensitive dotted name, namespace.PascalName (e.g. `run.Started`).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Schema version of the payload.
    pub version: u32,
    pub run_id: Option<Uuid>,
    /// Correlation group shared by a logical request and its descendants.
    pub corr_id: Uuid,
    /// Id of the event that directly caused this one.
    pub causation_id: Option<Uuid>,
    pub trace_id: Option<String>,
    pub ts: DateTime<Utc>,
    /// Opaque identifier of the emitting component.
    pub producer: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn event(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(EnvelopeKind::Event, event_type, payload)
    }

    pub fn command(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(EnvelopeKind::Command, event_type, payload)
    }

    fn new(kind: EnvelopeKind, event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            kind,
            event_type: event_type.into(),
            version: 1,
            run_id: None,
            // A fresh envelope starts its own correlation group.
            corr_id: id,
            causation_id: None,
            trace_id: None,
            ts: Utc::now(),
            producer: String::new(),
            headers: BTreeMap::new(),
            payload,
        }
    }

    pub fn with_producer(mut self, producer: impl Into<String>) -> Self {
        self.producer = producer.into();
        self
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Join the parent's correlation group and record direct causation.
    pub fn caused_by(mut self, parent: &Envelope) -> Self {
        self.corr_id = parent.corr_id;
        self.causation_id = Some(parent.id);
        if self.run_id.is_none() {
            self.run_id = parent.run_id;
        }
        self
    }

    /// Namespace part of the dotted type (`orders.Filled` -> `orders`).
    pub fn namespace(&self) -> &str {
        self.event_type.split('.').next().unwrap_or(&self.event_type)
    }
}

/// One row of the append-only outbox. `seq` orders globally; `id` identifies
/// uniquely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub seq: u64,
    pub envelope: Envelope,
    pub created_at: DateTime<Utc>,
}
