//! In-memory event log: bounded ring, in-memory offsets, no cross-restart
//! replay. Used for tests and for deployments that do not need a durable
//! outbox.

use crate::bus::envelope::{Envelope, OutboxEntry};
use crate::bus::filter::EventFilter;
use crate::bus::registry::SchemaRegistry;
use crate::bus::{mark_unknown_type, EventLog, SubscriberSet, Subscription, DEFAULT_SUBSCRIBER_QUEUE};
use crate::error::CoreResult;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const DEFAULT_RING_CAPACITY: usize = 100_000;

struct Ring {
    entries: VecDeque<OutboxEntry>,
    next_seq: u64,
}

pub struct MemoryEventLog {
    ring: Mutex<Ring>,
    capacity: usize,
    offsets: Mutex<HashMap<String, u64>>,
    subscribers: SubscriberSet,
    registry: Arc<SchemaRegistry>,
    last_seq: AtomicU64,
}

impl MemoryEventLog {
    pub fn new(registry: Arc<SchemaRegistry>, capacity: usize) -> Self {
        Self {
            ring: Mutex::new(Ring {
                entries: VecDeque::with_capacity(capacity.min(4096)),
                next_seq: 1,
            }),
            capacity,
            offsets: Mutex::new(HashMap::new()),
            subscribers: SubscriberSet::new(DEFAULT_SUBSCRIBER_QUEUE),
            registry,
            last_seq: AtomicU64::new(0),
        }
    }

    /// Built-in catalogue, default capacity. The usual test constructor.
    pub fn with_defaults() -> Self {
        Self::new(Arc::new(SchemaRegistry::builtin()), DEFAULT_RING_CAPACITY)
    }
}

impl EventLog for MemoryEventLog {
    fn append(&self, mut envelope: Envelope) -> CoreResult<u64> {
        if let Some(version) = self.registry.validate(&envelope.event_type, &envelope.payload)? {
            envelope.version = version;
        }

        // Assign + push + dispatch under one lock so subscribers observe
        // strict seq order. try_send keeps the critical section bounded.
        let mut ring = self.ring.lock();
        let seq = ring.next_seq;
        ring.next_seq += 1;
        let entry = OutboxEntry {
            seq,
            envelope,
            created_at: Utc::now(),
        };
        ring.entries.push_back(entry.clone());
        while ring.entries.len() > self.capacity {
            ring.entries.pop_front();
        }
        self.last_seq.store(seq, Ordering::Release);
        self.subscribers.dispatch(&entry);
        Ok(seq)
    }

    fn read(
        &self,
        from_seq: u64,
        limit: usize,
        filter: Option<&EventFilter>,
    ) -> CoreResult<Vec<OutboxEntry>> {
        let ring = self.ring.lock();
        let mut out = Vec::new();
        for entry in ring.entries.iter() {
            if entry.seq <= from_seq {
                continue;
            }
            if let Some(f) = filter {
                if !f.matches(&entry.envelope) {
                    continue;
                }
            }
            let mut entry = entry.clone();
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
        let mut offsets = self.offsets.lock();
        let slot = offsets.entry(consumer.to_string()).or_insert(0);
        if seq > *slot {
            *slot = seq;
        }
        Ok(())
    }

    fn load_offset(&self, consumer: &str) -> CoreResult<u64> {
        Ok(self.offsets.lock().get(consumer).copied().unwrap_or(0))
    }

    fn last_seq(&self) -> u64 {
        self.last_seq.load(Ordering::Acquire)
    }

    fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }
}
