//! Event bus: append-only outbox with offset-tracked consumers, typed
//! envelopes, filtered subscriptions, and non-blocking fan-out.
//!
//! One log instance per process. Producers hold a reference to the log;
//! subscribers receive entries over bounded channels. The append path never
//! blocks on subscriber progress: a full subscriber queue drops the entry
//! for that subscriber and records a `subscriber_lag` diagnostic.

pub mod durable;
pub mod envelope;
pub mod filter;
pub mod memory;
pub mod registry;

pub use durable::SqliteEventLog;
pub use envelope::{Envelope, EnvelopeKind, OutboxEntry};
pub use filter::EventFilter;
pub use memory::MemoryEventLog;
pub use registry::{FieldKind, FieldSpec, PayloadSchema, SchemaRegistry};

use crate::error::CoreResult;
use crate::models::OrderRecord;
use crate::store::OrderStore;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::warn;

/// Default per-subscriber queue depth.
pub const DEFAULT_SUBSCRIBER_QUEUE: usize = 1024;

/// Handle returned by `subscribe`. Dropping the receiver lazily removes the
/// subscription at the next dispatch.
pub struct Subscription {
    pub id: u64,
    pub receiver: mpsc::Receiver<OutboxEntry>,
}

/// Ordered, durable-or-ephemeral event log. Callers never branch on the
/// implementation.
pub trait EventLog: Send + Sync {
    /// Validate, assign the next `seq`, persist, then signal subscribers.
    /// Never blocks on subscriber progress.
    fn append(&self, envelope: Envelope) -> CoreResult<u64>;

    /// Append an order event together with the order snapshot. The durable
    /// log commits both in one transaction; the in-memory log applies them
    /// sequentially.
    fn append_with_order(
        &self,
        envelope: Envelope,
        order: &OrderRecord,
        orders: &OrderStore,
    ) -> CoreResult<u64> {
        let seq = self.append(envelope)?;
        orders.insert(order)?;
        Ok(seq)
    }

    /// Ordered entries with `seq > from_seq`, up to `limit`.
    fn read(
        &self,
        from_seq: u64,
        limit: usize,
        filter: Option<&EventFilter>,
    ) -> CoreResult<Vec<OutboxEntry>>;

    /// Deliver future appends matching the type set (`["*"]` = all) AND the
    /// optional filter.
    fn subscribe(&self, types: &[&str], filter: Option<EventFilter>) -> Subscription;

    /// Safe for unknown ids.
    fn unsubscribe(&self, id: u64);

    /// Monotonic advance; regressions are ignored.
    fn commit_offset(&self, consumer: &str, seq: u64) -> CoreResult<()>;

    /// Zero if unknown.
    fn load_offset(&self, consumer: &str) -> CoreResult<u64>;

    /// Highest assigned seq, zero when empty.
    fn last_seq(&self) -> u64;

    fn registry(&self) -> &SchemaRegistry;
}

struct SubscriberSlot {
    id: u64,
    types: Vec<String>,
    extra: Option<EventFilter>,
    sender: mpsc::Sender<OutboxEntry>,
    dropped: AtomicU64,
}

impl SubscriberSlot {
    fn wants(&self, envelope: &Envelope) -> bool {
        let type_ok = self
            .types
            .iter()
            .any(|pattern| filter::type_matches(pattern, &envelope.event_type));
        type_ok && self.extra.as_ref().map(|f| f.matches(envelope)).unwrap_or(true)
    }
}

/// Shared subscription registry + dispatch used by both log implementations.
pub(crate) struct SubscriberSet {
    slots: RwLock<Vec<SubscriberSlot>>,
    next_id: AtomicU64,
    queue_depth: usize,
}

impl SubscriberSet {
    pub(crate) fn new(queue_depth: usize) -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            queue_depth,
        }
    }

    pub(crate) fn subscribe(&self, types: &[&str], extra: Option<EventFilter>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.queue_depth);
        self.slots.write().push(SubscriberSlot {
            id,
            types: types.iter().map(|s| s.to_string()).collect(),
            extra,
            sender,
            dropped: AtomicU64::new(0),
        });
        Subscription { id, receiver }
    }

    pub(crate) fn unsubscribe(&self, id: u64) {
        self.slots.write().retain(|slot| slot.id != id);
    }

    /// Fan an entry out to all matching subscribers. `try_send` only: a full
    /// queue drops the entry for that subscriber and logs `subscriber_lag`;
    /// a closed receiver schedules the slot for removal.
    pub(crate) fn dispatch(&self, entry: &OutboxEntry) {
        let mut closed: Vec<u64> = Vec::new();
        {
            let slots = self.slots.read();
            for slot in slots.iter() {
                if !slot.wants(&entry.envelope) {
                    continue;
                }
                match slot.sender.try_send(entry.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        let total = slot.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        warn!(
                            subscription_id = slot.id,
                            event_id = %entry.envelope.id,
                            seq = entry.seq,
                            dropped_total = total,
                            "subscriber_lag: queue full, entry dropped"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(slot.id),
                }
            }
        }
        if !closed.is_empty() {
            self.slots.write().retain(|slot| !closed.contains(&slot.id));
        }
    }
}

/// Read-path passthrough for unregistered types: receivers choose, nothing
/// is dropped.
pub(crate) fn mark_unknown_type(registry: &SchemaRegistry, envelope: &mut Envelope) {
    if !registry.is_known(&envelope.event_type) {
        envelope
            .headers
            .insert("unknown_type".to_string(), "true".to_string());
    }
}
