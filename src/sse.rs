//! SSE broadcaster.
//!
//! Subscribes to the whole event log and fans envelopes out to HTTP
//! clients, each behind a bounded queue and an optional `run_id` filter. A
//! client whose queue is full is disconnected with a `slow_consumer`
//! reason; the broadcaster never blocks, and the public stream offers no
//! replay across reconnects.

use crate::bus::{EventLog, OutboxEntry};
use axum::response::sse::Event;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};
use uuid::Uuid;

pub type SseMessage = Result<Event, Infallible>;

struct ClientSlot {
    run_id: Option<Uuid>,
    sender: mpsc::Sender<SseMessage>,
}

pub struct SseBroadcaster {
    log: Arc<dyn EventLog>,
    clients: Mutex<HashMap<u64, ClientSlot>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl SseBroadcaster {
    pub fn new(log: Arc<dyn EventLog>, buffer: usize) -> Arc<Self> {
        Arc::new(Self {
            log,
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer,
        })
    }

    /// Attach a client. The returned stream ends when the client is
    /// disconnected (slow consumer) or the broadcaster shuts down.
    pub fn register(&self, run_id: Option<Uuid>) -> ReceiverStream<SseMessage> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.buffer);
        self.clients.lock().insert(id, ClientSlot { run_id, sender });
        debug!(client_id = id, run_filter = ?run_id, "sse client attached");
        ReceiverStream::new(receiver)
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Serialize and fan out one outbox entry.
    pub fn handle_entry(&self, entry: &OutboxEntry) {
        let data = match serde_json::to_string(&entry.envelope) {
            Ok(data) => data,
            Err(e) => {
                warn!(event_id = %entry.envelope.id, error = %e, "envelope encode failed");
                return;
            }
        };

        let mut dropped: Vec<u64> = Vec::new();
        {
            let clients = self.clients.lock();
            for (client_id, slot) in clients.iter() {
                if let Some(filter) = slot.run_id {
                    if entry.envelope.run_id != Some(filter) {
                        continue;
                    }
                }
                let event = Event::default().event(entry.envelope.event_type.clone()).data(&data);
                match slot.sender.try_send(Ok(event)) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(client_id = *client_id, seq = entry.seq, "disconnecting sse client: slow_consumer");
                        dropped.push(*client_id);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => dropped.push(*client_id),
                }
            }
        }
        if !dropped.is_empty() {
            let mut clients = self.clients.lock();
            for client_id in dropped {
                clients.remove(&client_id);
            }
        }
    }

    /// Pump the log subscription until the process exits.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let mut subscription = self.log.subscribe(&["*"], None);
        tokio::spawn(async move {
            while let Some(entry) = subscription.receiver.recv().await {
                self.handle_entry(&entry);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Envelope, MemoryEventLog};
    use chrono::Utc;
    use serde_json::json;

    fn entry(seq: u64, run_id: Option<Uuid>) -> OutboxEntry {
        let mut envelope = Envelope::event("run.Stopped", json!({})).with_producer("marvin.manager");
        envelope.run_id = run_id;
        OutboxEntry { seq, envelope, created_at: Utc::now() }
    }

    fn broadcaster(buffer: usize) -> Arc<SseBroadcaster> {
        SseBroadcaster::new(Arc::new(MemoryEventLog::with_defaults()), buffer)
    }

    #[tokio::test]
    async fn test_run_filtered_delivery() {
        let sse = broadcaster(16);
        let run = Uuid::new_v4();
        let mut filtered = sse.register(Some(run)).into_inner();
        let mut firehose = sse.register(None).into_inner();

        sse.handle_entry(&entry(1, Some(Uuid::new_v4())));
        sse.handle_entry(&entry(2, Some(run)));

        let got = filtered.recv().await.unwrap();
        assert!(got.is_ok());
        assert!(filtered.try_recv().is_err());

        // The unfiltered client saw both.
        firehose.recv().await.unwrap().unwrap();
        firehose.recv().await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_slow_client_disconnected_not_blocking() {
        let sse = broadcaster(4);
        let _stalled = sse.register(None);
        let mut healthy = sse.register(None).into_inner();
        assert_eq!(sse.client_count(), 2);

        let mut received = 0;
        for seq in 0..10 {
            sse.handle_entry(&entry(seq, None));
            // The healthy client keeps reading; the stalled one never does.
            while healthy.try_recv().is_ok() {
                received += 1;
            }
        }

        // Stalled client dropped at overflow, healthy one still attached.
        assert_eq!(sse.client_count(), 1);
        assert_eq!(received, 10);
    }
}
