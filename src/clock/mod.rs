//! Run clocks: wall-aligned real-time ticks and fast-forward backtest ticks.
//!
//! Both clocks append `clock.Tick` envelopes to the event log and then run
//! registered callbacks under a bounded-timeout supervisor. A timed-out
//! callback is cancelled and logged; the clock and the remaining callbacks
//! proceed.

pub mod backtest;
pub mod realtime;
pub mod timeframe;

pub use backtest::BacktestClock;
pub use realtime::RealtimeClock;
pub use timeframe::Timeframe;

use crate::bus::Envelope;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::json;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// Default supervisor timeout for tick callbacks.
pub const DEFAULT_TICK_TIMEOUT: Duration = Duration::from_secs(30);

/// A boundary-aligned time pulse. `is_backtest` is an emission hint;
/// strategies must not branch on it.
#[derive(Debug, Clone)]
pub struct Tick {
    pub id: Uuid,
    pub run_id: Uuid,
    pub ts: DateTime<Utc>,
    pub bar_index: u64,
    pub timeframe: Timeframe,
    pub is_backtest: bool,
}

impl Tick {
    /// The envelope appended for this tick. The envelope id doubles as the
    /// tick id so downstream emits can set `causation_id` to it.
    pub fn envelope(&self) -> Envelope {
        let mut envelope = Envelope::event(
            "clock.Tick",
            json!({
                "ts": self.ts.to_rfc3339(),
                "bar_index": self.bar_index,
                "timeframe": self.timeframe.as_str(),
                "is_backtest": self.is_backtest,
            }),
        )
        .with_run_id(self.run_id)
        .with_producer("marvin.clock");
        envelope.id = self.id;
        envelope.corr_id = self.id;
        envelope.ts = self.ts;
        envelope
    }
}

pub type TickFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type TickCallback = Arc<dyn Fn(Tick) -> TickFuture + Send + Sync>;

/// Registered tick callbacks, keyed for unsubscribe.
#[derive(Default)]
pub(crate) struct HandlerRegistry {
    handlers: Mutex<Vec<(u64, TickCallback)>>,
    next_id: AtomicU64,
}

impl HandlerRegistry {
    pub(crate) fn add(&self, callback: TickCallback) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.handlers.lock().push((id, callback));
        id
    }

    pub(crate) fn remove(&self, id: u64) {
        self.handlers.lock().retain(|(handler_id, _)| *handler_id != id);
    }

    pub(crate) fn snapshot(&self) -> Vec<(u64, TickCallback)> {
        self.handlers.lock().clone()
    }
}

/// Run every callback for one tick under the supervisor timeout. The await
/// here is the backtest backpressure point: the caller does not advance
/// until this returns.
pub(crate) async fn run_handlers(
    handlers: &[(u64, TickCallback)],
    tick: &Tick,
    timeout: Duration,
) {
    let futures: Vec<_> = handlers
        .iter()
        .map(|(handler_id, callback)| {
            let id = *handler_id;
            let fut = callback(tick.clone());
            async move {
                if tokio::time::timeout(timeout, fut).await.is_err() {
                    warn!(
                        handler_id = id,
                        tick_ts = %tick.ts,
                        bar_index = tick.bar_index,
                        "tick callback timed out, cancelled"
                    );
                }
            }
        })
        .collect();
    futures_util::future::join_all(futures).await;
}
