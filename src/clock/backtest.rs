//! Fast-forward backtest clock.
//!
//! Emits one tick per bar boundary between `start` (inclusive) and `end`
//! (exclusive) and waits for every tick callback to return before advancing
//! simulated time. That await is the only intentional backpressure loop in
//! the system: a backtest proceeds exactly as fast as its slowest tick-path
//! subscriber.

use crate::bus::EventLog;
use crate::clock::timeframe::Timeframe;
use crate::clock::{run_handlers, HandlerRegistry, Tick, TickCallback, DEFAULT_TICK_TIMEOUT};
use crate::error::CoreResult;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

pub struct BacktestClock {
    log: Arc<dyn EventLog>,
    timeframe: Timeframe,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    tick_timeout: Duration,
    handlers: HandlerRegistry,
    stopped: AtomicBool,
    simulated: Mutex<DateTime<Utc>>,
}

impl BacktestClock {
    pub fn new(
        log: Arc<dyn EventLog>,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Arc<Self> {
        Self::with_tick_timeout(log, timeframe, start, end, DEFAULT_TICK_TIMEOUT)
    }

    pub fn with_tick_timeout(
        log: Arc<dyn EventLog>,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        tick_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            log,
            timeframe,
            start,
            end,
            tick_timeout,
            handlers: HandlerRegistry::default(),
            stopped: AtomicBool::new(false),
            simulated: Mutex::new(start),
        })
    }

    /// Simulated time: the boundary of the last emitted tick.
    pub fn current_time(&self) -> DateTime<Utc> {
        *self.simulated.lock()
    }

    pub fn on_tick(&self, callback: TickCallback) -> u64 {
        self.handlers.add(callback)
    }

    pub fn remove_handler(&self, id: u64) {
        self.handlers.remove(id);
    }

    /// Idempotent. The loop observes the flag between ticks; an in-flight
    /// tick's callbacks are allowed to finish.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Drive the whole range. Returns the number of ticks emitted. The
    /// caller decides what exhaustion means (normally run completion).
    pub async fn run(&self, run_id: Uuid) -> CoreResult<u64> {
        let mut simulated = self.start;
        let mut bar_index: u64 = 0;

        info!(
            run_id = %run_id,
            start = %self.start,
            end = %self.end,
            timeframe = %self.timeframe,
            "backtest clock starting"
        );

        while simulated < self.end && !self.is_stopped() {
            let tick = Tick {
                id: Uuid::new_v4(),
                run_id,
                ts: simulated,
                bar_index,
                timeframe: self.timeframe,
                is_backtest: true,
            };
            self.log.append(tick.envelope())?;
            *self.simulated.lock() = simulated;

            // Backpressure: do not advance until this tick's callbacks are done.
            run_handlers(&self.handlers.snapshot(), &tick, self.tick_timeout).await;

            bar_index += 1;
            simulated += self.timeframe.duration();
        }

        debug!(run_id = %run_id, ticks = bar_index, "backtest clock exhausted");
        Ok(bar_index)
    }
}
