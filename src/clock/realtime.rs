//! Wall-aligned real-time clock.
//!
//! Each iteration computes the next bar boundary, does a coarse sleep to
//! ~100ms before it, then a short precise wait, and emits the tick stamped
//! with the boundary time rather than the observed wall time, keeping
//! downstream logic drift-free. If the loop wakes more than one interval
//! late it warns and skips ahead; it never emits in the past.

use crate::bus::EventLog;
use crate::clock::timeframe::Timeframe;
use crate::clock::{run_handlers, HandlerRegistry, Tick, TickCallback, DEFAULT_TICK_TIMEOUT};
use crate::error::CoreResult;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};
use uuid::Uuid;

/// Coarse sleep undershoots the boundary by this much; the precise wait
/// covers the remainder.
const BOUNDARY_BUFFER: Duration = Duration::from_millis(100);
const FINE_POLL: Duration = Duration::from_millis(5);

pub struct RealtimeClock {
    log: Arc<dyn EventLog>,
    timeframe: Timeframe,
    tick_timeout: Duration,
    handlers: HandlerRegistry,
    stopped: AtomicBool,
    waker: Notify,
}

impl RealtimeClock {
    pub fn new(log: Arc<dyn EventLog>, timeframe: Timeframe) -> Arc<Self> {
        Self::with_tick_timeout(log, timeframe, DEFAULT_TICK_TIMEOUT)
    }

    pub fn with_tick_timeout(
        log: Arc<dyn EventLog>,
        timeframe: Timeframe,
        tick_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            log,
            timeframe,
            tick_timeout,
            handlers: HandlerRegistry::default(),
            stopped: AtomicBool::new(false),
            waker: Notify::new(),
        })
    }

    pub fn current_time(&self) -> DateTime<Utc> {
        Utc::now()
    }

    pub fn on_tick(&self, callback: TickCallback) -> u64 {
        self.handlers.add(callback)
    }

    pub fn remove_handler(&self, id: u64) {
        self.handlers.remove(id);
    }

    /// Idempotent. Wakes the sleeper; an in-flight callback completes but
    /// no new one is started.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.waker.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Tick loop; runs until `stop()`. Spawn as a task.
    pub async fn run(&self, run_id: Uuid) -> CoreResult<()> {
        info!(run_id = %run_id, timeframe = %self.timeframe, "realtime clock starting");
        let mut bar_index: u64 = 0;

        while !self.is_stopped() {
            let now = Utc::now();
            let boundary = self.timeframe.next_boundary(now);

            // Coarse sleep until shortly before the boundary.
            let until = (boundary - now)
                .to_std()
                .unwrap_or(Duration::ZERO)
                .saturating_sub(BOUNDARY_BUFFER);
            if !until.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(until) => {}
                    _ = self.waker.notified() => {}
                }
            }
            if self.is_stopped() {
                break;
            }

            // Precise wait over the last stretch.
            while Utc::now() < boundary {
                if self.is_stopped() {
                    return Ok(());
                }
                tokio::time::sleep(FINE_POLL).await;
            }

            let woke = Utc::now();
            if woke - boundary > self.timeframe.duration() {
                warn!(
                    run_id = %run_id,
                    boundary = %boundary,
                    drift_ms = (woke - boundary).num_milliseconds(),
                    "tick drift exceeded one interval, skipping ahead"
                );
                continue;
            }

            let tick = Tick {
                id: Uuid::new_v4(),
                run_id,
                ts: boundary,
                bar_index,
                timeframe: self.timeframe,
                is_backtest: false,
            };
            self.log.append(tick.envelope())?;
            bar_index += 1;

            run_handlers(&self.handlers.snapshot(), &tick, self.tick_timeout).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryEventLog;

    #[tokio::test]
    async fn test_stop_exits_promptly() {
        let log: Arc<dyn EventLog> = Arc::new(MemoryEventLog::with_defaults());
        let clock = RealtimeClock::new(log.clone(), Timeframe::H4);

        let runner = clock.clone();
        let run_id = Uuid::new_v4();
        let handle = tokio::spawn(async move { runner.run(run_id).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        clock.stop();
        clock.stop(); // idempotent

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("clock loop must observe stop quickly")
            .unwrap()
            .unwrap();
        // Nothing emitted: the next 4h boundary is far away.
        assert!(log.read(0, 10, None).unwrap().is_empty());
    }

    #[test]
    fn test_boundary_never_in_past() {
        let now = Utc::now();
        for tf in [Timeframe::M1, Timeframe::M15, Timeframe::H1, Timeframe::D1] {
            let boundary = tf.next_boundary(now);
            assert!(boundary > now);
            assert!(tf.is_boundary(boundary));
        }
    }
}
