//! Per-run strategy runner.
//!
//! Owns one strategy instance and translates its actions into `strategy.*`
//! envelopes. Tick and window deliveries arrive from the run's event
//! pipeline; all emitted envelopes are causation-linked to the tick or data
//! event that produced them.

use crate::bus::{Envelope, EventLog};
use crate::clock::Tick;
use crate::error::CoreResult;
use crate::strategy::{Action, FetchWindowPayload, PlaceRequestPayload, Strategy, WindowReady};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

pub const PRODUCER: &str = "marvin.runner";

pub struct StrategyRunner {
    run_id: Uuid,
    symbols: Vec<String>,
    log: Arc<dyn EventLog>,
    strategy: Mutex<Box<dyn Strategy>>,
    cleaned: AtomicBool,
}

impl StrategyRunner {
    pub fn new(
        run_id: Uuid,
        symbols: Vec<String>,
        strategy: Box<dyn Strategy>,
        log: Arc<dyn EventLog>,
    ) -> Arc<Self> {
        Arc::new(Self {
            run_id,
            symbols,
            log,
            strategy: Mutex::new(strategy),
            cleaned: AtomicBool::new(false),
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn initialize(&self) {
        self.strategy.lock().initialize(&self.symbols);
    }

    /// Invoke the strategy for one tick and emit the resulting intents.
    pub fn handle_tick(&self, tick: &Tick) {
        if self.cleaned.load(Ordering::SeqCst) {
            return;
        }
        let actions = self.strategy.lock().on_tick(tick);
        let cause = tick.envelope();
        for action in actions {
            if let Err(e) = self.emit(action, &cause) {
                // An emit failure is fatal to that emit only; the tick path
                // and the remaining actions continue.
                error!(run_id = %self.run_id, event_id = %cause.id, error = %e, "action emit failed");
            }
        }
    }

    /// Feed one `data.WindowReady` envelope into the strategy.
    pub fn handle_data(&self, envelope: &Envelope) {
        if self.cleaned.load(Ordering::SeqCst) {
            return;
        }
        let window: WindowReady = match serde_json::from_value(envelope.payload.clone()) {
            Ok(window) => window,
            Err(e) => {
                error!(run_id = %self.run_id, event_id = %envelope.id, error = %e, "malformed window payload");
                return;
            }
        };
        let actions = self.strategy.lock().on_data(&window);
        for action in actions {
            if let Err(e) = self.emit(action, envelope) {
                error!(run_id = %self.run_id, event_id = %envelope.id, error = %e, "action emit failed");
            }
        }
    }

    /// Silence the runner. Safe to call multiple times.
    pub fn cleanup(&self) {
        if self.cleaned.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(run_id = %self.run_id, "strategy runner cleaned up");
    }

    fn emit(&self, action: Action, cause: &Envelope) -> CoreResult<u64> {
        let envelope = match action {
            Action::FetchWindow { symbol, timeframe, from, to } => Envelope::event(
                "strategy.FetchWindow",
                serde_json::to_value(FetchWindowPayload { symbol, timeframe, from, to })?,
            ),
            Action::PlaceOrder {
                client_order_id,
                symbol,
                side,
                order_type,
                qty,
                limit_price,
                stop_price,
                time_in_force,
                extended_hours,
            } => Envelope::event(
                "strategy.PlaceRequest",
                serde_json::to_value(PlaceRequestPayload {
                    client_order_id: client_order_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
                    symbol,
                    side,
                    order_type,
                    qty,
                    limit_price,
                    stop_price,
                    time_in_force,
                    extended_hours,
                })?,
            ),
        };
        self.log.append(
            envelope
                .with_run_id(self.run_id)
                .with_producer(PRODUCER)
                .caused_by(cause),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryEventLog;
    use crate::clock::Timeframe;
    use crate::models::RunMode;
    use crate::strategy::registry::make_strategy;
    use serde_json::json;

    fn scheduled_runner(log: Arc<dyn EventLog>, run_id: Uuid) -> Arc<StrategyRunner> {
        let config = json!({"orders": [{"bar_index": 2, "side": "buy", "qty": "1"}]});
        let strategy = make_strategy("scheduled", &config).unwrap();
        StrategyRunner::new(run_id, vec!["BTC".to_string()], strategy, log)
    }

    fn tick(run_id: Uuid, bar_index: u64) -> Tick {
        Tick {
            id: Uuid::new_v4(),
            run_id,
            ts: "2026-01-01T00:02:00Z".parse().unwrap(),
            bar_index,
            timeframe: Timeframe::M1,
            is_backtest: RunMode::Backtest.is_backtest(),
        }
    }

    #[test]
    fn test_tick_actions_become_place_requests() {
        let log: Arc<dyn EventLog> = Arc::new(MemoryEventLog::with_defaults());
        let run_id = Uuid::new_v4();
        let runner = scheduled_runner(log.clone(), run_id);
        runner.initialize();

        let tick = tick(run_id, 2);
        runner.handle_tick(&tick);

        let entries = log.read(0, 10, None).unwrap();
        assert_eq!(entries.len(), 1);
        let envelope = &entries[0].envelope;
        assert_eq!(envelope.event_type, "strategy.PlaceRequest");
        assert_eq!(envelope.producer, PRODUCER);
        assert_eq!(envelope.run_id, Some(run_id));
        assert_eq!(envelope.causation_id, Some(tick.id));
        assert_eq!(envelope.corr_id, tick.id);
        assert_eq!(envelope.payload["qty"], json!("1"));
        // Generated idempotency key parses as a UUID.
        let key = envelope.payload["client_order_id"].as_str().unwrap();
        assert!(Uuid::parse_str(key).is_ok());
    }

    #[test]
    fn test_non_matching_tick_emits_nothing() {
        let log: Arc<dyn EventLog> = Arc::new(MemoryEventLog::with_defaults());
        let run_id = Uuid::new_v4();
        let runner = scheduled_runner(log.clone(), run_id);
        runner.initialize();
        runner.handle_tick(&tick(run_id, 0));
        assert!(log.read(0, 10, None).unwrap().is_empty());
    }

    #[test]
    fn test_window_flow_emits_buy() {
        let log: Arc<dyn EventLog> = Arc::new(MemoryEventLog::with_defaults());
        let run_id = Uuid::new_v4();
        let strategy = make_strategy("window_probe", &json!({"buy_qty": "2"})).unwrap();
        let runner = StrategyRunner::new(run_id, vec!["ETH".to_string()], strategy, log.clone());
        runner.initialize();

        let window = json!({
            "symbol": "ETH",
            "timeframe": "1m",
            "bars": [{
                "symbol": "ETH", "timeframe": "1m", "ts": "2026-01-01T00:00:00Z",
                "open": "100", "high": "101", "low": "99", "close": "100", "volume": "5"
            }],
        });
        let data = Envelope::event("data.WindowReady", window)
            .with_run_id(run_id)
            .with_producer("marvin.sim");
        runner.handle_data(&data);

        let entries = log.read(0, 10, None).unwrap();
        assert_eq!(entries.len(), 1);
        let envelope = &entries[0].envelope;
        assert_eq!(envelope.event_type, "strategy.PlaceRequest");
        assert_eq!(envelope.causation_id, Some(data.id));
        assert_eq!(envelope.payload["side"], json!("buy"));
        assert_eq!(envelope.payload["qty"], json!("2"));
    }

    #[test]
    fn test_cleanup_is_idempotent_and_silences_runner() {
        let log: Arc<dyn EventLog> = Arc::new(MemoryEventLog::with_defaults());
        let run_id = Uuid::new_v4();
        let runner = scheduled_runner(log.clone(), run_id);
        runner.initialize();
        runner.cleanup();
        runner.cleanup();
        runner.handle_tick(&tick(run_id, 2));
        assert!(log.read(0, 10, None).unwrap().is_empty());
    }
}
