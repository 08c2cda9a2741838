//! Domain router: rewrites mode-agnostic `strategy.*` events into live- or
//! backtest-scoped events so one strategy codebase runs against simulated
//! or real venues.
//!
//! One router per process. The run's mode is cached at first observation;
//! mode transitions after run start are disallowed, so the cache wins for
//! the lifetime of the process.

use crate::bus::{Envelope, EventLog};
use crate::error::CoreResult;
use crate::models::{RunMode, RunStatus};
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

pub const PRODUCER: &str = "marvin.router";

/// Where the router learns a run's mode. Implemented by the run manager;
/// the trait keeps ownership acyclic.
pub trait RunModeSource: Send + Sync {
    fn run_mode(&self, run_id: Uuid) -> Option<(RunMode, RunStatus)>;
}

pub struct DomainRouter {
    log: Arc<dyn EventLog>,
    modes: RwLock<HashMap<Uuid, RunMode>>,
    source: Arc<dyn RunModeSource>,
}

impl DomainRouter {
    pub fn new(log: Arc<dyn EventLog>, source: Arc<dyn RunModeSource>) -> Arc<Self> {
        Arc::new(Self {
            log,
            modes: RwLock::new(HashMap::new()),
            source,
        })
    }

    /// Rewrite one strategy event. Unknown run or terminal run drops the
    /// event with a `run.UnknownRouted` diagnostic.
    pub fn route(&self, envelope: &Envelope) -> CoreResult<()> {
        let Some(run_id) = envelope.run_id else {
            return self.drop_unroutable(envelope, "missing_run_id");
        };

        let cached_mode = self.modes.read().get(&run_id).copied();
        let mode = match cached_mode {
            Some(mode) => mode,
            None => match self.source.run_mode(run_id) {
                None => return self.drop_unroutable(envelope, "unknown_run"),
                Some((_, status)) if status.is_terminal() => {
                    return self.drop_unroutable(envelope, "terminal_run")
                }
                Some((mode, _)) => {
                    self.modes.write().insert(run_id, mode);
                    mode
                }
            },
        };

        let Some(suffix) = envelope.event_type.strip_prefix("strategy.") else {
            return Ok(());
        };
        let routed_type = format!("{}.{}", route_namespace(mode), route_suffix(suffix));

        debug!(run_id = %run_id, from = %envelope.event_type, to = %routed_type, "routing");
        let routed = Envelope::event(routed_type, envelope.payload.clone())
            .with_producer(PRODUCER)
            .with_run_id(run_id)
            .caused_by(envelope);
        self.log.append(routed)?;
        Ok(())
    }

    fn drop_unroutable(&self, envelope: &Envelope, reason: &str) -> CoreResult<()> {
        warn!(event_id = %envelope.id, event_type = %envelope.event_type, reason, "dropping unroutable event");
        let mut diagnostic = Envelope::event(
            "run.UnknownRouted",
            json!({
                "original_type": envelope.event_type,
                "reason": reason,
            }),
        )
        .with_producer(PRODUCER)
        .caused_by(envelope);
        diagnostic.run_id = envelope.run_id;
        self.log.append(diagnostic)?;
        Ok(())
    }
}

fn route_namespace(mode: RunMode) -> &'static str {
    match mode {
        RunMode::Live | RunMode::Paper => "live",
        RunMode::Backtest => "backtest",
    }
}

/// `PlaceRequest` becomes `PlaceOrder` once scoped to a venue; everything
/// else keeps its name.
fn route_suffix(suffix: &str) -> &str {
    if suffix == "PlaceRequest" {
        "PlaceOrder"
    } else {
        suffix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{EventFilter, MemoryEventLog};
    use parking_lot::Mutex;

    struct StubSource {
        runs: Mutex<HashMap<Uuid, (RunMode, RunStatus)>>,
    }

    impl StubSource {
        fn with(entries: Vec<(Uuid, RunMode, RunStatus)>) -> Arc<Self> {
            Arc::new(Self {
                runs: Mutex::new(
                    entries.into_iter().map(|(id, m, s)| (id, (m, s))).collect(),
                ),
            })
        }
    }

    impl RunModeSource for StubSource {
        fn run_mode(&self, run_id: Uuid) -> Option<(RunMode, RunStatus)> {
            self.runs.lock().get(&run_id).copied()
        }
    }

    fn place_request(run_id: Uuid) -> Envelope {
        Envelope::event(
            "strategy.PlaceRequest",
            serde_json::json!({
                "client_order_id": "k-1",
                "symbol": "BTC",
                "side": "buy",
                "order_type": "market",
                "qty": "1",
                "time_in_force": "gtc",
            }),
        )
        .with_run_id(run_id)
        .with_producer("marvin.runner")
    }

    #[test]
    fn test_backtest_rewrite() {
        let log: Arc<dyn EventLog> = Arc::new(MemoryEventLog::with_defaults());
        let run_id = Uuid::new_v4();
        let source = StubSource::with(vec![(run_id, RunMode::Backtest, RunStatus::Running)]);
        let router = DomainRouter::new(log.clone(), source);

        let original = place_request(run_id);
        router.route(&original).unwrap();

        let routed = &log.read(0, 10, Some(&EventFilter::for_types(["backtest.*"]))).unwrap()[0];
        assert_eq!(routed.envelope.event_type, "backtest.PlaceOrder");
        assert_eq!(routed.envelope.run_id, Some(run_id));
        assert_eq!(routed.envelope.corr_id, original.corr_id);
        assert_eq!(routed.envelope.causation_id, Some(original.id));
        assert_eq!(routed.envelope.payload, original.payload);
    }

    #[test]
    fn test_live_and_paper_share_namespace() {
        for mode in [RunMode::Live, RunMode::Paper] {
            let log: Arc<dyn EventLog> = Arc::new(MemoryEventLog::with_defaults());
            let run_id = Uuid::new_v4();
            let source = StubSource::with(vec![(run_id, mode, RunStatus::Running)]);
            let router = DomainRouter::new(log.clone(), source);
            router.route(&place_request(run_id)).unwrap();
            let entries = log.read(0, 10, Some(&EventFilter::for_types(["live.PlaceOrder"]))).unwrap();
            assert_eq!(entries.len(), 1);
        }
    }

    #[test]
    fn test_unknown_run_drops_with_diagnostic() {
        let log: Arc<dyn EventLog> = Arc::new(MemoryEventLog::with_defaults());
        let router = DomainRouter::new(log.clone(), StubSource::with(vec![]));
        router.route(&place_request(Uuid::new_v4())).unwrap();

        let entries = log.read(0, 10, None).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].envelope.event_type, "run.UnknownRouted");
        assert_eq!(entries[0].envelope.payload["reason"], serde_json::json!("unknown_run"));
    }

    #[test]
    fn test_terminal_run_drops() {
        let log: Arc<dyn EventLog> = Arc::new(MemoryEventLog::with_defaults());
        let run_id = Uuid::new_v4();
        let source = StubSource::with(vec![(run_id, RunMode::Backtest, RunStatus::Completed)]);
        let router = DomainRouter::new(log.clone(), source);
        router.route(&place_request(run_id)).unwrap();

        let entries = log.read(0, 10, None).unwrap();
        assert_eq!(entries[0].envelope.event_type, "run.UnknownRouted");
        assert_eq!(entries[0].envelope.payload["reason"], serde_json::json!("terminal_run"));
    }

    #[test]
    fn test_mode_cache_first_observation_wins() {
        let log: Arc<dyn EventLog> = Arc::new(MemoryEventLog::with_defaults());
        let run_id = Uuid::new_v4();
        let source = StubSource::with(vec![(run_id, RunMode::Backtest, RunStatus::Running)]);
        let router = DomainRouter::new(log.clone(), source.clone());

        router.route(&place_request(run_id)).unwrap();
        // Mutating the source after first observation changes nothing.
        source.runs.lock().insert(run_id, (RunMode::Live, RunStatus::Running));
        router.route(&place_request(run_id)).unwrap();

        let backtest = log.read(0, 10, Some(&EventFilter::for_types(["backtest.*"]))).unwrap();
        assert_eq!(backtest.len(), 2);
    }
}
