//! Run lifecycle manager.
//!
//! Owns the `run_id -> RunContext` registry and wires per-run components on
//! start: clock, strategy runner, simulator or live adapter, and the run's
//! event pipeline. Teardown runs in strict reverse order and no run-scoped
//! event follows the terminal `run.{Stopped|Completed|Error}`.
//!
//! Backtest determinism: the tick callback drains the run's pipeline
//! subscription synchronously after invoking the strategy. Appends dispatch
//! to subscriber queues inline, so the strategy -> router -> simulator chain
//! reaches a fixed point inside the tick, before the bar is evaluated.

use crate::adapter::{AdapterPlugins, ExchangeAdapter, LiveAdapter};
use crate::bus::{Envelope, EventFilter, EventLog, Subscription};
use crate::clock::{BacktestClock, RealtimeClock, Tick, TickCallback};
use crate::error::{CoreError, CoreResult};
use crate::models::{
    OrderIntent, OrderRecord, Run, RunCreate, RunMode, RunStatus,
};
use crate::router::{DomainRouter, RunModeSource};
use crate::runner::StrategyRunner;
use crate::sim::{FillSimulationConfig, SimExchange};
use crate::store::{BarStore, FillStore, OrderStore, RunStore};
use crate::strategy::{registry as strategies, PlaceRequestPayload, FetchWindowPayload, WindowReady};
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const PRODUCER: &str = "marvin.manager";

/// Mode lookups for the router come straight from the run store, keeping
/// the router free of any manager reference.
struct StoreModeSource {
    runs: Arc<RunStore>,
}

impl RunModeSource for StoreModeSource {
    fn run_mode(&self, run_id: Uuid) -> Option<(RunMode, RunStatus)> {
        self.runs.get(run_id).ok().flatten().map(|run| (run.mode, run.status))
    }
}

enum ClockHandle {
    Realtime(Arc<RealtimeClock>),
    Backtest(Arc<BacktestClock>),
}

impl ClockHandle {
    fn stop(&self) {
        match self {
            ClockHandle::Realtime(clock) => clock.stop(),
            ClockHandle::Backtest(clock) => clock.stop(),
        }
    }
}

enum ExecHandle {
    Sim(Arc<SimExchange>),
    Live(Arc<LiveAdapter>),
}

impl ExecHandle {
    fn adapter(&self) -> Arc<dyn ExchangeAdapter> {
        match self {
            ExecHandle::Sim(sim) => sim.clone(),
            ExecHandle::Live(adapter) => adapter.clone(),
        }
    }
}

/// Everything one run owns. Dropped only after teardown completes.
struct RunContext {
    run_id: Uuid,
    clock: ClockHandle,
    runner: Arc<StrategyRunner>,
    exec: ExecHandle,
    pipeline: tokio::sync::Mutex<Subscription>,
    pipeline_id: u64,
    pump: parking_lot::Mutex<Option<JoinHandle<()>>>,
    clock_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    log: Arc<dyn EventLog>,
    orders: Arc<OrderStore>,
    bars: Arc<BarStore>,
}

impl RunContext {
    /// Process queued pipeline events until the queue is empty. Appends
    /// dispatch synchronously, so follow-on events produced while draining
    /// land in the same queue and are handled in this pass.
    async fn drain(&self, router: &DomainRouter) {
        let mut pipeline = self.pipeline.lock().await;
        while let Ok(entry) = pipeline.receiver.try_recv() {
            self.dispatch(router, &entry.envelope).await;
        }
    }

    async fn dispatch(&self, router: &DomainRouter, envelope: &Envelope) {
        match envelope.namespace() {
            "strategy" => {
                if let Err(e) = router.route(envelope) {
                    warn!(run_id = %self.run_id, event_id = %envelope.id, error = %e, "route failed");
                }
            }
            "backtest" => {
                if let ExecHandle::Sim(sim) = &self.exec {
                    sim.handle_command(envelope);
                }
            }
            "data" if envelope.event_type == "data.WindowReady" => {
                self.runner.handle_data(envelope);
            }
            "live" => self.dispatch_live(envelope).await,
            _ => {}
        }
    }

    async fn dispatch_live(&self, envelope: &Envelope) {
        match envelope.event_type.as_str() {
            "live.PlaceOrder" => {
                let payload: PlaceRequestPayload = match serde_json::from_value(envelope.payload.clone()) {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!(run_id = %self.run_id, event_id = %envelope.id, error = %e, "malformed place payload");
                        return;
                    }
                };
                // Idempotency by client key.
                match self.orders.get_by_client_id(self.run_id, &payload.client_order_id) {
                    Ok(Some(_)) => return,
                    Ok(None) => {}
                    Err(e) => {
                        error!(run_id = %self.run_id, error = %e, "order lookup failed");
                        return;
                    }
                }
                let intent = OrderIntent {
                    run_id: self.run_id,
                    client_order_id: Some(payload.client_order_id.clone()),
                    symbol: payload.symbol.clone(),
                    side: payload.side,
                    order_type: payload.order_type,
                    qty: payload.qty,
                    limit_price: payload.limit_price,
                    stop_price: payload.stop_price,
                    time_in_force: payload.time_in_force,
                    extended_hours: payload.extended_hours,
                };
                match self.exec.adapter().submit_order(&intent).await {
                    Ok(result) if result.success => {
                        let mut record = OrderRecord::from_intent(
                            &intent,
                            payload.client_order_id.clone(),
                            Utc::now(),
                        );
                        record.exchange_order_id = result.exchange_order_id;
                        record.status = result.status;
                        if let Err(e) = self.orders.insert(&record) {
                            error!(run_id = %self.run_id, error = %e, "order snapshot persist failed");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(run_id = %self.run_id, event_id = %envelope.id, error = %e, "live order submit failed")
                    }
                }
            }
            "live.FetchWindow" => {
                let payload: FetchWindowPayload = match serde_json::from_value(envelope.payload.clone()) {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!(run_id = %self.run_id, event_id = %envelope.id, error = %e, "malformed window payload");
                        return;
                    }
                };
                let bars = match self.bars.range(
                    &payload.symbol,
                    payload.timeframe,
                    payload.from,
                    payload.to,
                    i64::MAX as usize,
                ) {
                    Ok(bars) => bars,
                    Err(e) => {
                        error!(run_id = %self.run_id, error = %e, "bar read failed");
                        return;
                    }
                };
                let window = WindowReady {
                    symbol: payload.symbol,
                    timeframe: payload.timeframe,
                    bars,
                };
                let emit = serde_json::to_value(&window).map(|payload| {
                    Envelope::event("data.WindowReady", payload)
                        .with_run_id(self.run_id)
                        .with_producer(PRODUCER)
                        .caused_by(envelope)
                });
                match emit {
                    Ok(envelope) => {
                        if let Err(e) = self.log.append(envelope) {
                            error!(run_id = %self.run_id, error = %e, "window emit failed");
                        }
                    }
                    Err(e) => error!(run_id = %self.run_id, error = %e, "window encode failed"),
                }
            }
            _ => {}
        }
    }
}

pub struct RunManager {
    log: Arc<dyn EventLog>,
    runs: Arc<RunStore>,
    orders: Arc<OrderStore>,
    fills: Arc<FillStore>,
    bars: Arc<BarStore>,
    plugins: Arc<AdapterPlugins>,
    router: Arc<DomainRouter>,
    tick_timeout: Duration,
    contexts: RwLock<HashMap<Uuid, Arc<RunContext>>>,
}

enum Terminal {
    Stopped,
    Completed,
    Error(String),
}

impl Terminal {
    fn status(&self) -> RunStatus {
        match self {
            Terminal::Stopped => RunStatus::Stopped,
            Terminal::Completed => RunStatus::Completed,
            Terminal::Error(_) => RunStatus::Error,
        }
    }
}

impl RunManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        log: Arc<dyn EventLog>,
        runs: Arc<RunStore>,
        orders: Arc<OrderStore>,
        fills: Arc<FillStore>,
        bars: Arc<BarStore>,
        plugins: Arc<AdapterPlugins>,
        tick_timeout: Duration,
    ) -> Arc<Self> {
        let router = DomainRouter::new(log.clone(), Arc::new(StoreModeSource { runs: runs.clone() }));
        Arc::new(Self {
            log,
            runs,
            orders,
            fills,
            bars,
            plugins,
            router,
            tick_timeout,
            contexts: RwLock::new(HashMap::new()),
        })
    }

    /// Validate, persist as `pending`, emit `run.Created`.
    pub fn create(&self, request: RunCreate) -> CoreResult<Run> {
        // Resolving the strategy now surfaces bad ids/configs at create time.
        strategies::make_strategy(&request.strategy_id, &request.config)?;
        let run = request.into_run()?;
        self.runs.insert(&run)?;
        self.log.append(
            Envelope::event(
                "run.Created",
                json!({
                    "strategy_id": run.strategy_id,
                    "mode": run.mode.as_str(),
                    "symbols": run.symbols,
                    "timeframe": run.timeframe.as_str(),
                }),
            )
            .with_run_id(run.id)
            .with_producer(PRODUCER),
        )?;
        info!(run_id = %run.id, strategy = %run.strategy_id, mode = %run.mode.as_str(), "run created");
        Ok(run)
    }

    /// Build per-mode components, transition to `running`, start the clock.
    pub async fn start(self: &Arc<Self>, run_id: Uuid) -> CoreResult<Run> {
        let run = self
            .runs
            .get(run_id)?
            .ok_or_else(|| CoreError::not_found(format!("run {run_id}")))?;
        if run.status != RunStatus::Pending {
            return Err(CoreError::conflict(format!(
                "run {run_id} is {}, not pending",
                run.status.as_str()
            )));
        }
        if self.contexts.read().contains_key(&run_id) {
            return Err(CoreError::conflict(format!("run {run_id} teardown still in progress")));
        }

        let strategy = strategies::make_strategy(&run.strategy_id, &run.config)?;
        let runner = StrategyRunner::new(run_id, run.symbols.clone(), strategy, self.log.clone());
        runner.initialize();

        let pipeline = self.log.subscribe(
            &["strategy.*", "backtest.*", "live.*", "data.WindowReady"],
            Some(EventFilter::any().with_run_id(run_id)),
        );
        let pipeline_id = pipeline.id;

        match run.mode {
            RunMode::Backtest => {
                let (start, end) = match (run.backtest_start, run.backtest_end) {
                    (Some(start), Some(end)) => (start, end),
                    _ => return Err(CoreError::validation("backtest run missing time range")),
                };
                let sim_config: FillSimulationConfig = run
                    .config
                    .get("sim")
                    .map(|value| serde_json::from_value(value.clone()))
                    .transpose()
                    .map_err(|e| CoreError::validation(format!("bad sim config: {e}")))?
                    .unwrap_or_default();

                let sim = SimExchange::new(
                    run_id,
                    run.timeframe,
                    sim_config,
                    self.log.clone(),
                    self.orders.clone(),
                    self.fills.clone(),
                );
                sim.preload(&self.bars, &run.symbols, start, end)?;

                let clock = BacktestClock::with_tick_timeout(
                    self.log.clone(),
                    run.timeframe,
                    start,
                    end,
                    self.tick_timeout,
                );
                let ctx = Arc::new(RunContext {
                    run_id,
                    clock: ClockHandle::Backtest(clock.clone()),
                    runner,
                    exec: ExecHandle::Sim(sim.clone()),
                    pipeline: tokio::sync::Mutex::new(pipeline),
                    pipeline_id,
                    pump: parking_lot::Mutex::new(None),
                    clock_task: parking_lot::Mutex::new(None),
                    log: self.log.clone(),
                    orders: self.orders.clone(),
                    bars: self.bars.clone(),
                });
                clock.on_tick(self.backtest_tick_callback(ctx.clone()));

                self.transition_to_running(&run)?;
                self.contexts.write().insert(run_id, ctx.clone());

                if !sim.has_bars() {
                    // No data to replay: the run completes immediately with
                    // an empty equity curve and no orders.
                    warn!(run_id = %run_id, "backtest has zero bars, completing immediately");
                    self.finalize(run_id, Terminal::Completed, false).await?;
                } else {
                    let manager = self.clone();
                    let task = tokio::spawn(async move {
                        match clock.run(run_id).await {
                            Ok(_) if !clock.is_stopped() => {
                                if let Err(e) = manager.finalize(run_id, Terminal::Completed, false).await {
                                    error!(run_id = %run_id, error = %e, "completion failed");
                                }
                            }
                            Ok(_) => {}
                            Err(e) => {
                                let reason = format!("clock loop: {e}");
                                if let Err(e) = manager.finalize(run_id, Terminal::Error(reason), false).await {
                                    error!(run_id = %run_id, error = %e, "error transition failed");
                                }
                            }
                        }
                    });
                    *ctx.clock_task.lock() = Some(task);
                }
            }
            RunMode::Live | RunMode::Paper => {
                let adapter_id = run
                    .config
                    .get("adapter")
                    .and_then(|value| value.as_str())
                    .unwrap_or("paper");
                let venue = self.plugins.load(adapter_id, &run.config)?;
                let adapter = LiveAdapter::new(run_id, self.log.clone(), venue);
                adapter.connect().await?;

                let clock = RealtimeClock::with_tick_timeout(
                    self.log.clone(),
                    run.timeframe,
                    self.tick_timeout,
                );
                let ctx = Arc::new(RunContext {
                    run_id,
                    clock: ClockHandle::Realtime(clock.clone()),
                    runner: runner.clone(),
                    exec: ExecHandle::Live(adapter),
                    pipeline: tokio::sync::Mutex::new(pipeline),
                    pipeline_id,
                    pump: parking_lot::Mutex::new(None),
                    clock_task: parking_lot::Mutex::new(None),
                    log: self.log.clone(),
                    orders: self.orders.clone(),
                    bars: self.bars.clone(),
                });

                let tick_runner = runner.clone();
                clock.on_tick(Arc::new(move |tick: Tick| {
                    let runner = tick_runner.clone();
                    Box::pin(async move {
                        runner.handle_tick(&tick);
                    })
                }));

                // Pump the pipeline for the lifetime of the run.
                let pump_ctx = ctx.clone();
                let pump_router = self.router.clone();
                *ctx.pump.lock() = Some(tokio::spawn(async move {
                    loop {
                        let entry = pump_ctx.pipeline.lock().await.receiver.recv().await;
                        match entry {
                            Some(entry) => pump_ctx.dispatch(&pump_router, &entry.envelope).await,
                            None => break,
                        }
                    }
                }));

                self.transition_to_running(&run)?;
                self.contexts.write().insert(run_id, ctx.clone());

                let manager = self.clone();
                let clock_for_task = clock.clone();
                let task = tokio::spawn(async move {
                    if let Err(e) = clock_for_task.run(run_id).await {
                        let reason = format!("clock loop: {e}");
                        if let Err(e) = manager.finalize(run_id, Terminal::Error(reason), false).await {
                            error!(run_id = %run_id, error = %e, "error transition failed");
                        }
                    }
                });
                *ctx.clock_task.lock() = Some(task);
            }
        }

        self.runs
            .get(run_id)?
            .ok_or_else(|| CoreError::not_found(format!("run {run_id}")))
    }

    fn backtest_tick_callback(self: &Arc<Self>, ctx: Arc<RunContext>) -> TickCallback {
        let router = self.router.clone();
        Arc::new(move |tick: Tick| {
            let ctx = ctx.clone();
            let router = router.clone();
            Box::pin(async move {
                ctx.runner.handle_tick(&tick);
                // Strategy intents route and land in the simulator before
                // this bar is evaluated.
                ctx.drain(&router).await;
                if let ExecHandle::Sim(sim) = &ctx.exec {
                    if let Err(e) = sim.advance_to(&tick) {
                        error!(run_id = %ctx.run_id, bar_index = tick.bar_index, error = %e, "bar evaluation failed");
                    }
                }
            })
        })
    }

    fn transition_to_running(&self, run: &Run) -> CoreResult<()> {
        if !self
            .runs
            .transition(run.id, RunStatus::Pending, RunStatus::Running, Some(Utc::now()), None)?
        {
            return Err(CoreError::conflict(format!("run {} is no longer pending", run.id)));
        }
        self.log.append(
            Envelope::event("run.Started", json!({"mode": run.mode.as_str()}))
                .with_run_id(run.id)
                .with_producer(PRODUCER),
        )?;
        info!(run_id = %run.id, mode = %run.mode.as_str(), "run started");
        Ok(())
    }

    /// Cooperative stop. Idempotent once the run is terminal.
    pub async fn stop(self: &Arc<Self>, run_id: Uuid) -> CoreResult<Run> {
        let run = self
            .runs
            .get(run_id)?
            .ok_or_else(|| CoreError::not_found(format!("run {run_id}")))?;
        if run.status.is_terminal() {
            return Ok(run);
        }
        if run.status != RunStatus::Running {
            return Err(CoreError::conflict(format!(
                "run {run_id} is {}, not running",
                run.status.as_str()
            )));
        }

        self.log.append(
            Envelope::event("run.StopRequested", json!({}))
                .with_run_id(run_id)
                .with_producer(PRODUCER),
        )?;
        self.finalize(run_id, Terminal::Stopped, true).await?;
        self.runs
            .get(run_id)?
            .ok_or_else(|| CoreError::not_found(format!("run {run_id}")))
    }

    /// Normal completion: backtest exhaustion invokes this internally; a
    /// live run ended cleanly goes through here too.
    pub async fn complete(self: &Arc<Self>, run_id: Uuid) -> CoreResult<()> {
        let run = self
            .runs
            .get(run_id)?
            .ok_or_else(|| CoreError::not_found(format!("run {run_id}")))?;
        if run.status.is_terminal() {
            return Ok(());
        }
        self.finalize(run_id, Terminal::Completed, true).await
    }

    /// Escalate a failure. No-op when the run is already terminal.
    pub async fn error(self: &Arc<Self>, run_id: Uuid, reason: &str) -> CoreResult<()> {
        let Some(run) = self.runs.get(run_id)? else {
            return Err(CoreError::not_found(format!("run {run_id}")));
        };
        if run.status.is_terminal() {
            return Ok(());
        }
        self.finalize(run_id, Terminal::Error(reason.to_string()), true).await
    }

    /// Teardown in strict reverse order, then the terminal transition and
    /// its announcement. Nothing run-scoped is emitted afterwards.
    async fn finalize(self: &Arc<Self>, run_id: Uuid, terminal: Terminal, await_clock: bool) -> CoreResult<()> {
        let ctx = self.contexts.read().get(&run_id).cloned();
        if let Some(ctx) = &ctx {
            ctx.clock.stop();
            if await_clock {
                let task = ctx.clock_task.lock().take();
                if let Some(task) = task {
                    // In-flight tick processing finishes before teardown.
                    let _ = task.await;
                }
            }
            ctx.runner.cleanup();

            match (&ctx.exec, &terminal) {
                (ExecHandle::Sim(sim), Terminal::Completed) => {
                    // Final drain picks up intents from the last tick, then
                    // the terminal result freezes simulator state.
                    ctx.drain(&self.router).await;
                    if let Err(e) = sim.finish() {
                        warn!(run_id = %run_id, error = %e, "result emission failed");
                    }
                }
                (ExecHandle::Sim(_), _) => {}
                (ExecHandle::Live(adapter), _) => {
                    if let Err(e) = adapter.disconnect().await {
                        warn!(run_id = %run_id, error = %e, "adapter disconnect failed");
                    }
                }
            }

            let pump = ctx.pump.lock().take();
            if let Some(pump) = pump {
                pump.abort();
            }
            self.log.unsubscribe(ctx.pipeline_id);
        }

        let status = terminal.status();
        if !self.runs.transition(run_id, RunStatus::Running, status, None, Some(Utc::now()))?
            && !self.runs.transition(run_id, RunStatus::Pending, status, None, Some(Utc::now()))?
        {
            warn!(run_id = %run_id, to = status.as_str(), "terminal transition lost; run already terminal");
        }

        let (event_type, payload) = match &terminal {
            Terminal::Stopped => ("run.Stopped", json!({})),
            Terminal::Completed => ("run.Completed", json!({})),
            Terminal::Error(reason) => ("run.Error", json!({"reason": reason})),
        };
        self.log.append(
            Envelope::event(event_type, payload)
                .with_run_id(run_id)
                .with_producer(PRODUCER),
        )?;
        info!(run_id = %run_id, status = status.as_str(), "run finalized");

        self.contexts.write().remove(&run_id);
        Ok(())
    }

    /// Crash recovery: any persisted `running` row moves to `error` with
    /// reason `recovery_abort`. Simulator and strategy state are not
    /// journalled, so Weaver never silently resumes in-flight runs.
    pub fn recover(&self) -> CoreResult<usize> {
        let orphans = self.runs.running()?;
        let count = orphans.len();
        for run in orphans {
            warn!(run_id = %run.id, "recovery abort: run was left running");
            self.runs
                .transition(run.id, RunStatus::Running, RunStatus::Error, None, Some(Utc::now()))?;
            self.log.append(
                Envelope::event("run.Error", json!({"reason": "recovery_abort"}))
                    .with_run_id(run.id)
                    .with_producer(PRODUCER),
            )?;
        }
        if count > 0 {
            info!(aborted = count, "recovery pass complete");
        }
        Ok(count)
    }

    /// API order submission. Returns the record and whether it is new;
    /// replays of an existing `client_order_id` return the existing record.
    pub async fn submit_order(&self, intent: OrderIntent) -> CoreResult<(OrderRecord, bool)> {
        intent.validate()?;
        let run = self
            .runs
            .get(intent.run_id)?
            .ok_or_else(|| CoreError::not_found(format!("run {}", intent.run_id)))?;

        if let Some(key) = intent.client_order_id.as_deref() {
            if let Some(existing) = self.orders.get_by_client_id(run.id, key)? {
                return Ok((existing, false));
            }
        }

        let ctx = self
            .contexts
            .read()
            .get(&run.id)
            .cloned()
            .ok_or(CoreError::NotConnected)?;

        match &ctx.exec {
            ExecHandle::Sim(sim) => {
                let payload = PlaceRequestPayload {
                    client_order_id: intent
                        .client_order_id
                        .clone()
                        .unwrap_or_else(|| Uuid::new_v4().to_string()),
                    symbol: intent.symbol.clone(),
                    side: intent.side,
                    order_type: intent.order_type,
                    qty: intent.qty,
                    limit_price: intent.limit_price,
                    stop_price: intent.stop_price,
                    time_in_force: intent.time_in_force,
                    extended_hours: intent.extended_hours,
                };
                Ok((sim.place(payload, None)?, true))
            }
            ExecHandle::Live(adapter) => {
                let result = adapter.submit_order(&intent).await?;
                if !result.success {
                    return Err(CoreError::AdapterFailure {
                        code: result.error_code.unwrap_or_else(|| "rejected".to_string()),
                        message: result.error_message.unwrap_or_else(|| "venue rejected order".to_string()),
                    });
                }
                let key = intent
                    .client_order_id
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().to_string());
                let mut record = OrderRecord::from_intent(&intent, key, Utc::now());
                record.exchange_order_id = result.exchange_order_id;
                record.status = result.status;
                self.orders.insert(&record)?;
                Ok((record, true))
            }
        }
    }

    /// Cancel through the run's adapter. `Conflict` for terminal orders.
    pub async fn cancel_order(&self, order_id: Uuid) -> CoreResult<()> {
        let order = self
            .orders
            .get(order_id)?
            .ok_or_else(|| CoreError::not_found(format!("order {order_id}")))?;
        if order.status.is_terminal() {
            return Err(CoreError::conflict(format!(
                "order {order_id} is {}",
                order.status.as_str()
            )));
        }
        let ctx = self
            .contexts
            .read()
            .get(&order.run_id)
            .cloned()
            .ok_or(CoreError::NotConnected)?;

        match &ctx.exec {
            ExecHandle::Sim(sim) => {
                if !sim.cancel(order.id)? {
                    return Err(CoreError::conflict(format!("order {order_id} is no longer pending")));
                }
            }
            ExecHandle::Live(adapter) => {
                let exchange_id = order
                    .exchange_order_id
                    .clone()
                    .ok_or_else(|| CoreError::conflict("order has no exchange id yet"))?;
                if !adapter.cancel_order(&exchange_id).await? {
                    return Err(CoreError::conflict(format!("venue refused cancel for {order_id}")));
                }
                let mut record = order;
                record.status = crate::models::OrderStatus::Cancelled;
                record.updated_at = Utc::now();
                self.orders.update(&record)?;
            }
        }
        Ok(())
    }
}
