//! Per-run backtest simulator.
//!
//! Consumes `backtest.PlaceOrder` / `backtest.FetchWindow` for its run,
//! evaluates pending orders against the bar matching each clock tick, and
//! keeps cash, positions, fills, and the equity curve. Also implements the
//! exchange adapter contract so API-submitted orders take the same path as
//! strategy-routed ones.

use crate::adapter::{ExchangeAdapter, ExchangeOrder, SubmitResult};
use crate::bus::{Envelope, EventLog};
use crate::clock::{Tick, Timeframe};
use crate::error::{CoreError, CoreResult};
use crate::models::{Bar, FillRecord, OrderIntent, OrderRecord, OrderStatus};
use crate::sim::equity::{BacktestStats, EquityCurve};
use crate::sim::fills::{apply_slippage, commission, evaluate_fill, slippage_amount, FillEval};
use crate::sim::position::SimPosition;
use crate::sim::FillSimulationConfig;
use crate::store::{BarStore, FillStore, OrderStore};
use crate::strategy::{FetchWindowPayload, PlaceRequestPayload, WindowReady};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const PRODUCER: &str = "marvin.sim";

/// Payloads at or under this size go out as one `data.WindowReady`.
const INLINE_WINDOW_BYTES: usize = 100 * 1024;

struct PendingOrder {
    order_id: Uuid,
    placed_ts: DateTime<Utc>,
    client_order_id: String,
    /// Causation anchor for fill events.
    source: Envelope,
    /// Stop-limit whose stop leg has fired.
    triggered: bool,
}

struct SimState {
    bars: HashMap<(String, Timeframe), Vec<Bar>>,
    cursors: HashMap<String, usize>,
    last_close: HashMap<String, Decimal>,
    pending: Vec<PendingOrder>,
    orders: HashMap<Uuid, OrderRecord>,
    by_client_id: HashMap<String, Uuid>,
    positions: HashMap<String, SimPosition>,
    cash: Decimal,
    fees_paid: Decimal,
    realized_pnl: Decimal,
    equity: EquityCurve,
    fills: Vec<FillRecord>,
    tick_count: u64,
    finished: bool,
}

pub struct SimExchange {
    run_id: Uuid,
    timeframe: Timeframe,
    config: FillSimulationConfig,
    log: Arc<dyn EventLog>,
    orders_store: Arc<OrderStore>,
    fills_store: Arc<FillStore>,
    state: Mutex<SimState>,
}

impl SimExchange {
    pub fn new(
        run_id: Uuid,
        timeframe: Timeframe,
        config: FillSimulationConfig,
        log: Arc<dyn EventLog>,
        orders_store: Arc<OrderStore>,
        fills_store: Arc<FillStore>,
    ) -> Arc<Self> {
        let cash = config.initial_cash;
        Arc::new(Self {
            run_id,
            timeframe,
            config,
            log,
            orders_store,
            fills_store,
            state: Mutex::new(SimState {
                bars: HashMap::new(),
                cursors: HashMap::new(),
                last_close: HashMap::new(),
                pending: Vec::new(),
                orders: HashMap::new(),
                by_client_id: HashMap::new(),
                positions: HashMap::new(),
                cash,
                fees_paid: Decimal::ZERO,
                realized_pnl: Decimal::ZERO,
                equity: EquityCurve::new(),
                fills: Vec::new(),
                tick_count: 0,
                finished: false,
            }),
        })
    }

    /// Preload every bar the run can touch. The cache is immutable after
    /// this point.
    pub fn preload(
        &self,
        bars: &BarStore,
        symbols: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<usize> {
        let mut state = self.state.lock();
        let mut loaded = 0;
        for symbol in symbols {
            let series = bars.range(symbol, self.timeframe, start, end, i64::MAX as usize)?;
            loaded += series.len();
            state.cursors.insert(symbol.clone(), 0);
            state.bars.insert((symbol.clone(), self.timeframe), series);
        }
        info!(run_id = %self.run_id, bars = loaded, "simulator bar cache preloaded");
        Ok(loaded)
    }

    /// Seed the cache directly; used by tests.
    pub fn preload_bars(&self, symbol: &str, series: Vec<Bar>) {
        let mut state = self.state.lock();
        state.cursors.insert(symbol.to_string(), 0);
        state.bars.insert((symbol.to_string(), self.timeframe), series);
    }

    /// A run with an empty cache completes immediately.
    pub fn has_bars(&self) -> bool {
        self.state.lock().bars.values().any(|series| !series.is_empty())
    }

    pub fn equity_len(&self) -> usize {
        self.state.lock().equity.len()
    }

    /// Route one `backtest.*` envelope into the simulator.
    pub fn handle_command(&self, envelope: &Envelope) {
        match envelope.event_type.as_str() {
            "backtest.PlaceOrder" => {
                let payload: PlaceRequestPayload = match serde_json::from_value(envelope.payload.clone()) {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!(run_id = %self.run_id, event_id = %envelope.id, error = %e, "malformed place payload");
                        return;
                    }
                };
                if let Err(e) = self.place(payload, Some(envelope)) {
                    warn!(run_id = %self.run_id, event_id = %envelope.id, error = %e, "order placement failed");
                }
            }
            "backtest.FetchWindow" => {
                let payload: FetchWindowPayload = match serde_json::from_value(envelope.payload.clone()) {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!(run_id = %self.run_id, event_id = %envelope.id, error = %e, "malformed window payload");
                        return;
                    }
                };
                if let Err(e) = self.serve_window(&payload, envelope) {
                    warn!(run_id = %self.run_id, event_id = %envelope.id, error = %e, "window servicing failed");
                }
            }
            _ => {}
        }
    }

    /// Accept an order. Duplicate `client_order_id` returns the existing
    /// record without emitting a second `orders.Created`.
    pub fn place(
        &self,
        payload: PlaceRequestPayload,
        cause: Option<&Envelope>,
    ) -> CoreResult<OrderRecord> {
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
        intent.validate()?;

        let mut state = self.state.lock();
        if let Some(existing) = state.by_client_id.get(&payload.client_order_id) {
            debug!(run_id = %self.run_id, client_order_id = %payload.client_order_id, "idempotent replay");
            return Ok(state.orders[existing].clone());
        }

        let mut order = OrderRecord::from_intent(&intent, payload.client_order_id.clone(), Utc::now());
        order.exchange_order_id = Some(order.id.to_string());
        order.status = OrderStatus::Accepted;

        // API-submitted orders have no routed parent; record the request
        // itself so the causal chain still starts on the bus.
        let anchor = match cause {
            Some(cause) => cause.clone(),
            None => {
                let request = Envelope::event(
                    "orders.PlaceRequest",
                    json!({
                        "client_order_id": order.client_order_id,
                        "symbol": order.symbol,
                    }),
                )
                .with_run_id(self.run_id)
                .with_producer(PRODUCER);
                self.log.append(request.clone())?;
                request
            }
        };

        // Atomic with the order snapshot on the durable log.
        self.log.append_with_order(
            Envelope::event(
                "orders.Created",
                json!({
                    "order_id": order.id.to_string(),
                    "client_order_id": order.client_order_id,
                    "symbol": order.symbol,
                    "side": order.side.as_str(),
                    "order_type": order.order_type.as_str(),
                    "qty": order.qty.to_string(),
                }),
            )
            .with_run_id(self.run_id)
            .with_producer(PRODUCER)
            .caused_by(&anchor),
            &order,
            &self.orders_store,
        )?;

        state.pending.push(PendingOrder {
            order_id: order.id,
            placed_ts: order.created_at,
            client_order_id: order.client_order_id.clone(),
            source: anchor,
            triggered: false,
        });
        state.by_client_id.insert(order.client_order_id.clone(), order.id);
        state.orders.insert(order.id, order.clone());
        Ok(order)
    }

    /// Cancel a pending order; true when something was actually cancelled.
    pub fn cancel(&self, order_id: Uuid) -> CoreResult<bool> {
        let mut state = self.state.lock();
        let Some(index) = state.pending.iter().position(|p| p.order_id == order_id) else {
            return Ok(false);
        };
        let pending = state.pending.remove(index);
        let order = state.orders.get_mut(&order_id).expect("pending order tracked");
        order.status = OrderStatus::Cancelled;
        order.updated_at = Utc::now();
        let snapshot = order.clone();
        drop(state);

        self.orders_store.update(&snapshot)?;
        self.log.append(
            Envelope::event("orders.Cancelled", json!({"order_id": order_id.to_string()}))
                .with_run_id(self.run_id)
                .with_producer(PRODUCER)
                .caused_by(&pending.source),
        )?;
        Ok(true)
    }

    /// One clock tick: move bar cursors, evaluate pending orders, mark to
    /// market, append an equity point.
    pub fn advance_to(&self, tick: &Tick) -> CoreResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.finished {
            return Ok(());
        }
        state.tick_count += 1;

        // Step 1: per-symbol bar cursor -> the bar with ts == tick.ts.
        let mut current: HashMap<String, Bar> = HashMap::new();
        let timeframe = self.timeframe;
        let symbols: Vec<String> = state.cursors.keys().cloned().collect();
        for symbol in symbols {
            let key = (symbol.clone(), timeframe);
            let Some(series) = state.bars.get(&key) else { continue };
            let mut cursor = state.cursors[&symbol];
            while cursor < series.len() && series[cursor].ts < tick.ts {
                cursor += 1;
            }
            if cursor < series.len() && series[cursor].ts == tick.ts {
                current.insert(symbol.clone(), series[cursor].clone());
            }
            state.cursors.insert(symbol, cursor);
        }

        // Step 2: evaluate pending orders, FIFO by placement then key.
        let mut order_slots: Vec<usize> = (0..state.pending.len()).collect();
        order_slots.sort_by(|&a, &b| {
            let pa = &state.pending[a];
            let pb = &state.pending[b];
            pa.placed_ts
                .cmp(&pb.placed_ts)
                .then_with(|| pa.client_order_id.cmp(&pb.client_order_id))
        });

        let mut done: Vec<usize> = Vec::new();
        for slot in order_slots {
            let (order_id, triggered, source) = {
                let pending = &state.pending[slot];
                (pending.order_id, pending.triggered, pending.source.clone())
            };
            let order = state.orders[&order_id].clone();
            let Some(bar) = current.get(&order.symbol) else { continue };

            match evaluate_fill(
                order.side,
                order.order_type,
                order.limit_price,
                order.stop_price,
                triggered,
                bar,
                self.config.fill_reference,
            ) {
                FillEval::NoFill => {}
                FillEval::TriggerOnly => state.pending[slot].triggered = true,
                FillEval::Fill(raw_price) => {
                    self.execute_fill(state, order_id, raw_price, tick, &source)?;
                    done.push(slot);
                }
            }
        }
        done.sort_unstable_by(|a, b| b.cmp(a));
        for slot in done {
            state.pending.remove(slot);
        }

        // Steps 6-7: mark open positions to close, append equity.
        for (symbol, bar) in &current {
            state.last_close.insert(symbol.clone(), bar.close);
        }
        let closes = state.last_close.clone();
        let mut position_value = Decimal::ZERO;
        for (symbol, position) in state.positions.iter_mut() {
            if let Some(close) = closes.get(symbol) {
                position.mark(*close);
                position_value += position.market_value(*close);
            }
        }
        let equity = state.cash + position_value;
        state.equity.observe(tick.ts, equity);
        Ok(())
    }

    fn execute_fill(
        &self,
        state: &mut SimState,
        order_id: Uuid,
        raw_price: Decimal,
        tick: &Tick,
        source: &Envelope,
    ) -> CoreResult<()> {
        let config = &self.config;
        let order = state.orders.get_mut(&order_id).expect("pending order tracked");
        let fill_qty = order.remaining_qty();
        let fill_price = apply_slippage(raw_price, order.side, config.slippage_bps);
        let slip = slippage_amount(raw_price, config.slippage_bps) * fill_qty;
        let notional = fill_price * fill_qty;
        let fee = commission(notional, config.commission_bps, config.min_commission);

        order.apply_fill(fill_qty, fill_price, tick.ts)?;
        let snapshot = order.clone();

        // Step 5: position update.
        let realized = state
            .positions
            .entry(snapshot.symbol.clone())
            .or_insert_with(|| SimPosition::flat(snapshot.symbol.clone()))
            .apply_fill(snapshot.side, fill_qty, fill_price);
        state.realized_pnl += realized;

        // Cash: buys pay, sells receive; commission always paid.
        state.cash += snapshot.side.opposite().sign() * notional - fee;
        state.fees_paid += fee;

        let fill = FillRecord {
            id: Uuid::new_v4(),
            order_id,
            run_id: self.run_id,
            ts: tick.ts,
            price: fill_price,
            qty: fill_qty,
            commission: fee,
            slippage: slip,
            bar_index: tick.bar_index,
        };
        state.fills.push(fill.clone());

        self.orders_store.update(&snapshot)?;
        self.fills_store.append(&fill)?;

        let event_type = if snapshot.status == OrderStatus::Filled {
            "orders.Filled"
        } else {
            "orders.PartiallyFilled"
        };
        self.log.append(
            Envelope::event(
                event_type,
                json!({
                    "order_id": order_id.to_string(),
                    "client_order_id": snapshot.client_order_id,
                    "symbol": snapshot.symbol,
                    "side": snapshot.side.as_str(),
                    "filled_qty": snapshot.filled_qty.to_string(),
                    "filled_avg_price": snapshot
                        .filled_avg_price
                        .unwrap_or(Decimal::ZERO)
                        .to_string(),
                    "commission": fee.to_string(),
                    "slippage": slip.to_string(),
                    "bar_index": tick.bar_index,
                }),
            )
            .with_run_id(self.run_id)
            .with_producer(PRODUCER)
            .caused_by(source),
        )?;
        Ok(())
    }

    fn serve_window(&self, payload: &FetchWindowPayload, cause: &Envelope) -> CoreResult<()> {
        let state = self.state.lock();
        let bars: Vec<Bar> = state
            .bars
            .get(&(payload.symbol.clone(), payload.timeframe))
            .map(|series| {
                series
                    .iter()
                    .filter(|bar| bar.ts >= payload.from && bar.ts < payload.to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        drop(state);

        let window = WindowReady {
            symbol: payload.symbol.clone(),
            timeframe: payload.timeframe,
            bars,
        };
        let inline = serde_json::to_value(&window)?;
        let encoded_len = serde_json::to_string(&inline)?.len();

        if encoded_len <= INLINE_WINDOW_BYTES {
            self.log.append(
                Envelope::event("data.WindowReady", inline)
                    .with_run_id(self.run_id)
                    .with_producer(PRODUCER)
                    .caused_by(cause),
            )?;
            return Ok(());
        }

        // Chunked delivery: each chunk stays under the inline cap, with
        // headroom for the chunk envelope fields.
        let per_bar = encoded_len / window.bars.len().max(1);
        let chunk_bars = ((INLINE_WINDOW_BYTES * 9 / 10) / per_bar.max(1)).max(1);
        let mut chunk_count = 0u64;
        for chunk in window.bars.chunks(chunk_bars) {
            self.log.append(
                Envelope::event(
                    "data.WindowChunk",
                    json!({
                        "symbol": window.symbol,
                        "timeframe": window.timeframe.as_str(),
                        "chunk_index": chunk_count,
                        "bars": serde_json::to_value(chunk)?,
                    }),
                )
                .with_run_id(self.run_id)
                .with_producer(PRODUCER)
                .caused_by(cause),
            )?;
            chunk_count += 1;
        }
        self.log.append(
            Envelope::event(
                "data.WindowComplete",
                json!({
                    "symbol": window.symbol,
                    "timeframe": window.timeframe.as_str(),
                    "chunk_count": chunk_count,
                }),
            )
            .with_run_id(self.run_id)
            .with_producer(PRODUCER)
            .caused_by(cause),
        )?;
        Ok(())
    }

    /// Terminal accounting: emit `backtest.Result` and freeze the state.
    pub fn finish(&self) -> CoreResult<BacktestStats> {
        let mut state = self.state.lock();
        if state.finished {
            return Err(CoreError::conflict(format!("simulator for run {} already finished", self.run_id)));
        }
        state.finished = true;

        let final_equity = state.equity.last_equity().unwrap_or(state.cash);
        let initial = self.config.initial_cash;
        let total_return = if initial.is_zero() {
            Decimal::ZERO
        } else {
            (final_equity - initial) / initial
        };
        let stats = BacktestStats {
            initial_cash: initial,
            final_equity,
            total_return,
            realized_pnl: state.realized_pnl,
            fees_paid: state.fees_paid,
            max_drawdown: state.equity.max_drawdown(),
            fill_count: state.fills.len() as u64,
            tick_count: state.tick_count,
        };

        self.log.append(
            Envelope::event(
                "backtest.Result",
                json!({
                    "stats": serde_json::to_value(&stats)?,
                    "equity_curve": serde_json::to_value(state.equity.points())?,
                    "fills": serde_json::to_value(&state.fills)?,
                }),
            )
            .with_run_id(self.run_id)
            .with_producer(PRODUCER),
        )?;

        info!(
            run_id = %self.run_id,
            ticks = stats.tick_count,
            fills = stats.fill_count,
            final_equity = %stats.final_equity,
            "backtest finished"
        );
        Ok(stats)
    }
}

#[async_trait]
impl ExchangeAdapter for SimExchange {
    async fn connect(&self) -> CoreResult<()> {
        Ok(())
    }

    async fn disconnect(&self) -> CoreResult<()> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.state.lock().finished
    }

    async fn submit_order(&self, intent: &OrderIntent) -> CoreResult<SubmitResult> {
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
        let order = self.place(payload, None)?;
        Ok(SubmitResult::accepted(order.id.to_string()))
    }

    async fn cancel_order(&self, exchange_order_id: &str) -> CoreResult<bool> {
        let order_id = Uuid::parse_str(exchange_order_id)
            .map_err(|_| CoreError::validation("bad exchange order id"))?;
        self.cancel(order_id)
    }

    async fn get_order(&self, exchange_order_id: &str) -> CoreResult<Option<ExchangeOrder>> {
        let order_id = Uuid::parse_str(exchange_order_id)
            .map_err(|_| CoreError::validation("bad exchange order id"))?;
        let state = self.state.lock();
        Ok(state.orders.get(&order_id).map(|order| ExchangeOrder {
            exchange_order_id: order.id.to_string(),
            status: order.status,
            filled_qty: order.filled_qty,
            filled_avg_price: order.filled_avg_price,
            updated_at: order.updated_at,
        }))
    }
}
