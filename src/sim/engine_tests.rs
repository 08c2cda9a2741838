//! Simulator integration tests: placement, fills, accounting, windows.

use crate::bus::{EventFilter, EventLog, MemoryEventLog};
use crate::clock::{Tick, Timeframe};
use crate::models::{Bar, OrderSide, OrderType, TimeInForce};
use crate::sim::engine::SimExchange;
use crate::sim::{FillReference, FillSimulationConfig};
use crate::store::{Database, FillStore, OrderStore};
use crate::strategy::PlaceRequestPayload;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use uuid::Uuid;

struct Harness {
    log: Arc<dyn EventLog>,
    sim: Arc<SimExchange>,
    run_id: Uuid,
}

fn harness(config: FillSimulationConfig) -> Harness {
    let log: Arc<dyn EventLog> = Arc::new(MemoryEventLog::with_defaults());
    let db = Database::open_in_memory().unwrap();
    let run_id = Uuid::new_v4();
    let sim = SimExchange::new(
        run_id,
        Timeframe::M1,
        config,
        log.clone(),
        Arc::new(OrderStore::new(db.clone())),
        Arc::new(FillStore::new(db)),
    );
    Harness { log, sim, run_id }
}

fn ts(minute: u32) -> DateTime<Utc> {
    format!("2026-01-01T00:{minute:02}:00Z").parse().unwrap()
}

fn bar(minute: u32, open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Bar {
    Bar {
        symbol: "BTC".to_string(),
        timeframe: Timeframe::M1,
        ts: ts(minute),
        open,
        high,
        low,
        close,
        volume: dec!(100),
    }
}

fn flat_bars(count: u32, price: Decimal) -> Vec<Bar> {
    (0..count).map(|m| bar(m, price, price, price, price)).collect()
}

fn tick(run_id: Uuid, minute: u32, bar_index: u64) -> Tick {
    Tick {
        id: Uuid::new_v4(),
        run_id,
        ts: ts(minute),
        bar_index,
        timeframe: Timeframe::M1,
        is_backtest: true,
    }
}

fn market_payload(key: &str, side: OrderSide, qty: Decimal) -> PlaceRequestPayload {
    PlaceRequestPayload {
        client_order_id: key.to_string(),
        symbol: "BTC".to_string(),
        side,
        order_type: OrderType::Market,
        qty,
        limit_price: None,
        stop_price: None,
        time_in_force: TimeInForce::Gtc,
        extended_hours: false,
    }
}

fn limit_payload(key: &str, side: OrderSide, qty: Decimal, limit: Decimal) -> PlaceRequestPayload {
    PlaceRequestPayload {
        client_order_id: key.to_string(),
        symbol: "BTC".to_string(),
        side,
        order_type: OrderType::Limit,
        qty,
        limit_price: Some(limit),
        stop_price: None,
        time_in_force: TimeInForce::Gtc,
        extended_hours: false,
    }
}

#[test]
fn test_place_emits_created_once() {
    let h = harness(FillSimulationConfig::default());
    let first = h.sim.place(market_payload("k-1", OrderSide::Buy, dec!(1)), None).unwrap();
    let second = h.sim.place(market_payload("k-1", OrderSide::Buy, dec!(1)), None).unwrap();
    assert_eq!(first.id, second.id);

    let created = h
        .log
        .read(0, 100, Some(&EventFilter::for_types(["orders.Created"])))
        .unwrap();
    assert_eq!(created.len(), 1);
}

#[test]
fn test_market_order_fills_at_open_reference() {
    let h = harness(FillSimulationConfig::default());
    h.sim.preload_bars("BTC", flat_bars(3, dec!(100)));

    h.sim.place(market_payload("k-1", OrderSide::Buy, dec!(1)), None).unwrap();
    h.sim.advance_to(&tick(h.run_id, 0, 0)).unwrap();

    let fills = h
        .log
        .read(0, 100, Some(&EventFilter::for_types(["orders.Filled"])))
        .unwrap();
    assert_eq!(fills.len(), 1);
    let payload = &fills[0].envelope.payload;
    assert_eq!(payload["filled_qty"], serde_json::json!("1"));
    assert_eq!(payload["filled_avg_price"], serde_json::json!("100"));
    assert_eq!(payload["bar_index"], serde_json::json!(0));
}

#[test]
fn test_limit_buy_fill_price_is_min_of_limit_and_open() {
    // Bar low=49, open=48, high=51, close=50 with limit 50: fills at 48.
    let h = harness(FillSimulationConfig::default());
    h.sim.preload_bars("BTC", vec![bar(0, dec!(48), dec!(51), dec!(49), dec!(50))]);

    h.sim.place(limit_payload("k-1", OrderSide::Buy, dec!(10), dec!(50)), None).unwrap();
    h.sim.advance_to(&tick(h.run_id, 0, 0)).unwrap();

    let fills = h
        .log
        .read(0, 100, Some(&EventFilter::for_types(["orders.Filled"])))
        .unwrap();
    assert_eq!(fills.len(), 1);
    assert_eq!(fills[0].envelope.payload["filled_avg_price"], serde_json::json!("48"));
    assert_eq!(fills[0].envelope.payload["filled_qty"], serde_json::json!("10"));
}

#[test]
fn test_limit_buy_waits_for_touch() {
    let h = harness(FillSimulationConfig::default());
    h.sim.preload_bars(
        "BTC",
        vec![
            bar(0, dec!(60), dec!(61), dec!(55), dec!(56)),
            bar(1, dec!(52), dec!(53), dec!(49), dec!(50)),
        ],
    );
    h.sim.place(limit_payload("k-1", OrderSide::Buy, dec!(1), dec!(50)), None).unwrap();

    h.sim.advance_to(&tick(h.run_id, 0, 0)).unwrap();
    assert!(h
        .log
        .read(0, 100, Some(&EventFilter::for_types(["orders.Filled"])))
        .unwrap()
        .is_empty());

    h.sim.advance_to(&tick(h.run_id, 1, 1)).unwrap();
    let fills = h
        .log
        .read(0, 100, Some(&EventFilter::for_types(["orders.Filled"])))
        .unwrap();
    assert_eq!(fills.len(), 1);
    // min(limit=50, open=52) = 50.
    assert_eq!(fills[0].envelope.payload["filled_avg_price"], serde_json::json!("50"));
}

#[test]
fn test_slippage_and_commission_accounting() {
    let config = FillSimulationConfig {
        fill_reference: FillReference::Open,
        slippage_bps: 100, // 1%
        commission_bps: 10,
        min_commission: dec!(1),
        initial_cash: dec!(1000),
    };
    let h = harness(config);
    h.sim.preload_bars("BTC", flat_bars(1, dec!(100)));

    h.sim.place(market_payload("k-1", OrderSide::Buy, dec!(1)), None).unwrap();
    h.sim.advance_to(&tick(h.run_id, 0, 0)).unwrap();

    let fills = h
        .log
        .read(0, 100, Some(&EventFilter::for_types(["orders.Filled"])))
        .unwrap();
    let payload = &fills[0].envelope.payload;
    let price: Decimal = payload["filled_avg_price"].as_str().unwrap().parse().unwrap();
    let fee: Decimal = payload["commission"].as_str().unwrap().parse().unwrap();
    let slip: Decimal = payload["slippage"].as_str().unwrap().parse().unwrap();
    // Buy pays 100 * 1.01 = 101; commission max(1, 101 * 0.001) = 1.
    assert_eq!(price, dec!(101));
    assert_eq!(fee, dec!(1));
    assert_eq!(slip, dec!(1));

    let stats = h.sim.finish().unwrap();
    // Cash 1000 - 101 - 1 = 898; position marked at close 100.
    assert_eq!(stats.final_equity, dec!(998));
    assert_eq!(stats.fees_paid, dec!(1));
}

#[test]
fn test_round_trip_realized_pnl_zero_on_flat_bars() {
    let h = harness(FillSimulationConfig::default());
    h.sim.preload_bars("BTC", flat_bars(10, dec!(100)));

    h.sim.place(market_payload("buy", OrderSide::Buy, dec!(1)), None).unwrap();
    for minute in 0..10u32 {
        if minute == 5 {
            h.sim.place(market_payload("sell", OrderSide::Sell, dec!(1)), None).unwrap();
        }
        h.sim.advance_to(&tick(h.run_id, minute, minute as u64)).unwrap();
    }

    let stats = h.sim.finish().unwrap();
    assert_eq!(stats.realized_pnl, dec!(0));
    assert_eq!(stats.fill_count, 2);
    assert_eq!(stats.tick_count, 10);
    assert_eq!(stats.final_equity, stats.initial_cash);
    assert_eq!(h.sim.equity_len(), 10);
}

#[test]
fn test_pending_orders_fill_in_placement_order() {
    let h = harness(FillSimulationConfig::default());
    h.sim.preload_bars("BTC", flat_bars(1, dec!(100)));

    h.sim.place(market_payload("first", OrderSide::Buy, dec!(1)), None).unwrap();
    h.sim.place(market_payload("second", OrderSide::Buy, dec!(1)), None).unwrap();
    h.sim.advance_to(&tick(h.run_id, 0, 0)).unwrap();

    let fills = h
        .log
        .read(0, 100, Some(&EventFilter::for_types(["orders.Filled"])))
        .unwrap();
    let keys: Vec<&str> = fills
        .iter()
        .map(|entry| entry.envelope.payload["client_order_id"].as_str().unwrap())
        .collect();
    assert_eq!(keys, vec!["first", "second"]);
}

#[test]
fn test_cancel_pending_order() {
    let h = harness(FillSimulationConfig::default());
    h.sim.preload_bars("BTC", flat_bars(2, dec!(100)));

    let order = h
        .sim
        .place(limit_payload("k-1", OrderSide::Buy, dec!(1), dec!(1)), None)
        .unwrap();
    assert!(h.sim.cancel(order.id).unwrap());
    assert!(!h.sim.cancel(order.id).unwrap());

    h.sim.advance_to(&tick(h.run_id, 0, 0)).unwrap();
    assert!(h
        .log
        .read(0, 100, Some(&EventFilter::for_types(["orders.Filled"])))
        .unwrap()
        .is_empty());
    let cancelled = h
        .log
        .read(0, 100, Some(&EventFilter::for_types(["orders.Cancelled"])))
        .unwrap();
    assert_eq!(cancelled.len(), 1);
}

#[test]
fn test_stop_buy_becomes_market_on_trigger() {
    let h = harness(FillSimulationConfig::default());
    h.sim.preload_bars(
        "BTC",
        vec![
            bar(0, dec!(48), dec!(49), dec!(47), dec!(48)),
            bar(1, dec!(49), dec!(51), dec!(48), dec!(50)),
        ],
    );
    let payload = PlaceRequestPayload {
        client_order_id: "stop-1".to_string(),
        symbol: "BTC".to_string(),
        side: OrderSide::Buy,
        order_type: OrderType::Stop,
        qty: dec!(1),
        limit_price: None,
        stop_price: Some(dec!(50)),
        time_in_force: TimeInForce::Gtc,
        extended_hours: false,
    };
    h.sim.place(payload, None).unwrap();

    h.sim.advance_to(&tick(h.run_id, 0, 0)).unwrap();
    assert!(h
        .log
        .read(0, 100, Some(&EventFilter::for_types(["orders.Filled"])))
        .unwrap()
        .is_empty());

    h.sim.advance_to(&tick(h.run_id, 1, 1)).unwrap();
    let fills = h
        .log
        .read(0, 100, Some(&EventFilter::for_types(["orders.Filled"])))
        .unwrap();
    assert_eq!(fills.len(), 1);
    // Triggered on bar 1, fills at that bar's open.
    assert_eq!(fills[0].envelope.payload["filled_avg_price"], serde_json::json!("49"));
}

#[test]
fn test_window_served_inline() {
    let h = harness(FillSimulationConfig::default());
    h.sim.preload_bars("BTC", flat_bars(5, dec!(100)));

    let request = crate::bus::Envelope::event(
        "backtest.FetchWindow",
        serde_json::json!({
            "symbol": "BTC",
            "timeframe": "1m",
            "from": ts(0).to_rfc3339(),
            "to": ts(3).to_rfc3339(),
        }),
    )
    .with_run_id(h.run_id)
    .with_producer("marvin.router");
    h.sim.handle_command(&request);

    let ready = h
        .log
        .read(0, 100, Some(&EventFilter::for_types(["data.WindowReady"])))
        .unwrap();
    assert_eq!(ready.len(), 1);
    let envelope = &ready[0].envelope;
    assert_eq!(envelope.causation_id, Some(request.id));
    assert_eq!(envelope.payload["bars"].as_array().unwrap().len(), 3);
}

#[test]
fn test_large_window_is_chunked() {
    let h = harness(FillSimulationConfig::default());
    // ~160 bytes per serialized bar; 2000 bars comfortably exceed 100 KB.
    let series: Vec<Bar> = (0..2000i64)
        .map(|i| {
            let mut b = bar(0, dec!(100), dec!(101), dec!(99), dec!(100));
            b.ts = ts(0) + chrono::Duration::minutes(i);
            b
        })
        .collect();
    h.sim.preload_bars("BTC", series);

    let request = crate::bus::Envelope::event(
        "backtest.FetchWindow",
        serde_json::json!({
            "symbol": "BTC",
            "timeframe": "1m",
            "from": ts(0).to_rfc3339(),
            "to": (ts(0) + chrono::Duration::minutes(2000)).to_rfc3339(),
        }),
    )
    .with_run_id(h.run_id)
    .with_producer("marvin.router");
    h.sim.handle_command(&request);

    let chunks = h
        .log
        .read(0, 1000, Some(&EventFilter::for_types(["data.WindowChunk"])))
        .unwrap();
    assert!(chunks.len() > 1);
    let complete = h
        .log
        .read(0, 1000, Some(&EventFilter::for_types(["data.WindowComplete"])))
        .unwrap();
    assert_eq!(complete.len(), 1);
    assert_eq!(
        complete[0].envelope.payload["chunk_count"],
        serde_json::json!(chunks.len())
    );
    assert!(h
        .log
        .read(0, 1000, Some(&EventFilter::for_types(["data.WindowReady"])))
        .unwrap()
        .is_empty());

    // Every chunk serializes under the inline ceiling.
    for chunk in &chunks {
        assert!(serde_json::to_string(&chunk.envelope.payload).unwrap().len() <= 100 * 1024);
    }
}

#[test]
fn test_zero_bar_run_has_no_curve() {
    let h = harness(FillSimulationConfig::default());
    assert!(!h.sim.has_bars());
    let stats = h.sim.finish().unwrap();
    assert_eq!(stats.tick_count, 0);
    assert_eq!(stats.fill_count, 0);
    assert_eq!(stats.final_equity, stats.initial_cash);

    let result = h
        .log
        .read(0, 10, Some(&EventFilter::for_types(["backtest.Result"])))
        .unwrap();
    assert_eq!(result.len(), 1);
    assert!(result[0].envelope.payload["equity_curve"].as_array().unwrap().is_empty());
}

#[test]
fn test_finish_twice_is_conflict() {
    let h = harness(FillSimulationConfig::default());
    h.sim.finish().unwrap();
    assert!(h.sim.finish().is_err());
}
