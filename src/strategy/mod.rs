//! Strategy harness.
//!
//! Strategies are capabilities, not classes: the runner consumes only
//! `initialize/on_tick/on_data`. Strategies are pure from the runner's
//! perspective; they return intents and never touch the event log or an
//! adapter directly.

pub mod builtin;
pub mod registry;

use crate::clock::{Tick, Timeframe};
use crate::models::{Bar, OrderSide, OrderType, TimeInForce};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Historical bar window delivered back to a strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowReady {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub bars: Vec<Bar>,
}

/// Intent returned by a strategy callback.
#[derive(Debug, Clone)]
pub enum Action {
    FetchWindow {
        symbol: String,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
    PlaceOrder {
        /// Idempotency key; generated by the runner when absent.
        client_order_id: Option<String>,
        symbol: String,
        side: OrderSide,
        order_type: OrderType,
        qty: Decimal,
        limit_price: Option<Decimal>,
        stop_price: Option<Decimal>,
        time_in_force: TimeInForce,
        extended_hours: bool,
    },
}

impl Action {
    /// Market order helper used by most built-in strategies.
    pub fn market(symbol: impl Into<String>, side: OrderSide, qty: Decimal) -> Self {
        Action::PlaceOrder {
            client_order_id: None,
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            qty,
            limit_price: None,
            stop_price: None,
            time_in_force: TimeInForce::Gtc,
            extended_hours: false,
        }
    }
}

/// The polymorphic capability the runner consumes.
pub trait Strategy: Send {
    fn initialize(&mut self, symbols: &[String]);
    fn on_tick(&mut self, tick: &Tick) -> Vec<Action>;
    fn on_data(&mut self, window: &WindowReady) -> Vec<Action>;
}

/// Wire payload of `strategy.FetchWindow` (and its routed rewrites).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchWindowPayload {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// Wire payload of `strategy.PlaceRequest` / `live.PlaceOrder` /
/// `backtest.PlaceOrder`. Decimal fields travel as strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceRequestPayload {
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    #[serde(with = "rust_decimal::serde::str")]
    pub qty: Decimal,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub limit_price: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub stop_price: Option<Decimal>,
    pub time_in_force: TimeInForce,
    #[serde(default)]
    pub extended_hours: bool,
}
