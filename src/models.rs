//! Core domain types: runs, orders, bars.
//!
//! All money and quantity fields are `rust_decimal::Decimal` and serialize
//! as strings on every wire and storage boundary.

use crate::clock::timeframe::Timeframe;
use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Execution mode of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Live,
    Paper,
    Backtest,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Live => "live",
            RunMode::Paper => "paper",
            RunMode::Backtest => "backtest",
        }
    }

    pub fn is_backtest(&self) -> bool {
        matches!(self, RunMode::Backtest)
    }
}

impl std::str::FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" => Ok(RunMode::Live),
            "paper" => Ok(RunMode::Paper),
            "backtest" => Ok(RunMode::Backtest),
            other => Err(format!("unknown run mode: {other}")),
        }
    }
}

/// Run lifecycle state. Terminal states are sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Stopped,
    Completed,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Stopped => "stopped",
            RunStatus::Completed => "completed",
            RunStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Stopped | RunStatus::Completed | RunStatus::Error)
    }

    /// Legal transitions: pending -> running -> {stopped|completed|error}.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        match (self, next) {
            (RunStatus::Pending, RunStatus::Running) => true,
            (RunStatus::Pending, RunStatus::Error) => true,
            (RunStatus::Running, RunStatus::Stopped)
            | (RunStatus::Running, RunStatus::Completed)
            | (RunStatus::Running, RunStatus::Error) => true,
            _ => false,
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "stopped" => Ok(RunStatus::Stopped),
            "completed" => Ok(RunStatus::Completed),
            "error" => Ok(RunStatus::Error),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// One strategy execution in one mode with one clock and one
/// adapter-or-simulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub strategy_id: String,
    pub mode: RunMode,
    pub status: RunStatus,
    pub symbols: Vec<String>,
    pub timeframe: Timeframe,
    #[serde(default)]
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub backtest_start: Option<DateTime<Utc>>,
    pub backtest_end: Option<DateTime<Utc>>,
}

/// Run creation request body.
#[derive(Debug, Clone, Deserialize)]
pub struct RunCreate {
    pub strategy_id: String,
    pub mode: RunMode,
    pub symbols: Vec<String>,
    pub timeframe: Timeframe,
    #[serde(default)]
    pub config: serde_json::Value,
    pub backtest_start: Option<DateTime<Utc>>,
    pub backtest_end: Option<DateTime<Utc>>,
}

impl RunCreate {
    /// Validate and turn into a pending `Run`.
    pub fn into_run(self) -> CoreResult<Run> {
        if self.strategy_id.trim().is_empty() {
            return Err(CoreError::validation("strategy_id must not be empty"));
        }
        if self.symbols.is_empty() {
            return Err(CoreError::validation("symbols must not be empty"));
        }
        if self.mode.is_backtest() {
            match (self.backtest_start, self.backtest_end) {
                (Some(start), Some(end)) if start < end => {}
                (Some(_), Some(_)) => {
                    return Err(CoreError::validation("backtest_start must precede backtest_end"))
                }
                _ => {
                    return Err(CoreError::validation(
                        "backtest runs require backtest_start and backtest_end",
                    ))
                }
            }
        }
        Ok(Run {
            id: Uuid::new_v4(),
            strategy_id: self.strategy_id,
            mode: self.mode,
            status: RunStatus::Pending,
            symbols: self.symbols,
            timeframe: self.timeframe,
            config: self.config,
            created_at: Utc::now(),
            started_at: None,
            stopped_at: None,
            backtest_start: self.backtest_start,
            backtest_end: self.backtest_end,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// +1 for buys, -1 for sells.
    pub fn sign(&self) -> Decimal {
        match self {
            OrderSide::Buy => Decimal::ONE,
            OrderSide::Sell => -Decimal::ONE,
        }
    }
}

impl std::str::FromStr for OrderSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(OrderSide::Buy),
            "sell" => Ok(OrderSide::Sell),
            other => Err(format!("unknown order side: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
            OrderType::Stop => "stop",
            OrderType::StopLimit => "stop_limit",
        }
    }
}

impl std::str::FromStr for OrderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "market" => Ok(OrderType::Market),
            "limit" => Ok(OrderType::Limit),
            "stop" => Ok(OrderType::Stop),
            "stop_limit" => Ok(OrderType::StopLimit),
            other => Err(format!("unknown order type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeInForce {
    Day,
    Gtc,
    Ioc,
    Fok,
}

impl Default for TimeInForce {
    fn default() -> Self {
        TimeInForce::Gtc
    }
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::Day => "day",
            TimeInForce::Gtc => "gtc",
            TimeInForce::Ioc => "ioc",
            TimeInForce::Fok => "fok",
        }
    }
}

impl std::str::FromStr for TimeInForce {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(TimeInForce::Day),
            "gtc" => Ok(TimeInForce::Gtc),
            "ioc" => Ok(TimeInForce::Ioc),
            "fok" => Ok(TimeInForce::Fok),
            other => Err(format!("unknown time in force: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Accepted,
    Partial,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Accepted => "accepted",
            OrderStatus::Partial => "partial",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "accepted" => Ok(OrderStatus::Accepted),
            "partial" => Ok(OrderStatus::Partial),
            "filled" => Ok(OrderStatus::Filled),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "rejected" => Ok(OrderStatus::Rejected),
            "expired" => Ok(OrderStatus::Expired),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

/// Order submission request as it arrives from a strategy or the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    pub run_id: Uuid,
    /// Idempotency key, unique per run. Generated when absent.
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    #[serde(with = "rust_decimal::serde::str")]
    pub qty: Decimal,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub limit_price: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub stop_price: Option<Decimal>,
    #[serde(default)]
    pub time_in_force: TimeInForce,
    #[serde(default)]
    pub extended_hours: bool,
}

impl OrderIntent {
    pub fn validate(&self) -> CoreResult<()> {
        if self.qty <= Decimal::ZERO {
            return Err(CoreError::validation("qty must be positive"));
        }
        match self.order_type {
            OrderType::Limit if self.limit_price.is_none() => {
                Err(CoreError::validation("limit orders require limit_price"))
            }
            OrderType::Stop if self.stop_price.is_none() => {
                Err(CoreError::validation("stop orders require stop_price"))
            }
            OrderType::StopLimit if self.limit_price.is_none() || self.stop_price.is_none() => {
                Err(CoreError::validation("stop_limit orders require limit_price and stop_price"))
            }
            _ => Ok(()),
        }
    }
}

/// Full order state as tracked by the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: Uuid,
    pub run_id: Uuid,
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
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
    #[serde(with = "rust_decimal::serde::str")]
    pub filled_qty: Decimal,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub filled_avg_price: Option<Decimal>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderRecord {
    pub fn from_intent(intent: &OrderIntent, client_order_id: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id: intent.run_id,
            client_order_id,
            exchange_order_id: None,
            symbol: intent.symbol.clone(),
            side: intent.side,
            order_type: intent.order_type,
            qty: intent.qty,
            limit_price: intent.limit_price,
            stop_price: intent.stop_price,
            time_in_force: intent.time_in_force,
            filled_qty: Decimal::ZERO,
            filled_avg_price: None,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn remaining_qty(&self) -> Decimal {
        self.qty - self.filled_qty
    }

    /// Apply an execution. filled_qty stays monotone and never exceeds qty;
    /// the average price is fill-weighted.
    pub fn apply_fill(
        &mut self,
        fill_qty: Decimal,
        fill_price: Decimal,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        if self.status.is_terminal() {
            return Err(CoreError::conflict(format!(
                "order {} is terminal ({})",
                self.id,
                self.status.as_str()
            )));
        }
        if fill_qty <= Decimal::ZERO || fill_qty > self.remaining_qty() {
            return Err(CoreError::validation(format!(
                "fill qty {fill_qty} out of range for order {}",
                self.id
            )));
        }

        let prior_notional = self.filled_avg_price.unwrap_or(Decimal::ZERO) * self.filled_qty;
        self.filled_qty += fill_qty;
        self.filled_avg_price = Some((prior_notional + fill_price * fill_qty) / self.filled_qty);
        self.status = if self.filled_qty == self.qty {
            OrderStatus::Filled
        } else {
            OrderStatus::Partial
        };
        self.updated_at = now;
        Ok(())
    }
}

/// Immutable record of one execution against an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillRecord {
    pub id: Uuid,
    pub order_id: Uuid,
    pub run_id: Uuid,
    pub ts: DateTime<Utc>,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub commission: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub slippage: Decimal,
    pub bar_index: u64,
}

/// Immutable OHLCV bar keyed by (symbol, timeframe, ts). `ts` is bar-start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub ts: DateTime<Utc>,
    #[serde(with = "rust_decimal::serde::str")]
    pub open: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub high: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub low: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub close: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub volume: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn market_intent(qty: Decimal) -> OrderIntent {
        OrderIntent {
            run_id: Uuid::new_v4(),
            client_order_id: Some("k-1".to_string()),
            symbol: "BTC".to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            qty,
            limit_price: None,
            stop_price: None,
            time_in_force: TimeInForce::Gtc,
            extended_hours: false,
        }
    }

    #[test]
    fn test_run_status_transitions() {
        assert!(RunStatus::Pending.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Completed));
        assert!(!RunStatus::Stopped.can_transition_to(RunStatus::Running));
        assert!(!RunStatus::Completed.can_transition_to(RunStatus::Error));
        assert!(!RunStatus::Pending.can_transition_to(RunStatus::Stopped));
    }

    #[test]
    fn test_backtest_create_requires_range() {
        let create = RunCreate {
            strategy_id: "hold".to_string(),
            mode: RunMode::Backtest,
            symbols: vec!["BTC".to_string()],
            timeframe: Timeframe::M1,
            config: serde_json::Value::Null,
            backtest_start: None,
            backtest_end: None,
        };
        assert!(matches!(create.into_run(), Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_order_fill_accumulates_weighted_average() {
        let intent = market_intent(dec!(10));
        let mut order = OrderRecord::from_intent(&intent, "k-1".to_string(), Utc::now());

        order.apply_fill(dec!(4), dec!(100), Utc::now()).unwrap();
        assert_eq!(order.status, OrderStatus::Partial);
        assert_eq!(order.filled_avg_price, Some(dec!(100)));

        order.apply_fill(dec!(6), dec!(110), Utc::now()).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_qty, dec!(10));
        assert_eq!(order.filled_avg_price, Some(dec!(106)));
    }

    #[test]
    fn test_order_fill_cannot_exceed_qty() {
        let intent = market_intent(dec!(1));
        let mut order = OrderRecord::from_intent(&intent, "k-1".to_string(), Utc::now());
        assert!(order.apply_fill(dec!(2), dec!(100), Utc::now()).is_err());
    }

    #[test]
    fn test_decimal_fields_serialize_as_strings() {
        let intent = market_intent(dec!(1.5));
        let json = serde_json::to_value(&intent).unwrap();
        assert_eq!(json["qty"], serde_json::json!("1.5"));

        let back: OrderIntent = serde_json::from_value(json).unwrap();
        assert_eq!(back.qty, dec!(1.5));
    }
}
