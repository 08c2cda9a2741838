//! Built-in strategies.
//!
//! `hold` never trades and exists for smoke tests. `scheduled` places
//! market orders at configured bar indices, which is enough to exercise the
//! whole order path deterministically. `window_probe` requests a bar window
//! on its first tick and buys when the window arrives.

use crate::clock::Tick;
use crate::models::OrderSide;
use crate::strategy::{Action, Strategy, WindowReady};
use rust_decimal::Decimal;
use serde::Deserialize;

/// Never trades.
#[derive(Debug, Default)]
pub struct HoldStrategy;

impl Strategy for HoldStrategy {
    fn initialize(&mut self, _symbols: &[String]) {}

    fn on_tick(&mut self, _tick: &Tick) -> Vec<Action> {
        Vec::new()
    }

    fn on_data(&mut self, _window: &WindowReady) -> Vec<Action> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduledOrder {
    pub bar_index: u64,
    pub side: OrderSide,
    #[serde(with = "rust_decimal::serde::str")]
    pub qty: Decimal,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduledConfig {
    #[serde(default)]
    pub orders: Vec<ScheduledOrder>,
}

/// Places market orders at fixed bar indices on the first symbol.
#[derive(Debug)]
pub struct ScheduledStrategy {
    config: ScheduledConfig,
    symbol: Option<String>,
}

impl ScheduledStrategy {
    pub fn new(config: ScheduledConfig) -> Self {
        Self { config, symbol: None }
    }
}

impl Strategy for ScheduledStrategy {
    fn initialize(&mut self, symbols: &[String]) {
        self.symbol = symbols.first().cloned();
    }

    fn on_tick(&mut self, tick: &Tick) -> Vec<Action> {
        let Some(symbol) = self.symbol.clone() else {
            return Vec::new();
        };
        self.config
            .orders
            .iter()
            .filter(|order| order.bar_index == tick.bar_index)
            .map(|order| Action::market(symbol.clone(), order.side, order.qty))
            .collect()
    }

    fn on_data(&mut self, _window: &WindowReady) -> Vec<Action> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindowProbeConfig {
    #[serde(default = "WindowProbeConfig::default_lookback")]
    pub lookback_bars: i64,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub buy_qty: Option<Decimal>,
}

impl WindowProbeConfig {
    fn default_lookback() -> i64 {
        10
    }
}

impl Default for WindowProbeConfig {
    fn default() -> Self {
        Self {
            lookback_bars: Self::default_lookback(),
            buy_qty: None,
        }
    }
}

/// Requests a lookback window on the first tick; optionally buys once the
/// window arrives.
#[derive(Debug)]
pub struct WindowProbeStrategy {
    config: WindowProbeConfig,
    symbol: Option<String>,
    requested: bool,
}

impl WindowProbeStrategy {
    pub fn new(config: WindowProbeConfig) -> Self {
        Self {
            config,
            symbol: None,
            requested: false,
        }
    }
}

impl Strategy for WindowProbeStrategy {
    fn initialize(&mut self, symbols: &[String]) {
        self.symbol = symbols.first().cloned();
    }

    fn on_tick(&mut self, tick: &Tick) -> Vec<Action> {
        // Wait until a full lookback of history exists behind the cursor.
        if self.requested || tick.bar_index < self.config.lookback_bars as u64 {
            return Vec::new();
        }
        let Some(symbol) = self.symbol.clone() else {
            return Vec::new();
        };
        self.requested = true;
        let lookback = tick.timeframe.duration() * self.config.lookback_bars as i32;
        vec![Action::FetchWindow {
            symbol,
            timeframe: tick.timeframe,
            from: tick.ts - lookback,
            to: tick.ts,
        }]
    }

    fn on_data(&mut self, window: &WindowReady) -> Vec<Action> {
        match (self.config.buy_qty, window.bars.is_empty()) {
            (Some(qty), false) => vec![Action::market(window.symbol.clone(), OrderSide::Buy, qty)],
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Timeframe;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn tick(bar_index: u64) -> Tick {
        Tick {
            id: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            ts: "2026-01-01T00:00:00Z".parse().unwrap(),
            bar_index,
            timeframe: Timeframe::M1,
            is_backtest: true,
        }
    }

    #[test]
    fn test_scheduled_fires_only_on_matching_bar() {
        let config = ScheduledConfig {
            orders: vec![
                ScheduledOrder { bar_index: 2, side: OrderSide::Buy, qty: dec!(1) },
                ScheduledOrder { bar_index: 5, side: OrderSide::Sell, qty: dec!(1) },
            ],
        };
        let mut strategy = ScheduledStrategy::new(config);
        strategy.initialize(&["BTC".to_string()]);

        assert!(strategy.on_tick(&tick(0)).is_empty());
        let actions = strategy.on_tick(&tick(2));
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            &actions[0],
            Action::PlaceOrder { side: OrderSide::Buy, .. }
        ));
        assert_eq!(strategy.on_tick(&tick(5)).len(), 1);
    }

    #[test]
    fn test_window_probe_requests_once_after_lookback() {
        let mut strategy = WindowProbeStrategy::new(WindowProbeConfig::default());
        strategy.initialize(&["ETH".to_string()]);

        // Default lookback is 10 bars; nothing to fetch before that.
        assert!(strategy.on_tick(&tick(0)).is_empty());
        assert!(strategy.on_tick(&tick(9)).is_empty());
        let first = strategy.on_tick(&tick(10));
        assert!(matches!(&first[0], Action::FetchWindow { .. }));
        assert!(strategy.on_tick(&tick(11)).is_empty());
    }
}
