//! Backtest simulation engine.
//!
//! Deterministic fill, position, and equity accounting driven by historical
//! bars and clock ticks. One `SimExchange` per backtest run; all state is
//! discarded at run teardown.

pub mod engine;
pub mod equity;
pub mod fills;
pub mod position;
#[cfg(test)]
mod engine_tests;

pub use engine::SimExchange;
pub use equity::{BacktestStats, EquityCurve, EquityPoint};
pub use position::SimPosition;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which bar price a market (or triggered stop) order fills at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FillReference {
    #[default]
    Open,
    Close,
    /// Typical price (high + low + close) / 3.
    Vwap,
    /// High for buys, low for sells.
    Worst,
}

/// Per-run simulation knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillSimulationConfig {
    #[serde(default)]
    pub fill_reference: FillReference,
    #[serde(default)]
    pub slippage_bps: u32,
    #[serde(default)]
    pub commission_bps: u32,
    #[serde(default, with = "rust_decimal::serde::str")]
    pub min_commission: Decimal,
    #[serde(default = "FillSimulationConfig::default_initial_cash", with = "rust_decimal::serde::str")]
    pub initial_cash: Decimal,
}

impl FillSimulationConfig {
    fn default_initial_cash() -> Decimal {
        Decimal::from(100_000)
    }
}

impl Default for FillSimulationConfig {
    fn default() -> Self {
        Self {
            fill_reference: FillReference::Open,
            slippage_bps: 0,
            commission_bps: 0,
            min_commission: Decimal::ZERO,
            initial_cash: Self::default_initial_cash(),
        }
    }
}
