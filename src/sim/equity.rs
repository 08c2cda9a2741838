//! Equity curve and end-of-run statistics.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One observation, appended once per tick after mark-to-market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub ts: DateTime<Utc>,
    #[serde(with = "rust_decimal::serde::str")]
    pub equity: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EquityCurve {
    points: Vec<EquityPoint>,
}

impl EquityCurve {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, ts: DateTime<Utc>, equity: Decimal) {
        self.points.push(EquityPoint { ts, equity });
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[EquityPoint] {
        &self.points
    }

    pub fn last_equity(&self) -> Option<Decimal> {
        self.points.last().map(|p| p.equity)
    }

    /// Largest peak-to-trough decline observed so far.
    pub fn max_drawdown(&self) -> Decimal {
        let mut peak: Option<Decimal> = None;
        let mut worst = Decimal::ZERO;
        for point in &self.points {
            let peak_value = match peak {
                Some(p) if p >= point.equity => p,
                _ => {
                    peak = Some(point.equity);
                    point.equity
                }
            };
            let drawdown = peak_value - point.equity;
            if drawdown > worst {
                worst = drawdown;
            }
        }
        worst
    }
}

/// Summary emitted with `backtest.Result`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestStats {
    #[serde(with = "rust_decimal::serde::str")]
    pub initial_cash: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub final_equity: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_return: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub realized_pnl: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub fees_paid: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub max_drawdown: Decimal,
    pub fill_count: u64,
    pub tick_count: u64,
}
