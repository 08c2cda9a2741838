//! Simulated position accounting.
//!
//! `qty > 0` long, `< 0` short, `= 0` flat. Same-side adds recompute the
//! weighted average entry; reductions realize PnL against the preserved
//! basis; a sign flip closes the whole position first and opens the
//! remainder at the fill price.

use crate::models::OrderSide;
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimPosition {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub avg_entry_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub realized_pnl: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub unrealized_pnl: Decimal,
}

impl SimPosition {
    pub fn flat(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            qty: Decimal::ZERO,
            avg_entry_price: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.qty.is_zero()
    }

    /// Apply one fill. Returns the PnL realized by this fill.
    pub fn apply_fill(&mut self, side: OrderSide, qty: Decimal, price: Decimal) -> Decimal {
        let signed = side.sign() * qty;
        let old_qty = self.qty;
        let new_qty = old_qty + signed;

        // Opening or adding on the same side.
        if old_qty.is_zero() || old_qty.signum() == signed.signum() {
            let notional = self.avg_entry_price * old_qty.abs() + price * qty;
            self.qty = new_qty;
            self.avg_entry_price = notional / new_qty.abs();
            return Decimal::ZERO;
        }

        let closing = qty.min(old_qty.abs());
        // Long closes realize (fill - entry); short closes the inverse.
        let realized = if old_qty > Decimal::ZERO {
            (price - self.avg_entry_price) * closing
        } else {
            (self.avg_entry_price - price) * closing
        };
        self.realized_pnl += realized;

        if new_qty.is_zero() {
            self.qty = Decimal::ZERO;
            self.avg_entry_price = Decimal::ZERO;
        } else if new_qty.signum() == old_qty.signum() {
            // Partial reduction: basis preserved.
            self.qty = new_qty;
        } else {
            // Sign flip: the remainder opens a fresh position at the fill.
            self.qty = new_qty;
            self.avg_entry_price = price;
        }
        realized
    }

    /// Mark to a close price; recomputes unrealized PnL.
    pub fn mark(&mut self, close: Decimal) {
        self.unrealized_pnl = if self.is_flat() {
            Decimal::ZERO
        } else {
            (close - self.avg_entry_price) * self.qty
        };
    }

    /// Signed market value at a close price.
    pub fn market_value(&self, close: Decimal) -> Decimal {
        self.qty * close
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_same_side_add_weighted_average() {
        let mut pos = SimPosition::flat("BTC");
        assert_eq!(pos.apply_fill(OrderSide::Buy, dec!(1), dec!(100)), dec!(0));
        assert_eq!(pos.apply_fill(OrderSide::Buy, dec!(3), dec!(110)), dec!(0));
        assert_eq!(pos.qty, dec!(4));
        assert_eq!(pos.avg_entry_price, dec!(107.5));
    }

    #[test]
    fn test_reduction_realizes_and_preserves_basis() {
        let mut pos = SimPosition::flat("BTC");
        pos.apply_fill(OrderSide::Buy, dec!(4), dec!(100));
        let realized = pos.apply_fill(OrderSide::Sell, dec!(1), dec!(110));
        assert_eq!(realized, dec!(10));
        assert_eq!(pos.qty, dec!(3));
        assert_eq!(pos.avg_entry_price, dec!(100));
        assert_eq!(pos.realized_pnl, dec!(10));
    }

    #[test]
    fn test_short_side_accounting() {
        let mut pos = SimPosition::flat("ETH");
        pos.apply_fill(OrderSide::Sell, dec!(2), dec!(50));
        assert_eq!(pos.qty, dec!(-2));
        let realized = pos.apply_fill(OrderSide::Buy, dec!(2), dec!(45));
        assert_eq!(realized, dec!(10));
        assert!(pos.is_flat());
        assert_eq!(pos.avg_entry_price, dec!(0));
    }

    #[test]
    fn test_sign_flip_closes_then_opens() {
        let mut pos = SimPosition::flat("BTC");
        pos.apply_fill(OrderSide::Buy, dec!(2), dec!(100));
        let realized = pos.apply_fill(OrderSide::Sell, dec!(5), dec!(90));
        // Closed 2 at -10 each; remainder of 3 opens short at 90.
        assert_eq!(realized, dec!(-20));
        assert_eq!(pos.qty, dec!(-3));
        assert_eq!(pos.avg_entry_price, dec!(90));
    }

    #[test]
    fn test_mark_to_market() {
        let mut pos = SimPosition::flat("BTC");
        pos.apply_fill(OrderSide::Buy, dec!(2), dec!(100));
        pos.mark(dec!(105));
        assert_eq!(pos.unrealized_pnl, dec!(10));

        let mut short = SimPosition::flat("ETH");
        short.apply_fill(OrderSide::Sell, dec!(2), dec!(100));
        short.mark(dec!(105));
        assert_eq!(short.unrealized_pnl, dec!(-10));
        assert_eq!(short.market_value(dec!(105)), dec!(-210));
    }
}
