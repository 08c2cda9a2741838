//! Bar-driven fill rules.
//!
//! Pure functions evaluating one pending order against one OHLCV bar.
//! Buy limits never fill above the limit; stops become market (or limit)
//! orders for the bar that triggers them. Slippage is signed adversely and
//! commission has a floor.

use crate::models::{Bar, OrderSide, OrderType};
use crate::sim::FillReference;
use rust_decimal::Decimal;

const BPS_DENOMINATOR: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FillEval {
    /// Does not execute against this bar.
    NoFill,
    /// Executes at this raw price (slippage not yet applied).
    Fill(Decimal),
    /// Stop leg triggered but the limit leg cannot fill on this bar; the
    /// order stays pending as a plain limit.
    TriggerOnly,
}

/// Reference price for market-style executions.
pub fn reference_price(bar: &Bar, side: OrderSide, reference: FillReference) -> Decimal {
    match reference {
        FillReference::Open => bar.open,
        FillReference::Close => bar.close,
        FillReference::Vwap => (bar.high + bar.low + bar.close) / Decimal::from(3),
        FillReference::Worst => match side {
            OrderSide::Buy => bar.high,
            OrderSide::Sell => bar.low,
        },
    }
}

pub fn evaluate_fill(
    side: OrderSide,
    order_type: OrderType,
    limit_price: Option<Decimal>,
    stop_price: Option<Decimal>,
    already_triggered: bool,
    bar: &Bar,
    reference: FillReference,
) -> FillEval {
    match order_type {
        OrderType::Market => FillEval::Fill(reference_price(bar, side, reference)),
        OrderType::Limit => evaluate_limit(side, limit_price, bar),
        OrderType::Stop => {
            if already_triggered || stop_triggers(side, stop_price, bar) {
                FillEval::Fill(reference_price(bar, side, reference))
            } else {
                FillEval::NoFill
            }
        }
        OrderType::StopLimit => {
            if !already_triggered && !stop_triggers(side, stop_price, bar) {
                return FillEval::NoFill;
            }
            match evaluate_limit(side, limit_price, bar) {
                FillEval::NoFill => FillEval::TriggerOnly,
                fill => fill,
            }
        }
    }
}

fn evaluate_limit(side: OrderSide, limit_price: Option<Decimal>, bar: &Bar) -> FillEval {
    let Some(limit) = limit_price else {
        return FillEval::NoFill;
    };
    match side {
        OrderSide::Buy if bar.low <= limit => FillEval::Fill(limit.min(bar.open)),
        OrderSide::Sell if bar.high >= limit => FillEval::Fill(limit.max(bar.open)),
        _ => FillEval::NoFill,
    }
}

fn stop_triggers(side: OrderSide, stop_price: Option<Decimal>, bar: &Bar) -> bool {
    let Some(stop) = stop_price else {
        return false;
    };
    match side {
        OrderSide::Buy => bar.high >= stop,
        OrderSide::Sell => bar.low <= stop,
    }
}

/// Slippage amount for a raw price, always adverse: buys pay more, sells
/// receive less.
pub fn slippage_amount(raw_price: Decimal, slippage_bps: u32) -> Decimal {
    raw_price * Decimal::from(slippage_bps) / Decimal::from(BPS_DENOMINATOR)
}

pub fn apply_slippage(raw_price: Decimal, side: OrderSide, slippage_bps: u32) -> Decimal {
    let slip = slippage_amount(raw_price, slippage_bps);
    match side {
        OrderSide::Buy => raw_price + slip,
        OrderSide::Sell => raw_price - slip,
    }
}

/// `max(min_commission, notional * commission_bps / 10_000)`.
pub fn commission(notional: Decimal, commission_bps: u32, min_commission: Decimal) -> Decimal {
    let proportional = notional.abs() * Decimal::from(commission_bps) / Decimal::from(BPS_DENOMINATOR);
    proportional.max(min_commission)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Timeframe;
    use rust_decimal_macros::dec;

    fn bar(open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Bar {
        Bar {
            symbol: "BTC".to_string(),
            timeframe: Timeframe::M1,
            ts: "2026-01-01T00:00:00Z".parse().unwrap(),
            open,
            high,
            low,
            close,
            volume: dec!(10),
        }
    }

    #[test]
    fn test_market_reference_prices() {
        let b = bar(dec!(48), dec!(51), dec!(47), dec!(50));
        assert_eq!(reference_price(&b, OrderSide::Buy, FillReference::Open), dec!(48));
        assert_eq!(reference_price(&b, OrderSide::Buy, FillReference::Close), dec!(50));
        assert_eq!(reference_price(&b, OrderSide::Buy, FillReference::Worst), dec!(51));
        assert_eq!(reference_price(&b, OrderSide::Sell, FillReference::Worst), dec!(47));
        // Typical price (51 + 47 + 50) / 3.
        assert_eq!(
            reference_price(&b, OrderSide::Buy, FillReference::Vwap),
            (dec!(51) + dec!(47) + dec!(50)) / Decimal::from(3)
        );
    }

    #[test]
    fn test_limit_buy_boundary() {
        // Fills iff low <= limit; price = min(limit, open).
        let b = bar(dec!(48), dec!(51), dec!(49), dec!(50));
        assert_eq!(
            evaluate_fill(OrderSide::Buy, OrderType::Limit, Some(dec!(50)), None, false, &b, FillReference::Open),
            FillEval::Fill(dec!(48))
        );
        assert_eq!(
            evaluate_fill(OrderSide::Buy, OrderType::Limit, Some(dec!(48.5)), None, false, &b, FillReference::Open),
            FillEval::NoFill
        );
    }

    #[test]
    fn test_limit_sell_boundary() {
        let b = bar(dec!(52), dec!(53), dec!(47), dec!(50));
        // high >= 50 so it fills at max(50, open=52) = 52.
        assert_eq!(
            evaluate_fill(OrderSide::Sell, OrderType::Limit, Some(dec!(50)), None, false, &b, FillReference::Open),
            FillEval::Fill(dec!(52))
        );
        assert_eq!(
            evaluate_fill(OrderSide::Sell, OrderType::Limit, Some(dec!(54)), None, false, &b, FillReference::Open),
            FillEval::NoFill
        );
    }

    #[test]
    fn test_stop_buy_triggers_as_market() {
        let b = bar(dec!(48), dec!(51), dec!(47), dec!(50));
        assert_eq!(
            evaluate_fill(OrderSide::Buy, OrderType::Stop, None, Some(dec!(50)), false, &b, FillReference::Open),
            FillEval::Fill(dec!(48))
        );
        assert_eq!(
            evaluate_fill(OrderSide::Buy, OrderType::Stop, None, Some(dec!(52)), false, &b, FillReference::Open),
            FillEval::NoFill
        );
    }

    #[test]
    fn test_stop_sell_triggers_on_low() {
        let b = bar(dec!(48), dec!(51), dec!(47), dec!(50));
        assert_eq!(
            evaluate_fill(OrderSide::Sell, OrderType::Stop, None, Some(dec!(47.5)), false, &b, FillReference::Close),
            FillEval::Fill(dec!(50))
        );
    }

    #[test]
    fn test_stop_limit_trigger_without_limit_fill() {
        // Stop triggers (high >= 50) but the limit 46 is below the bar's low.
        let b = bar(dec!(48), dec!(51), dec!(47), dec!(50));
        assert_eq!(
            evaluate_fill(
                OrderSide::Buy,
                OrderType::StopLimit,
                Some(dec!(46)),
                Some(dec!(50)),
                false,
                &b,
                FillReference::Open
            ),
            FillEval::TriggerOnly
        );
        // Once triggered it behaves as a plain limit on later bars.
        let later = bar(dec!(45.5), dec!(47), dec!(45), dec!(46));
        assert_eq!(
            evaluate_fill(
                OrderSide::Buy,
                OrderType::StopLimit,
                Some(dec!(46)),
                Some(dec!(50)),
                true,
                &later,
                FillReference::Open
            ),
            FillEval::Fill(dec!(45.5))
        );
    }

    #[test]
    fn test_slippage_is_adverse() {
        assert_eq!(apply_slippage(dec!(100), OrderSide::Buy, 10), dec!(100.1));
        assert_eq!(apply_slippage(dec!(100), OrderSide::Sell, 10), dec!(99.9));
        assert_eq!(apply_slippage(dec!(100), OrderSide::Buy, 0), dec!(100));
    }

    #[test]
    fn test_commission_floor() {
        assert_eq!(commission(dec!(10000), 10, dec!(1)), dec!(10));
        assert_eq!(commission(dec!(100), 10, dec!(1)), dec!(1));
        assert_eq!(commission(dec!(100), 0, dec!(0)), dec!(0));
    }
}
