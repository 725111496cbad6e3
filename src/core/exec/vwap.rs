//! Achievable-price engine over book depth.
//!
//! Wraps the raw depth walk with a configurable slippage penalty: a
//! simple, conservative model of the extra slippage beyond observed
//! depth. Buys are scaled up, sells scaled down, so pre-flight costs are
//! always pessimistic.

use rust_decimal::Decimal;

use crate::core::domain::{OrderBook, Price, Volume};

/// Depth-aware price calculator.
#[derive(Debug, Clone)]
pub struct VwapEngine {
    slippage_penalty: Decimal,
}

impl VwapEngine {
    /// Create an engine with the given penalty fraction (0.005 = 0.5%).
    #[must_use]
    pub const fn new(slippage_penalty: Decimal) -> Self {
        Self { slippage_penalty }
    }

    /// The configured penalty fraction.
    #[must_use]
    pub const fn slippage_penalty(&self) -> Decimal {
        self.slippage_penalty
    }

    /// Penalized price to buy `size` against the asks. `None` when the
    /// book is crossed or depth is insufficient.
    #[must_use]
    pub fn buy_price(&self, book: &OrderBook, size: Volume) -> Option<Price> {
        let raw = book.vwap_buy(size)?;
        Some(raw * (Decimal::ONE + self.slippage_penalty))
    }

    /// Penalized price to sell `size` against the bids.
    #[must_use]
    pub fn sell_price(&self, book: &OrderBook, size: Volume) -> Option<Price> {
        let raw = book.vwap_sell(size)?;
        Some(raw * (Decimal::ONE - self.slippage_penalty))
    }
}

impl Default for VwapEngine {
    /// 0.5% penalty.
    fn default() -> Self {
        Self::new(Decimal::new(5, 3))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::{PriceLevel, TokenId};
    use rust_decimal_macros::dec;

    fn book() -> OrderBook {
        OrderBook::with_levels(
            TokenId::from("tok"),
            vec![PriceLevel::new(dec!(0.45), dec!(100))],
            vec![PriceLevel::new(dec!(0.47), dec!(100))],
        )
    }

    #[test]
    fn buy_price_is_penalized_upward() {
        let engine = VwapEngine::new(dec!(0.005));
        let price = engine.buy_price(&book(), dec!(50)).unwrap();
        assert_eq!(price, dec!(0.47) * dec!(1.005));
        assert!(price >= book().best_ask().unwrap().price());
    }

    #[test]
    fn sell_price_is_penalized_downward() {
        let engine = VwapEngine::new(dec!(0.005));
        let price = engine.sell_price(&book(), dec!(50)).unwrap();
        assert_eq!(price, dec!(0.45) * dec!(0.995));
        assert!(price <= book().best_bid().unwrap().price());
    }

    #[test]
    fn insufficient_depth_returns_none() {
        let engine = VwapEngine::default();
        assert!(engine.buy_price(&book(), dec!(500)).is_none());
        assert!(engine.sell_price(&book(), dec!(500)).is_none());
    }

    #[test]
    fn crossed_book_returns_none() {
        let crossed = OrderBook::with_levels(
            TokenId::from("tok"),
            vec![PriceLevel::new(dec!(0.50), dec!(10))],
            vec![PriceLevel::new(dec!(0.48), dec!(10))],
        );
        let engine = VwapEngine::default();
        assert!(engine.buy_price(&crossed, dec!(5)).is_none());
    }

    #[test]
    fn zero_penalty_matches_raw_walk() {
        let engine = VwapEngine::new(Decimal::ZERO);
        assert_eq!(
            engine.buy_price(&book(), dec!(50)),
            book().vwap_buy(dec!(50))
        );
    }
}
