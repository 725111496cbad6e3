//! Order book snapshot types.
//!
//! Snapshots are immutable: the owning venue task maintains a live book and
//! publishes clones, so readers never observe a torn state.

use rust_decimal::Decimal;

use super::id::TokenId;
use super::money::{Price, Volume};

/// A single price level in the order book
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceLevel {
    price: Price,
    size: Volume,
}

impl PriceLevel {
    /// Create a new price level
    #[must_use]
    pub const fn new(price: Price, size: Volume) -> Self {
        Self { price, size }
    }

    /// Get the price
    #[must_use]
    pub const fn price(&self) -> Price {
        self.price
    }

    /// Get the size/volume
    #[must_use]
    pub const fn size(&self) -> Volume {
        self.size
    }

    /// Notional value of the level (price × size).
    #[must_use]
    pub fn notional(&self) -> Decimal {
        self.price * self.size
    }
}

/// Immutable order book snapshot for a single token.
///
/// Bids are held best-first (descending price), asks best-first
/// (ascending price).
#[derive(Debug, Clone)]
pub struct OrderBook {
    token_id: TokenId,
    bids: Vec<PriceLevel>,
    asks: Vec<PriceLevel>,
}

impl OrderBook {
    /// Create a new empty order book
    #[must_use]
    pub const fn new(token_id: TokenId) -> Self {
        Self {
            token_id,
            bids: Vec::new(),
            asks: Vec::new(),
        }
    }

    /// Create an order book with initial levels.
    ///
    /// Levels are re-sorted into canonical order (bids descending,
    /// asks ascending).
    #[must_use]
    pub fn with_levels(token_id: TokenId, mut bids: Vec<PriceLevel>, mut asks: Vec<PriceLevel>) -> Self {
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));
        Self {
            token_id,
            bids,
            asks,
        }
    }

    /// Get the token ID
    #[must_use]
    pub const fn token_id(&self) -> &TokenId {
        &self.token_id
    }

    /// Get all bid levels
    #[must_use]
    pub fn bids(&self) -> &[PriceLevel] {
        &self.bids
    }

    /// Get all ask levels
    #[must_use]
    pub fn asks(&self) -> &[PriceLevel] {
        &self.asks
    }

    /// Best bid (highest buy price)
    #[must_use]
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    /// Best ask (lowest sell price)
    #[must_use]
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    /// Arithmetic midpoint of the BBO. `None` if either side is empty.
    #[must_use]
    pub fn mid(&self) -> Option<Price> {
        let bid = self.best_bid()?.price();
        let ask = self.best_ask()?.price();
        Some((bid + ask) / Decimal::TWO)
    }

    /// A book is crossed when best_bid >= best_ask. Crossed books are
    /// excluded from quoting: depth queries report no liquidity.
    #[must_use]
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid.price() >= ask.price(),
            _ => false,
        }
    }

    /// Raw volume-weighted price to buy `target` against the asks,
    /// without any slippage penalty. `None` on a crossed book or when
    /// visible depth is insufficient.
    #[must_use]
    pub fn vwap_buy(&self, target: Volume) -> Option<Price> {
        if self.is_crossed() {
            return None;
        }
        walk_levels(&self.asks, target)
    }

    /// Raw volume-weighted price to sell `target` against the bids.
    #[must_use]
    pub fn vwap_sell(&self, target: Volume) -> Option<Price> {
        if self.is_crossed() {
            return None;
        }
        walk_levels(&self.bids, target)
    }
}

/// Accumulate cost across levels (already in execution order) until
/// `target` is consumed.
fn walk_levels(levels: &[PriceLevel], target: Volume) -> Option<Price> {
    if levels.is_empty() || target <= Decimal::ZERO {
        return None;
    }

    let mut total_cost = Decimal::ZERO;
    let mut remaining = target;

    for level in levels {
        let take = remaining.min(level.size());
        total_cost += take * level.price();
        remaining -= take;
        if remaining <= Decimal::ZERO {
            break;
        }
    }

    if remaining > Decimal::ZERO {
        return None; // Insufficient liquidity
    }

    Some(total_cost / target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn book() -> OrderBook {
        OrderBook::with_levels(
            TokenId::from("tok"),
            vec![
                PriceLevel::new(dec!(0.44), dec!(100)),
                PriceLevel::new(dec!(0.45), dec!(50)),
            ],
            vec![
                PriceLevel::new(dec!(0.47), dec!(60)),
                PriceLevel::new(dec!(0.48), dec!(200)),
            ],
        )
    }

    #[test]
    fn levels_are_canonically_ordered() {
        let b = book();
        assert_eq!(b.best_bid().unwrap().price(), dec!(0.45));
        assert_eq!(b.best_ask().unwrap().price(), dec!(0.47));
        assert!(!b.is_crossed());
    }

    #[test]
    fn mid_is_arithmetic_mean() {
        assert_eq!(book().mid().unwrap(), dec!(0.46));
        assert!(OrderBook::new(TokenId::from("t")).mid().is_none());
    }

    #[test]
    fn vwap_buy_walks_asks_ascending() {
        let b = book();
        // 100 shares: 60 @ 0.47 + 40 @ 0.48 = 47.40 → 0.474
        assert_eq!(b.vwap_buy(dec!(100)).unwrap(), dec!(0.474));
        // Single level fill returns that level's price.
        assert_eq!(b.vwap_buy(dec!(60)).unwrap(), dec!(0.47));
    }

    #[test]
    fn vwap_sell_walks_bids_descending() {
        let b = book();
        // 100 shares: 50 @ 0.45 + 50 @ 0.44 = 44.50 → 0.445
        assert_eq!(b.vwap_sell(dec!(100)).unwrap(), dec!(0.445));
    }

    #[test]
    fn vwap_bounds_respect_bbo() {
        let b = book();
        assert!(b.vwap_buy(dec!(120)).unwrap() >= b.best_ask().unwrap().price());
        assert!(b.vwap_sell(dec!(120)).unwrap() <= b.best_bid().unwrap().price());
    }

    #[test]
    fn vwap_is_monotonic_in_size() {
        let b = book();
        let small = b.vwap_buy(dec!(30)).unwrap();
        let large = b.vwap_buy(dec!(200)).unwrap();
        assert!(small <= large);
    }

    #[test]
    fn insufficient_depth_returns_none() {
        assert!(book().vwap_buy(dec!(1000)).is_none());
        assert!(book().vwap_sell(dec!(1000)).is_none());
    }

    #[test]
    fn empty_and_zero_size_return_none() {
        let empty = OrderBook::new(TokenId::from("t"));
        assert!(empty.vwap_buy(dec!(10)).is_none());
        assert!(book().vwap_buy(Decimal::ZERO).is_none());
    }

    #[test]
    fn crossed_book_reports_no_liquidity() {
        let crossed = OrderBook::with_levels(
            TokenId::from("t"),
            vec![PriceLevel::new(dec!(0.50), dec!(10))],
            vec![PriceLevel::new(dec!(0.48), dec!(10))],
        );
        assert!(crossed.is_crossed());
        assert!(crossed.vwap_buy(dec!(5)).is_none());
        assert!(crossed.vwap_sell(dec!(5)).is_none());
    }
}
