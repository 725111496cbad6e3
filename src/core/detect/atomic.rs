//! Atomic same-venue arbitrage on the YES + NO = 1 identity.
//!
//! On a binary CLOB market, one settled unit always redeems for exactly
//! 1.0 USDC. When both asks sum below 1.0, buying both and merging locks
//! in the difference; when both bids sum above 1.0, minting a unit and
//! selling both sides does.

use rust_decimal::Decimal;

use crate::core::domain::{
    Direction, LegHint, LegSide, MarketPair, Opportunity, OrderBook, Venue,
};

/// Atomic detector tuning.
#[derive(Debug, Clone)]
pub struct AtomicConfig {
    /// Minimum deviation from 1.0 before a sum is interesting.
    pub epsilon: Decimal,
    /// CLOB taker fee applied to the traded notional.
    pub fee_rate: Decimal,
    /// Absolute net profit floor per unit.
    pub min_net_profit: Decimal,
    /// Relative net profit floor (fraction of traded notional).
    pub min_relative_profit: Decimal,
    /// Minimum notional available at the top level of each leg.
    pub min_top_notional: Decimal,
}

impl Default for AtomicConfig {
    fn default() -> Self {
        Self {
            epsilon: Decimal::new(5, 3),              // 0.005
            fee_rate: Decimal::new(5, 3),             // 0.5%
            min_net_profit: Decimal::new(5, 2),       // $0.05 per unit
            min_relative_profit: Decimal::new(2, 3),  // 0.2%
            min_top_notional: Decimal::ONE_HUNDRED,   // ~$100 at top of book
        }
    }
}

/// Scans CLOB binary markets for YES + NO sum violations.
#[derive(Debug, Clone)]
pub struct AtomicDetector {
    config: AtomicConfig,
}

impl AtomicDetector {
    /// Create a detector with the given tuning.
    #[must_use]
    pub const fn new(config: AtomicConfig) -> Self {
        Self { config }
    }

    /// Scan one market pair given fresh books for both tokens.
    ///
    /// Returns the more profitable violation when both exist (in practice
    /// at most one side deviates).
    #[must_use]
    pub fn scan(&self, pair: &MarketPair, yes: &OrderBook, no: &OrderBook) -> Option<Opportunity> {
        if yes.is_crossed() || no.is_crossed() {
            return None;
        }
        let merge = self.scan_merge(pair, yes, no);
        let split = self.scan_split(pair, yes, no);
        match (merge, split) {
            (Some(a), Some(b)) => Some(if a.ev_percent() >= b.ev_percent() { a } else { b }),
            (a, b) => a.or(b),
        }
    }

    /// Buy both asks and merge: profitable when asks sum under 1.0.
    fn scan_merge(&self, pair: &MarketPair, yes: &OrderBook, no: &OrderBook) -> Option<Opportunity> {
        let yes_ask = yes.best_ask()?;
        let no_ask = no.best_ask()?;

        let sum_asks = yes_ask.price() + no_ask.price();
        if sum_asks >= Decimal::ONE - self.config.epsilon {
            return None;
        }

        let gross = Decimal::ONE - sum_asks;
        let notional = sum_asks;
        let net = gross - self.config.fee_rate * notional;
        if !self.passes_profit_gate(net, notional) {
            return None;
        }
        if yes_ask.notional() < self.config.min_top_notional
            || no_ask.notional() < self.config.min_top_notional
        {
            return None;
        }

        let available = yes_ask.size().min(no_ask.size());
        Some(Opportunity::new(
            Direction::AtomicMerge,
            pair.market_id().as_str(),
            pair.question(),
            vec![
                leg(pair, yes, LegSide::Buy, yes_ask.price(), available),
                leg(pair, no, LegSide::Buy, no_ask.price(), available),
            ],
            net / notional * Decimal::ONE_HUNDRED,
            Decimal::ONE,
        ))
    }

    /// Mint a unit and sell both bids: profitable when bids sum over 1.0.
    fn scan_split(&self, pair: &MarketPair, yes: &OrderBook, no: &OrderBook) -> Option<Opportunity> {
        let yes_bid = yes.best_bid()?;
        let no_bid = no.best_bid()?;

        let sum_bids = yes_bid.price() + no_bid.price();
        if sum_bids <= Decimal::ONE + self.config.epsilon {
            return None;
        }

        let gross = sum_bids - Decimal::ONE;
        let notional = sum_bids;
        let net = gross - self.config.fee_rate * notional;
        if !self.passes_profit_gate(net, notional) {
            return None;
        }
        if yes_bid.notional() < self.config.min_top_notional
            || no_bid.notional() < self.config.min_top_notional
        {
            return None;
        }

        let available = yes_bid.size().min(no_bid.size());
        Some(Opportunity::new(
            Direction::AtomicSplit,
            pair.market_id().as_str(),
            pair.question(),
            vec![
                leg(pair, yes, LegSide::Sell, yes_bid.price(), available),
                leg(pair, no, LegSide::Sell, no_bid.price(), available),
            ],
            net / notional * Decimal::ONE_HUNDRED,
            Decimal::ONE,
        ))
    }

    fn passes_profit_gate(&self, net: Decimal, notional: Decimal) -> bool {
        net > self.config.min_net_profit && net > self.config.min_relative_profit * notional
    }
}

fn leg(
    pair: &MarketPair,
    book: &OrderBook,
    side: LegSide,
    price: Decimal,
    available: Decimal,
) -> LegHint {
    LegHint {
        venue: Venue::Polymarket,
        market_id: pair.market_id().clone(),
        token_id: book.token_id().clone(),
        side,
        price,
        available,
    }
}
