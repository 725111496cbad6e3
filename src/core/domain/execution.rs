//! Execution leg and result types.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::id::{MarketId, OrderId, TokenId};
use super::money::{Price, Volume};
use super::order_book::OrderBook;
use super::venue::Venue;

/// Side of an execution leg.
///
/// `Mint` and `Merge` are CLOB-venue on-chain capabilities (split 1 USDC
/// into YES+NO, or merge YES+NO back into 1 USDC); they are not order-book
/// orders and are routed through the RPC broadcast path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LegSide {
    Buy,
    Sell,
    Back,
    Lay,
    Mint,
    Merge,
}

impl LegSide {
    /// Whether this side adds to cost (cash out) rather than revenue.
    #[must_use]
    pub const fn is_cost(&self) -> bool {
        matches!(self, Self::Buy | Self::Back | Self::Mint)
    }

    /// Whether this leg settles on-chain instead of through an order book.
    #[must_use]
    pub const fn is_on_chain(&self) -> bool {
        matches!(self, Self::Mint | Self::Merge)
    }

    /// The side that closes a position opened with this side.
    #[must_use]
    pub const fn inverse(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
            Self::Back => Self::Lay,
            Self::Lay => Self::Back,
            Self::Mint => Self::Merge,
            Self::Merge => Self::Mint,
        }
    }
}

/// One leg of a multi-leg strategy, ready for dispatch.
#[derive(Debug, Clone)]
pub struct ExecutionLeg {
    pub venue: Venue,
    pub market_id: MarketId,
    pub token_id: TokenId,
    pub side: LegSide,
    pub size: Volume,
    pub limit_price: Price,
    /// Book snapshot taken at planning time, used for pre-flight VWAP.
    /// On-chain legs carry no book.
    pub book: Option<Arc<OrderBook>>,
    pub timeout: Duration,
    /// Whether recovery may chase the market with worse prices.
    pub allow_chase: bool,
    /// Worst acceptable price while chasing.
    pub chase_breakeven_price: Option<Price>,
    /// Pre-signed transaction payload for on-chain legs.
    pub raw_tx_hex: Option<String>,
}

impl ExecutionLeg {
    /// Signed notional contribution: positive for cost sides, negative for
    /// revenue sides.
    #[must_use]
    pub fn signed_notional(&self, price: Price) -> Decimal {
        let notional = price * self.size;
        if self.side.is_cost() {
            notional
        } else {
            -notional
        }
    }
}

/// Terminal status of a dispatched leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegStatus {
    Filled,
    Partial,
    Failed,
    Cancelled,
    Timeout,
}

/// Result of dispatching one leg.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub order_id: Option<OrderId>,
    pub status: LegStatus,
    pub filled_size: Volume,
    pub remaining_size: Volume,
    pub executed_price: Option<Price>,
    pub error: Option<String>,
}

impl ExecutionResult {
    /// A fully filled result at the given price.
    #[must_use]
    pub fn filled(order_id: OrderId, size: Volume, price: Price) -> Self {
        Self {
            order_id: Some(order_id),
            status: LegStatus::Filled,
            filled_size: size,
            remaining_size: Decimal::ZERO,
            executed_price: Some(price),
            error: None,
        }
    }

    /// A failed result with no fill.
    #[must_use]
    pub fn failed(size: Volume, error: impl Into<String>) -> Self {
        Self {
            order_id: None,
            status: LegStatus::Failed,
            filled_size: Decimal::ZERO,
            remaining_size: size,
            executed_price: None,
            error: Some(error.into()),
        }
    }

    /// A timed-out result with no fill.
    #[must_use]
    pub fn timed_out(size: Volume) -> Self {
        Self {
            order_id: None,
            status: LegStatus::Timeout,
            filled_size: Decimal::ZERO,
            remaining_size: size,
            executed_price: None,
            error: Some("leg timeout".into()),
        }
    }

    /// Whether the leg ended fully filled.
    #[must_use]
    pub fn is_filled(&self) -> bool {
        self.status == LegStatus::Filled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn leg(side: LegSide) -> ExecutionLeg {
        ExecutionLeg {
            venue: Venue::Polymarket,
            market_id: MarketId::from("m"),
            token_id: TokenId::from("t"),
            side,
            size: dec!(100),
            limit_price: dec!(0.45),
            book: None,
            timeout: Duration::from_secs(2),
            allow_chase: false,
            chase_breakeven_price: None,
            raw_tx_hex: None,
        }
    }

    #[test]
    fn side_classification() {
        assert!(LegSide::Buy.is_cost());
        assert!(LegSide::Mint.is_cost());
        assert!(!LegSide::Sell.is_cost());
        assert!(LegSide::Merge.is_on_chain());
        assert!(!LegSide::Lay.is_on_chain());
    }

    #[test]
    fn inverse_round_trips() {
        for side in [
            LegSide::Buy,
            LegSide::Sell,
            LegSide::Back,
            LegSide::Lay,
            LegSide::Mint,
            LegSide::Merge,
        ] {
            assert_eq!(side.inverse().inverse(), side);
        }
    }

    #[test]
    fn signed_notional_by_side() {
        assert_eq!(leg(LegSide::Buy).signed_notional(dec!(0.50)), dec!(50));
        assert_eq!(leg(LegSide::Sell).signed_notional(dec!(0.50)), dec!(-50));
    }

    #[test]
    fn result_constructors() {
        let filled = ExecutionResult::filled(OrderId::from("o1"), dec!(10), dec!(0.5));
        assert!(filled.is_filled());
        assert_eq!(filled.remaining_size, Decimal::ZERO);

        let failed = ExecutionResult::failed(dec!(10), "rejected");
        assert_eq!(failed.status, LegStatus::Failed);
        assert_eq!(failed.remaining_size, dec!(10));

        let timeout = ExecutionResult::timed_out(dec!(10));
        assert_eq!(timeout.status, LegStatus::Timeout);
    }
}
