//! Normalized market update events.

use std::time::{Duration, Instant};

use rust_decimal::Decimal;

use super::id::MarketId;
use super::money::{Price, Volume};
use super::venue::Venue;

/// Normalized, fee-adjusted top-of-book event.
///
/// All venue decoders produce this type. Prices are probabilities in
/// (0, 1) with the venue's fee already folded in (bid reduced, ask raised
/// for notional fees; winnings commission netted into the implied
/// probability for exchanges), so detection arithmetic is fee-blind.
///
/// Sequence numbers are monotonic per `(venue, market_id)`: an update with
/// sequence S supersedes every earlier update for the same key.
#[derive(Debug, Clone)]
pub struct MarketUpdate {
    venue: Venue,
    market_id: MarketId,
    best_bid: Price,
    best_ask: Price,
    bid_size: Volume,
    ask_size: Volume,
    fee_rate_applied: Decimal,
    sequence: u64,
    received_at: Instant,
}

impl MarketUpdate {
    /// Create a new market update stamped with the current monotonic time.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        venue: Venue,
        market_id: MarketId,
        best_bid: Price,
        best_ask: Price,
        bid_size: Volume,
        ask_size: Volume,
        fee_rate_applied: Decimal,
        sequence: u64,
    ) -> Self {
        Self {
            venue,
            market_id,
            best_bid,
            best_ask,
            bid_size,
            ask_size,
            fee_rate_applied,
            sequence,
            received_at: Instant::now(),
        }
    }

    /// The venue that produced this update.
    #[must_use]
    pub const fn venue(&self) -> Venue {
        self.venue
    }

    /// The market this update belongs to (at its venue).
    #[must_use]
    pub const fn market_id(&self) -> &MarketId {
        &self.market_id
    }

    /// Fee-adjusted best bid.
    #[must_use]
    pub const fn best_bid(&self) -> Price {
        self.best_bid
    }

    /// Fee-adjusted best ask.
    #[must_use]
    pub const fn best_ask(&self) -> Price {
        self.best_ask
    }

    /// Size available at the best bid.
    #[must_use]
    pub const fn bid_size(&self) -> Volume {
        self.bid_size
    }

    /// Size available at the best ask.
    #[must_use]
    pub const fn ask_size(&self) -> Volume {
        self.ask_size
    }

    /// The fee rate that was folded into the prices.
    #[must_use]
    pub const fn fee_rate_applied(&self) -> Decimal {
        self.fee_rate_applied
    }

    /// Per-(venue, market) monotonic sequence number.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Monotonic receipt timestamp.
    #[must_use]
    pub const fn received_at(&self) -> Instant {
        self.received_at
    }

    /// Age of this update relative to now.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.received_at.elapsed()
    }

    /// Whether this update is older than the given freshness bound.
    #[must_use]
    pub fn is_stale(&self, freshness: Duration) -> bool {
        self.age() > freshness
    }

    /// Whether this update supersedes `other` (same key, higher sequence).
    #[must_use]
    pub fn supersedes(&self, other: &Self) -> bool {
        self.venue == other.venue
            && self.market_id == other.market_id
            && self.sequence > other.sequence
    }

    /// Bus coalescing key.
    #[must_use]
    pub fn key(&self) -> (Venue, MarketId) {
        (self.venue, self.market_id.clone())
    }
}
