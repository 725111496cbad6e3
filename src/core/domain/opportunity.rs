//! Detected arbitrage opportunities.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use super::execution::LegSide;
use super::id::{MarketId, TokenId};
use super::money::{Price, Volume};
use super::venue::Venue;

/// Which arbitrage structure was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    BuyPolyLayExchange,
    BuyPolyBackExchange,
    AtomicSplit,
    AtomicMerge,
    MultiMarket,
}

/// A leg sketch carried by an opportunity.
///
/// Hints record the market state at detection time; the router re-reads
/// live books before dispatching, so these are advisory prices only.
#[derive(Debug, Clone, Serialize)]
pub struct LegHint {
    pub venue: Venue,
    pub market_id: MarketId,
    pub token_id: TokenId,
    pub side: LegSide,
    pub price: Price,
    pub available: Volume,
}

/// An immutable detected opportunity.
///
/// Carries enough context for the router to reconstruct executable legs:
/// the detection-time prices, sizes and venues of each leg.
#[derive(Debug, Clone, Serialize)]
pub struct Opportunity {
    id: Uuid,
    direction: Direction,
    /// Key identifying the underlying event, for cooldown suppression.
    event_key: String,
    question: String,
    legs: Vec<LegHint>,
    ev_percent: Decimal,
    confidence: Decimal,
    detected_at: DateTime<Utc>,
}

impl Opportunity {
    /// Create a new opportunity stamped now.
    #[must_use]
    pub fn new(
        direction: Direction,
        event_key: impl Into<String>,
        question: impl Into<String>,
        legs: Vec<LegHint>,
        ev_percent: Decimal,
        confidence: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            direction,
            event_key: event_key.into(),
            question: question.into(),
            legs,
            ev_percent,
            confidence,
            detected_at: Utc::now(),
        }
    }

    /// Unique opportunity id.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// The detected arbitrage structure.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// Underlying-event key for cooldown suppression.
    #[must_use]
    pub fn event_key(&self) -> &str {
        &self.event_key
    }

    /// Human-readable market question.
    #[must_use]
    pub fn question(&self) -> &str {
        &self.question
    }

    /// Leg sketches at detection time.
    #[must_use]
    pub fn legs(&self) -> &[LegHint] {
        &self.legs
    }

    /// Expected value in percent, net of fees.
    #[must_use]
    pub const fn ev_percent(&self) -> Decimal {
        self.ev_percent
    }

    /// Confidence inherited from the mapping (1.0 for same-venue arbs).
    #[must_use]
    pub const fn confidence(&self) -> Decimal {
        self.confidence
    }

    /// Wall-clock detection time.
    #[must_use]
    pub const fn detected_at(&self) -> DateTime<Utc> {
        self.detected_at
    }

    /// All venues touched by this opportunity, deduplicated.
    #[must_use]
    pub fn venues(&self) -> Vec<Venue> {
        let mut venues: Vec<Venue> = Vec::new();
        for leg in &self.legs {
            if !venues.contains(&leg.venue) {
                venues.push(leg.venue);
            }
        }
        venues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn hint(venue: Venue, side: LegSide) -> LegHint {
        LegHint {
            venue,
            market_id: MarketId::from("m"),
            token_id: TokenId::from("t"),
            side,
            price: dec!(0.45),
            available: dec!(100),
        }
    }

    #[test]
    fn venues_are_deduplicated() {
        let opp = Opportunity::new(
            Direction::AtomicSplit,
            "m",
            "Will it rain?",
            vec![
                hint(Venue::Polymarket, LegSide::Sell),
                hint(Venue::Polymarket, LegSide::Sell),
            ],
            dec!(1.49),
            Decimal::ONE,
        );
        assert_eq!(opp.venues(), vec![Venue::Polymarket]);
    }

    #[test]
    fn cross_venue_opportunity_touches_both_venues() {
        let opp = Opportunity::new(
            Direction::BuyPolyLayExchange,
            "poly:1.23",
            "Will the home side win?",
            vec![
                hint(Venue::Polymarket, LegSide::Buy),
                hint(Venue::Betfair, LegSide::Lay),
            ],
            dec!(9.2),
            dec!(0.95),
        );
        assert_eq!(opp.venues(), vec![Venue::Polymarket, Venue::Betfair]);
        assert_eq!(opp.legs().len(), 2);
        assert!(opp.ev_percent() > Decimal::ZERO);
    }
}
