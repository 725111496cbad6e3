//! Live order books maintained by venue decode tasks.
//!
//! A [`LiveBook`] is owned and mutated by exactly one venue task; readers
//! only ever see immutable [`OrderBook`] snapshots published through the
//! [`BookCache`].

mod cache;

pub use cache::BookCache;

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use crate::core::domain::{OrderBook, Price, PriceLevel, TokenId, Volume};

/// Which side of the book a delta applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookSide {
    Bid,
    Ask,
}

/// Mutable per-token book state.
///
/// Sparse price-indexed maps per side; snapshots replace the entire state,
/// deltas mutate single levels (size 0 removes). Out-of-order deltas
/// (sequence at or below the last applied) are ignored.
#[derive(Debug)]
pub struct LiveBook {
    token_id: TokenId,
    bids: BTreeMap<Price, Volume>,
    asks: BTreeMap<Price, Volume>,
    last_sequence: u64,
}

impl LiveBook {
    /// Create an empty live book.
    #[must_use]
    pub fn new(token_id: TokenId) -> Self {
        Self {
            token_id,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_sequence: 0,
        }
    }

    /// The token this book tracks.
    #[must_use]
    pub const fn token_id(&self) -> &TokenId {
        &self.token_id
    }

    /// Last applied sequence number.
    #[must_use]
    pub const fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Replace the entire book. Invalid levels (price outside (0, 1) or
    /// negative size) are discarded.
    pub fn apply_snapshot(
        &mut self,
        bids: Vec<(Price, Volume)>,
        asks: Vec<(Price, Volume)>,
        sequence: u64,
    ) {
        if sequence <= self.last_sequence && self.last_sequence != 0 {
            return;
        }
        self.bids.clear();
        self.asks.clear();
        for (price, size) in bids {
            if valid_level(price, size) && size > Decimal::ZERO {
                self.bids.insert(price, size);
            }
        }
        for (price, size) in asks {
            if valid_level(price, size) && size > Decimal::ZERO {
                self.asks.insert(price, size);
            }
        }
        self.last_sequence = sequence;
    }

    /// Apply a single-level delta. A zero size removes the level.
    /// Returns false when the delta was rejected (stale or invalid).
    pub fn apply_delta(
        &mut self,
        side: BookSide,
        price: Price,
        size: Volume,
        sequence: u64,
    ) -> bool {
        if sequence <= self.last_sequence {
            return false;
        }
        if !valid_level(price, size) {
            return false;
        }
        let levels = match side {
            BookSide::Bid => &mut self.bids,
            BookSide::Ask => &mut self.asks,
        };
        if size == Decimal::ZERO {
            levels.remove(&price);
        } else {
            levels.insert(price, size);
        }
        self.last_sequence = sequence;
        true
    }

    /// Best bid level.
    #[must_use]
    pub fn best_bid(&self) -> Option<(Price, Volume)> {
        self.bids.iter().next_back().map(|(p, s)| (*p, *s))
    }

    /// Best ask level.
    #[must_use]
    pub fn best_ask(&self) -> Option<(Price, Volume)> {
        self.asks.iter().next().map(|(p, s)| (*p, *s))
    }

    /// Whether best_bid >= best_ask.
    #[must_use]
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => bid >= ask,
            _ => false,
        }
    }

    /// Take an immutable snapshot for publication.
    #[must_use]
    pub fn snapshot(&self) -> OrderBook {
        let bids = self
            .bids
            .iter()
            .rev()
            .map(|(p, s)| PriceLevel::new(*p, *s))
            .collect();
        let asks = self
            .asks
            .iter()
            .map(|(p, s)| PriceLevel::new(*p, *s))
            .collect();
        OrderBook::with_levels(self.token_id.clone(), bids, asks)
    }
}

/// Binary market levels must have a price in (0, 1) and non-negative size.
fn valid_level(price: Price, size: Volume) -> bool {
    price > Decimal::ZERO && price < Decimal::ONE && size >= Decimal::ZERO
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn seeded() -> LiveBook {
        let mut book = LiveBook::new(TokenId::from("tok"));
        book.apply_snapshot(
            vec![(dec!(0.44), dec!(100)), (dec!(0.45), dec!(50))],
            vec![(dec!(0.47), dec!(60)), (dec!(0.48), dec!(200))],
            1,
        );
        book
    }

    #[test]
    fn snapshot_replaces_state() {
        let mut book = seeded();
        assert_eq!(book.best_bid().unwrap().0, dec!(0.45));
        assert_eq!(book.best_ask().unwrap().0, dec!(0.47));

        book.apply_snapshot(vec![(dec!(0.30), dec!(10))], vec![(dec!(0.70), dec!(10))], 2);
        assert_eq!(book.best_bid().unwrap().0, dec!(0.30));
        assert_eq!(book.best_ask().unwrap().0, dec!(0.70));
    }

    #[test]
    fn delta_sets_and_removes_levels() {
        let mut book = seeded();
        assert!(book.apply_delta(BookSide::Bid, dec!(0.46), dec!(25), 2));
        assert_eq!(book.best_bid().unwrap(), (dec!(0.46), dec!(25)));

        assert!(book.apply_delta(BookSide::Bid, dec!(0.46), Decimal::ZERO, 3));
        assert_eq!(book.best_bid().unwrap().0, dec!(0.45));
    }

    #[test]
    fn stale_deltas_are_ignored() {
        let mut book = seeded();
        assert!(!book.apply_delta(BookSide::Ask, dec!(0.40), dec!(5), 1));
        assert_eq!(book.best_ask().unwrap().0, dec!(0.47));
    }

    #[test]
    fn invalid_levels_are_rejected() {
        let mut book = seeded();
        assert!(!book.apply_delta(BookSide::Bid, Decimal::ZERO, dec!(5), 5));
        assert!(!book.apply_delta(BookSide::Bid, dec!(1.2), dec!(5), 6));
        assert!(!book.apply_delta(BookSide::Bid, dec!(0.5), dec!(-1), 7));
        // Snapshot filtering drops the bad rows but keeps the good ones.
        book.apply_snapshot(
            vec![(dec!(0.40), dec!(10)), (dec!(1.5), dec!(10))],
            vec![(dec!(0.60), dec!(10))],
            8,
        );
        assert_eq!(book.snapshot().bids().len(), 1);
    }

    #[test]
    fn crossed_book_is_flagged() {
        let mut book = LiveBook::new(TokenId::from("tok"));
        book.apply_snapshot(vec![(dec!(0.50), dec!(10))], vec![(dec!(0.48), dec!(10))], 1);
        assert!(book.is_crossed());
        assert!(book.snapshot().is_crossed());
    }

    #[test]
    fn bid_below_ask_invariant_holds_after_mutations() {
        let mut book = seeded();
        book.apply_delta(BookSide::Bid, dec!(0.455), dec!(5), 2);
        book.apply_delta(BookSide::Ask, dec!(0.465), dec!(5), 3);
        let (bid, _) = book.best_bid().unwrap();
        let (ask, _) = book.best_ask().unwrap();
        assert!(bid < ask);
    }

    #[test]
    fn deltas_reach_same_state_as_direct_snapshot() {
        // Applying the delta stream S -> S' equals applying S' directly.
        let mut via_deltas = seeded();
        via_deltas.apply_delta(BookSide::Bid, dec!(0.45), Decimal::ZERO, 2);
        via_deltas.apply_delta(BookSide::Ask, dec!(0.47), dec!(30), 3);

        let mut direct = LiveBook::new(TokenId::from("tok"));
        direct.apply_snapshot(
            vec![(dec!(0.44), dec!(100))],
            vec![(dec!(0.47), dec!(30)), (dec!(0.48), dec!(200))],
            3,
        );

        let a = via_deltas.snapshot();
        let b = direct.snapshot();
        assert_eq!(a.bids(), b.bids());
        assert_eq!(a.asks(), b.asks());
    }

    #[test]
    fn snapshot_orders_levels_best_first() {
        let snap = seeded().snapshot();
        assert_eq!(snap.bids()[0].price(), dec!(0.45));
        assert_eq!(snap.asks()[0].price(), dec!(0.47));
    }
}
