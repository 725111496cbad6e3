//! Cross-venue market mapping table.
//!
//! Mappings are produced by an external entity-resolution job and consumed
//! read-only here. The table is reloaded on SIGHUP (or a timer) with an
//! atomic swap, so readers always see a complete generation.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::id::MarketId;
use super::venue::Venue;
use crate::error::{ConfigError, Result};

/// Which side of the exchange market the mapped strategy takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExchangeSide {
    Back,
    Lay,
}

/// Exchange market type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketType {
    MatchOdds,
    OverUnder,
    Draw,
}

/// A single cross-venue market link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketMapping {
    pub polymarket_id: MarketId,
    pub polymarket_question: String,
    /// Which Polymarket outcome token the link refers to ("yes"/"no").
    pub polymarket_selection_side: String,
    pub exchange_venue: Venue,
    pub exchange_market_id: MarketId,
    pub exchange_runner_id: String,
    pub exchange_side: ExchangeSide,
    pub market_type: MarketType,
    /// Matching confidence from the resolution job, in [0, 1].
    pub confidence: Decimal,
}

impl MarketMapping {
    /// Stable key identifying the underlying event, used for opportunity
    /// cooldown suppression.
    #[must_use]
    pub fn event_key(&self) -> String {
        format!("{}:{}", self.polymarket_id, self.exchange_market_id)
    }
}

/// One loaded generation of the mapping table with both lookup indices.
#[derive(Debug, Default)]
struct MappingIndex {
    by_polymarket_id: HashMap<MarketId, Vec<Arc<MarketMapping>>>,
    by_exchange_id: HashMap<MarketId, Vec<Arc<MarketMapping>>>,
    len: usize,
}

impl MappingIndex {
    fn build(mappings: Vec<MarketMapping>, min_confidence: Decimal) -> Self {
        let mut index = Self::default();
        for mapping in mappings {
            if mapping.confidence < min_confidence {
                warn!(
                    polymarket_id = %mapping.polymarket_id,
                    exchange_market_id = %mapping.exchange_market_id,
                    confidence = %mapping.confidence,
                    "Rejecting low-confidence mapping"
                );
                continue;
            }
            let mapping = Arc::new(mapping);
            index
                .by_polymarket_id
                .entry(mapping.polymarket_id.clone())
                .or_default()
                .push(Arc::clone(&mapping));
            index
                .by_exchange_id
                .entry(mapping.exchange_market_id.clone())
                .or_default()
                .push(mapping);
            index.len += 1;
        }
        index
    }
}

/// Read-mostly mapping table with atomic-swap reload.
pub struct MappingTable {
    index: RwLock<Arc<MappingIndex>>,
    min_confidence: Decimal,
}

impl MappingTable {
    /// Create an empty table with the given confidence floor.
    #[must_use]
    pub fn new(min_confidence: Decimal) -> Self {
        Self {
            index: RwLock::new(Arc::new(MappingIndex::default())),
            min_confidence,
        }
    }

    /// Load a table from a JSON file (an array of mappings).
    pub fn load(path: impl AsRef<Path>, min_confidence: Decimal) -> Result<Self> {
        let table = Self::new(min_confidence);
        table.reload(path)?;
        Ok(table)
    }

    /// Replace the current generation from the given JSON file.
    ///
    /// On parse failure the previous generation stays in place.
    pub fn reload(&self, path: impl AsRef<Path>) -> Result<()> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::ReadFile)?;
        let mappings: Vec<MarketMapping> = serde_json::from_str(&raw)?;
        let loaded = mappings.len();
        let index = MappingIndex::build(mappings, self.min_confidence);
        let kept = index.len;
        *self.index.write() = Arc::new(index);
        info!(loaded, kept, "Mapping table reloaded");
        Ok(())
    }

    /// Replace the current generation from an in-memory set (tests, seeds).
    pub fn replace(&self, mappings: Vec<MarketMapping>) {
        let index = MappingIndex::build(mappings, self.min_confidence);
        *self.index.write() = Arc::new(index);
    }

    /// All mappings involving the given `(venue, market_id)`.
    #[must_use]
    pub fn lookup(&self, venue: Venue, market_id: &MarketId) -> Vec<Arc<MarketMapping>> {
        let index = Arc::clone(&self.index.read());
        let hits = match venue {
            Venue::Polymarket => index.by_polymarket_id.get(market_id),
            Venue::Betfair | Venue::Sx => index.by_exchange_id.get(market_id),
        };
        hits.map(|v| {
            v.iter()
                .filter(|m| venue == Venue::Polymarket || m.exchange_venue == venue)
                .cloned()
                .collect()
        })
        .unwrap_or_default()
    }

    /// Exchange market ids for one venue in the current generation, used
    /// to build stream subscriptions.
    #[must_use]
    pub fn exchange_market_ids(&self, venue: Venue) -> Vec<MarketId> {
        let index = Arc::clone(&self.index.read());
        index
            .by_exchange_id
            .iter()
            .filter(|(_, mappings)| mappings.iter().any(|m| m.exchange_venue == venue))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Number of mappings in the current generation.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.read().len
    }

    /// Whether the current generation is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn mapping(poly: &str, exch: &str, confidence: Decimal) -> MarketMapping {
        MarketMapping {
            polymarket_id: MarketId::from(poly),
            polymarket_question: "Will the home side win?".into(),
            polymarket_selection_side: "yes".into(),
            exchange_venue: Venue::Betfair,
            exchange_market_id: MarketId::from(exch),
            exchange_runner_id: "47972".into(),
            exchange_side: ExchangeSide::Lay,
            market_type: MarketType::MatchOdds,
            confidence,
        }
    }

    #[test]
    fn lookup_works_from_both_sides() {
        let table = MappingTable::new(dec!(0.5));
        table.replace(vec![mapping("poly-1", "1.2345", dec!(0.95))]);

        let from_poly = table.lookup(Venue::Polymarket, &MarketId::from("poly-1"));
        assert_eq!(from_poly.len(), 1);
        assert_eq!(from_poly[0].exchange_market_id.as_str(), "1.2345");

        let from_exchange = table.lookup(Venue::Betfair, &MarketId::from("1.2345"));
        assert_eq!(from_exchange.len(), 1);
        assert_eq!(from_exchange[0].polymarket_id.as_str(), "poly-1");
    }

    #[test]
    fn low_confidence_mappings_are_rejected() {
        let table = MappingTable::new(dec!(0.85));
        table.replace(vec![
            mapping("poly-1", "1.1", dec!(0.95)),
            mapping("poly-2", "1.2", dec!(0.40)),
        ]);

        assert_eq!(table.len(), 1);
        assert!(table
            .lookup(Venue::Polymarket, &MarketId::from("poly-2"))
            .is_empty());
    }

    #[test]
    fn lookup_filters_by_exchange_venue() {
        let table = MappingTable::new(dec!(0.5));
        table.replace(vec![mapping("poly-1", "1.1", dec!(0.9))]);

        // The mapping targets Betfair, so an SX lookup of the same id misses.
        assert!(table.lookup(Venue::Sx, &MarketId::from("1.1")).is_empty());
    }

    #[test]
    fn reload_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mappings.json");
        let payload = serde_json::to_string(&vec![mapping("poly-9", "1.9", dec!(0.99))]).unwrap();
        std::fs::write(&path, payload).unwrap();

        let table = MappingTable::load(&path, dec!(0.85)).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn replace_swaps_whole_generation() {
        let table = MappingTable::new(dec!(0.5));
        table.replace(vec![mapping("a", "1.1", dec!(0.9))]);
        table.replace(vec![mapping("b", "1.2", dec!(0.9))]);

        assert!(table.lookup(Venue::Polymarket, &MarketId::from("a")).is_empty());
        assert_eq!(table.lookup(Venue::Polymarket, &MarketId::from("b")).len(), 1);
    }
}
