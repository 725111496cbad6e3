//! Cross-venue arbitrage detection.
//!
//! Detector workers consume normalized updates from the bus, pair each
//! update against the mapping table, and compare fee-adjusted prices.
//! When several mappings for the same underlying event fire at once, only
//! the highest-EV opportunity is emitted; the rest are suppressed for a
//! cooldown window to prevent double dispatch.

mod atomic;
mod latency;

pub use atomic::{AtomicConfig, AtomicDetector};
pub use latency::LatencyTracker;

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::debug;

use crate::core::domain::{
    Direction, ExchangeSide, LegHint, LegSide, MappingTable, MarketId, MarketMapping,
    MarketUpdate, Opportunity, TokenId, Venue,
};

/// Detector tuning.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Minimum EV (percent, net of fees) before an opportunity is emitted.
    pub min_ev_percent: Decimal,
    /// Updates older than this are skipped.
    pub staleness: Duration,
    /// Suppression window per underlying event after an emission.
    pub cooldown: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_ev_percent: Decimal::ZERO,
            staleness: Duration::from_millis(500),
            cooldown: Duration::from_millis(500),
        }
    }
}

/// Pairs updates against the mapping table and computes EV.
pub struct ArbitrageDetector {
    config: DetectorConfig,
    mappings: Arc<MappingTable>,
    /// Latest update per (venue, market).
    price_cache: DashMap<(Venue, MarketId), MarketUpdate>,
    /// Cooldown bookkeeping per underlying event.
    cooldowns: DashMap<String, Instant>,
    /// Ingestion + processing latency statistics.
    latency: LatencyTracker,
}

impl ArbitrageDetector {
    /// Create a detector over the given mapping table.
    #[must_use]
    pub fn new(config: DetectorConfig, mappings: Arc<MappingTable>) -> Self {
        Self {
            config,
            mappings,
            price_cache: DashMap::new(),
            cooldowns: DashMap::new(),
            latency: LatencyTracker::new(),
        }
    }

    /// Latency statistics handle.
    #[must_use]
    pub fn latency(&self) -> &LatencyTracker {
        &self.latency
    }

    /// Latest cached update for a key, if any.
    #[must_use]
    pub fn cached(&self, venue: Venue, market_id: &MarketId) -> Option<MarketUpdate> {
        self.price_cache
            .get(&(venue, market_id.clone()))
            .map(|entry| entry.clone())
    }

    /// Process one update, returning any emitted opportunities.
    pub fn on_update(&self, update: MarketUpdate) -> Vec<Opportunity> {
        let started = Instant::now();
        self.latency.record_ingestion(update.age());

        if update.is_stale(self.config.staleness) {
            debug!(
                venue = %update.venue(),
                market = %update.market_id(),
                age_ms = update.age().as_millis() as u64,
                "Skipping stale update"
            );
            return Vec::new();
        }

        let key = update.key();
        // Drop reordered updates: a cached higher sequence supersedes this one.
        if let Some(existing) = self.price_cache.get(&key) {
            if existing.supersedes(&update) {
                return Vec::new();
            }
        }
        self.price_cache.insert(key, update.clone());

        let mappings = self.mappings.lookup(update.venue(), update.market_id());
        let mut candidates: Vec<Opportunity> = mappings
            .iter()
            .filter_map(|mapping| self.evaluate(mapping, &update))
            .collect();

        // Highest EV first; later candidates for the same event fall into
        // the cooldown set by the winner.
        candidates.sort_by(|a, b| b.ev_percent().cmp(&a.ev_percent()));

        let emitted = candidates
            .into_iter()
            .filter(|opp| self.claim_cooldown(opp.event_key()))
            .collect();

        self.latency.record_processing(started.elapsed());
        emitted
    }

    /// Evaluate one mapping against the freshest prices of both venues.
    fn evaluate(&self, mapping: &Arc<MarketMapping>, trigger: &MarketUpdate) -> Option<Opportunity> {
        let (poly, exchange) = if trigger.venue() == Venue::Polymarket {
            let other = self.cached(mapping.exchange_venue, &mapping.exchange_market_id)?;
            (trigger.clone(), other)
        } else {
            let other = self.cached(Venue::Polymarket, &mapping.polymarket_id)?;
            (other, trigger.clone())
        };

        if poly.is_stale(self.config.staleness) || exchange.is_stale(self.config.staleness) {
            return None;
        }

        let poly_ask = poly.best_ask();
        if poly_ask <= Decimal::ZERO || poly_ask >= Decimal::ONE {
            return None;
        }

        // Exchange prices are already netted implied probabilities. Laying
        // sells the outcome (bid side), backing buys it (ask side).
        let (direction, exchange_prob, exchange_size, exchange_side) = match mapping.exchange_side {
            ExchangeSide::Lay => (
                Direction::BuyPolyLayExchange,
                exchange.best_bid(),
                exchange.bid_size(),
                LegSide::Lay,
            ),
            ExchangeSide::Back => (
                Direction::BuyPolyBackExchange,
                exchange.best_ask(),
                exchange.ask_size(),
                LegSide::Back,
            ),
        };
        if exchange_prob <= Decimal::ZERO || exchange_prob >= Decimal::ONE {
            return None;
        }

        // EV of buying the CLOB outcome against the exchange quote:
        // (p / q_net - 1) * 100, both prices fee-blind by construction.
        let ev_percent = (poly_ask / exchange_prob - Decimal::ONE) * Decimal::ONE_HUNDRED;
        if ev_percent <= self.config.min_ev_percent {
            return None;
        }

        let legs = vec![
            LegHint {
                venue: Venue::Polymarket,
                market_id: mapping.polymarket_id.clone(),
                token_id: mapping.polymarket_id.to_token(),
                side: LegSide::Buy,
                price: poly_ask,
                available: poly.ask_size(),
            },
            LegHint {
                venue: mapping.exchange_venue,
                market_id: mapping.exchange_market_id.clone(),
                token_id: TokenId::from(mapping.exchange_runner_id.clone()),
                side: exchange_side,
                price: exchange_prob,
                available: exchange_size,
            },
        ];

        Some(Opportunity::new(
            direction,
            mapping.event_key(),
            mapping.polymarket_question.clone(),
            legs,
            ev_percent,
            mapping.confidence,
        ))
    }

    /// Returns true when the event is free to emit, claiming the window.
    fn claim_cooldown(&self, event_key: &str) -> bool {
        let now = Instant::now();
        // The read guard must drop before the insert touches the shard.
        let suppressed = self
            .cooldowns
            .get(event_key)
            .map(|last| now.duration_since(*last) < self.config.cooldown)
            .unwrap_or(false);
        if suppressed {
            return false;
        }
        self.cooldowns.insert(event_key.to_string(), now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::MarketType;
    use rust_decimal_macros::dec;

    fn mapping() -> MarketMapping {
        MarketMapping {
            polymarket_id: MarketId::from("poly-1"),
            polymarket_question: "Will the home side win?".into(),
            polymarket_selection_side: "yes".into(),
            exchange_venue: Venue::Betfair,
            exchange_market_id: MarketId::from("1.234"),
            exchange_runner_id: "47972".into(),
            exchange_side: ExchangeSide::Lay,
            market_type: MarketType::MatchOdds,
            confidence: dec!(0.95),
        }
    }

    fn table() -> Arc<MappingTable> {
        let table = MappingTable::new(dec!(0.5));
        table.replace(vec![mapping()]);
        Arc::new(table)
    }

    fn poly_update(ask: Decimal, seq: u64) -> MarketUpdate {
        MarketUpdate::new(
            Venue::Polymarket,
            MarketId::from("poly-1"),
            ask - dec!(0.02),
            ask,
            dec!(500),
            dec!(500),
            Decimal::ZERO,
            seq,
        )
    }

    fn exchange_update(lay_prob: Decimal, seq: u64) -> MarketUpdate {
        // Lay side is the bid in probability space; back sits just above.
        MarketUpdate::new(
            Venue::Betfair,
            MarketId::from("1.234"),
            lay_prob,
            lay_prob + dec!(0.01),
            dec!(300),
            dec!(300),
            dec!(0.02),
            seq,
        )
    }

    #[test]
    fn cross_venue_ev_matches_lay_formula() {
        let detector = ArbitrageDetector::new(DetectorConfig::default(), table());

        // Lay odds 2.50 at 2% commission arrive as q_net = 0.412.
        assert!(detector.on_update(exchange_update(dec!(0.412), 1)).is_empty());
        let opps = detector.on_update(poly_update(dec!(0.45), 1));

        assert_eq!(opps.len(), 1);
        let opp = &opps[0];
        assert_eq!(opp.direction(), Direction::BuyPolyLayExchange);
        // EV = (0.45 / 0.412 - 1) * 100 ≈ 9.2%
        assert!(opp.ev_percent() > dec!(9.0) && opp.ev_percent() < dec!(9.5));
        assert_eq!(opp.legs().len(), 2);
        assert_eq!(opp.legs()[0].side, LegSide::Buy);
        assert_eq!(opp.legs()[1].side, LegSide::Lay);
    }

    #[test]
    fn missing_counterpart_emits_nothing() {
        let detector = ArbitrageDetector::new(DetectorConfig::default(), table());
        assert!(detector.on_update(poly_update(dec!(0.45), 1)).is_empty());
    }

    #[test]
    fn negative_ev_is_suppressed() {
        let detector = ArbitrageDetector::new(DetectorConfig::default(), table());
        detector.on_update(exchange_update(dec!(0.50), 1));
        assert!(detector.on_update(poly_update(dec!(0.45), 1)).is_empty());
    }

    #[test]
    fn min_ev_threshold_filters_small_edges() {
        let config = DetectorConfig {
            min_ev_percent: dec!(10),
            ..DetectorConfig::default()
        };
        let detector = ArbitrageDetector::new(config, table());
        detector.on_update(exchange_update(dec!(0.412), 1));
        // 9.2% EV sits below the 10% floor.
        assert!(detector.on_update(poly_update(dec!(0.45), 1)).is_empty());
    }

    #[test]
    fn cooldown_suppresses_repeat_emissions() {
        let detector = ArbitrageDetector::new(DetectorConfig::default(), table());
        detector.on_update(exchange_update(dec!(0.412), 1));

        assert_eq!(detector.on_update(poly_update(dec!(0.45), 1)).len(), 1);
        // Same event ticks again inside the window.
        assert!(detector.on_update(poly_update(dec!(0.44), 2)).is_empty());
    }

    #[test]
    fn cooldown_expires() {
        let config = DetectorConfig {
            cooldown: Duration::from_millis(10),
            ..DetectorConfig::default()
        };
        let detector = ArbitrageDetector::new(config, table());
        detector.on_update(exchange_update(dec!(0.412), 1));

        assert_eq!(detector.on_update(poly_update(dec!(0.45), 1)).len(), 1);
        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(detector.on_update(poly_update(dec!(0.45), 2)).len(), 1);
    }

    #[test]
    fn reordered_updates_are_dropped() {
        let detector = ArbitrageDetector::new(DetectorConfig::default(), table());
        detector.on_update(poly_update(dec!(0.45), 5));
        detector.on_update(poly_update(dec!(0.99), 3));

        let cached = detector
            .cached(Venue::Polymarket, &MarketId::from("poly-1"))
            .unwrap();
        assert_eq!(cached.sequence(), 5);
        assert_eq!(cached.best_ask(), dec!(0.45));
    }

    #[test]
    fn back_mappings_use_the_ask_side() {
        let table = MappingTable::new(dec!(0.5));
        let mut m = mapping();
        m.exchange_side = ExchangeSide::Back;
        table.replace(vec![m]);
        let detector = ArbitrageDetector::new(DetectorConfig::default(), Arc::new(table));

        detector.on_update(exchange_update(dec!(0.50), 1)); // back/ask = 0.51
        let opps = detector.on_update(poly_update(dec!(0.55), 1));
        assert_eq!(opps.len(), 1);
        assert_eq!(opps[0].direction(), Direction::BuyPolyBackExchange);
        assert_eq!(opps[0].legs()[1].side, LegSide::Back);
    }
}
