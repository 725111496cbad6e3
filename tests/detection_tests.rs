//! End-to-end detection scenarios across the bus, detectors and books.

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use polyarb::core::book::{BookSide, LiveBook};
use polyarb::core::bus::UpdateBus;
use polyarb::core::detect::{ArbitrageDetector, AtomicConfig, AtomicDetector, DetectorConfig};
use polyarb::core::domain::{
    Direction, ExchangeSide, MappingTable, MarketId, MarketMapping, MarketPair, MarketType,
    MarketUpdate, OrderBook, PriceLevel, TokenId, Venue,
};

fn mapping_table() -> Arc<MappingTable> {
    let table = MappingTable::new(dec!(0.85));
    table.replace(vec![MarketMapping {
        polymarket_id: MarketId::from("home-yes"),
        polymarket_question: "Will the home side win?".into(),
        polymarket_selection_side: "yes".into(),
        exchange_venue: Venue::Betfair,
        exchange_market_id: MarketId::from("1.2345"),
        exchange_runner_id: "47972".into(),
        exchange_side: ExchangeSide::Lay,
        market_type: MarketType::MatchOdds,
        confidence: dec!(0.95),
    }]);
    Arc::new(table)
}

/// Cross-venue single-leg scenario: Polymarket ask 0.45 against lay odds
/// 2.50 at 2% commission nets roughly a 9.2% edge.
#[tokio::test]
async fn cross_venue_opportunity_flows_through_the_bus() {
    let bus = UpdateBus::new(64);
    let detector = ArbitrageDetector::new(DetectorConfig::default(), mapping_table());

    // Exchange tick first: lay odds 2.50 -> q = 0.40 -> netted 0.412.
    bus.publish(MarketUpdate::new(
        Venue::Betfair,
        MarketId::from("1.2345"),
        dec!(0.412),
        dec!(0.51),
        dec!(300),
        dec!(300),
        dec!(0.02),
        1,
    ));
    // Then the CLOB tick.
    bus.publish(MarketUpdate::new(
        Venue::Polymarket,
        MarketId::from("home-yes"),
        dec!(0.43),
        dec!(0.45),
        dec!(500),
        dec!(500),
        Decimal::ZERO,
        1,
    ));

    let first = bus.recv().await;
    assert!(detector.on_update(first).is_empty());

    let second = bus.recv().await;
    let opportunities = detector.on_update(second);
    assert_eq!(opportunities.len(), 1);

    let opp = &opportunities[0];
    assert_eq!(opp.direction(), Direction::BuyPolyLayExchange);
    assert!(
        opp.ev_percent() > dec!(9.0) && opp.ev_percent() < dec!(9.5),
        "EV was {}",
        opp.ev_percent()
    );
    assert_eq!(opp.legs().len(), 2);
    assert_eq!(opp.confidence(), dec!(0.95));
}

/// Atomic split-sell scenario: YES bid 0.52 + NO bid 0.50 with a 0.5% fee
/// nets 0.0149 per unit, above a 0.005 floor.
#[test]
fn atomic_split_sell_scenario() {
    let pair = MarketPair::new(
        MarketId::from("m1"),
        "Will it rain?",
        TokenId::from("yes"),
        TokenId::from("no"),
    );
    let detector = AtomicDetector::new(AtomicConfig {
        epsilon: dec!(0.005),
        fee_rate: dec!(0.005),
        min_net_profit: dec!(0.005),
        min_relative_profit: dec!(0.002),
        min_top_notional: dec!(100),
    });

    let yes = OrderBook::with_levels(
        TokenId::from("yes"),
        vec![PriceLevel::new(dec!(0.52), dec!(500))],
        vec![PriceLevel::new(dec!(0.55), dec!(500))],
    );
    let no = OrderBook::with_levels(
        TokenId::from("no"),
        vec![PriceLevel::new(dec!(0.50), dec!(500))],
        vec![PriceLevel::new(dec!(0.53), dec!(500))],
    );

    let opp = detector.scan(&pair, &yes, &no).expect("split expected");
    assert_eq!(opp.direction(), Direction::AtomicSplit);

    // Suppressed when the floor exceeds the 0.0149 net.
    let strict = AtomicDetector::new(AtomicConfig {
        epsilon: dec!(0.005),
        fee_rate: dec!(0.005),
        min_net_profit: dec!(0.02),
        min_relative_profit: dec!(0.002),
        min_top_notional: dec!(100),
    });
    assert!(strict.scan(&pair, &yes, &no).is_none());
}

/// A live book fed snapshots then deltas serves consistent prices to the
/// detection path.
#[test]
fn book_updates_survive_the_snapshot_delta_path() {
    let mut live = LiveBook::new(TokenId::from("yes"));
    live.apply_snapshot(
        vec![(dec!(0.50), dec!(100))],
        vec![(dec!(0.54), dec!(100))],
        1,
    );
    live.apply_delta(BookSide::Bid, dec!(0.52), dec!(400), 2);

    let snapshot = live.snapshot();
    assert_eq!(snapshot.best_bid().unwrap().price(), dec!(0.52));
    assert!(!snapshot.is_crossed());
    // Depth queries stay consistent with the BBO invariant.
    assert!(snapshot.vwap_sell(dec!(100)).unwrap() <= dec!(0.52));
}

/// Freshness wins over completeness when the bus saturates.
#[test]
fn bus_overflow_prefers_fresh_same_market_updates() {
    let bus = UpdateBus::new(2);
    for seq in 1..=4 {
        bus.publish(MarketUpdate::new(
            Venue::Polymarket,
            MarketId::from("m"),
            dec!(0.44),
            dec!(0.46),
            dec!(1),
            dec!(1),
            Decimal::ZERO,
            seq,
        ));
    }
    assert_eq!(bus.dropped(), 2);

    let mut sequences = Vec::new();
    while let Some(update) = bus.try_recv() {
        sequences.push(update.sequence());
    }
    // The freshest updates survived.
    assert!(sequences.contains(&4));
}
