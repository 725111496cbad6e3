//! Execution state-machine scenarios: recovery by retry, recovery by
//! liquidation, and the risk kill switch feeding back into admission.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use polyarb::core::book::BookCache;
use polyarb::core::domain::{
    ExecutionLeg, ExecutionResult, LegSide, MarketId, OrderBook, OrderId, PriceLevel, TokenId,
    Venue,
};
use polyarb::core::exec::{
    RecoveryConfig, RecoveryHandler, RecoveryState, RouterConfig, SmartRouter, StrategyState,
    VwapEngine,
};
use polyarb::core::risk::{RiskConfig, RiskGuardian};
use polyarb::core::venue::{BreakerConfig, BreakerSet, OrderGateway};

/// Gateway that pops scripted results, falling back to failures.
struct ScriptedGateway {
    venue: Venue,
    script: Mutex<VecDeque<ExecutionResult>>,
    seen: Mutex<Vec<ExecutionLeg>>,
}

impl ScriptedGateway {
    fn new(venue: Venue, script: Vec<ExecutionResult>) -> Arc<Self> {
        Arc::new(Self {
            venue,
            script: Mutex::new(script.into()),
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl OrderGateway for ScriptedGateway {
    fn venue(&self) -> Venue {
        self.venue
    }

    async fn place_order(&self, leg: &ExecutionLeg) -> polyarb::error::Result<ExecutionResult> {
        self.seen.lock().push(leg.clone());
        let next = self.script.lock().pop_front();
        Ok(next.unwrap_or_else(|| ExecutionResult::failed(leg.size, "script exhausted")))
    }

    async fn cancel(&self, _order_id: &OrderId) -> polyarb::error::Result<()> {
        Ok(())
    }
}

fn filled(size: Decimal, price: Decimal) -> ExecutionResult {
    ExecutionResult::filled(OrderId::random(), size, price)
}

fn failed(size: Decimal) -> ExecutionResult {
    ExecutionResult::failed(size, "rejected")
}

fn leg(venue: Venue, token: &str, side: LegSide, price: Decimal) -> ExecutionLeg {
    ExecutionLeg {
        venue,
        market_id: MarketId::from(token),
        token_id: TokenId::from(token),
        side,
        size: dec!(100),
        limit_price: price,
        book: None,
        timeout: Duration::from_millis(300),
        allow_chase: true,
        chase_breakeven_price: None,
        raw_tx_hex: None,
    }
}

fn recovery_handler(
    gateways: HashMap<Venue, Arc<dyn OrderGateway>>,
    books: Arc<BookCache>,
) -> RecoveryHandler {
    RecoveryHandler::new(
        RecoveryConfig {
            retry_window: Duration::from_millis(500),
            attempt_timeout: Duration::from_millis(100),
            ..RecoveryConfig::default()
        },
        gateways,
        books,
    )
}

/// Partial-fill recovery: leg A fills, leg B fails, retries walk the price
/// to 0.46, 0.47, 0.48 and the third retry fills.
#[tokio::test]
async fn partial_fill_recovers_on_third_retry() {
    let gateway = ScriptedGateway::new(
        Venue::Polymarket,
        vec![failed(dec!(100)), failed(dec!(100)), filled(dec!(100), dec!(0.48))],
    );
    let mut gateways: HashMap<Venue, Arc<dyn OrderGateway>> = HashMap::new();
    gateways.insert(Venue::Polymarket, gateway.clone());

    let handler = recovery_handler(gateways, Arc::new(BookCache::new()));
    let filled_legs = vec![(
        leg(Venue::Polymarket, "a", LegSide::Buy, dec!(0.52)),
        filled(dec!(100), dec!(0.52)),
    )];
    let failed_legs = vec![leg(Venue::Polymarket, "b", LegSide::Buy, dec!(0.45))];

    let outcome = handler.handle(filled_legs, failed_legs).await;
    assert_eq!(outcome.state, RecoveryState::Recovered);
    assert_eq!(outcome.residual_inventory, Decimal::ZERO);

    let seen = gateway.seen.lock();
    let prices: Vec<Decimal> = seen.iter().map(|l| l.limit_price).collect();
    assert_eq!(prices, vec![dec!(0.46), dec!(0.47), dec!(0.48)]);
}

/// Liquidation: every retry fails, leg A is dumped at best_bid - 0.02 and
/// the realized loss lands in the risk guardian's streak.
#[tokio::test]
async fn exhausted_retries_liquidate_and_count_a_loss() {
    // Hedge leg on SX never fills; CLOB liquidation fills.
    let sx = ScriptedGateway::new(Venue::Sx, vec![]);
    let poly = ScriptedGateway::new(Venue::Polymarket, vec![filled(dec!(100), dec!(0.50))]);
    let mut gateways: HashMap<Venue, Arc<dyn OrderGateway>> = HashMap::new();
    gateways.insert(Venue::Sx, sx);
    gateways.insert(Venue::Polymarket, poly.clone());

    let books = Arc::new(BookCache::new());
    books.publish(OrderBook::with_levels(
        TokenId::from("a"),
        vec![PriceLevel::new(dec!(0.52), dec!(500))],
        vec![PriceLevel::new(dec!(0.55), dec!(500))],
    ));

    let handler = RecoveryHandler::new(
        RecoveryConfig {
            retry_window: Duration::from_millis(120),
            attempt_timeout: Duration::from_millis(50),
            ..RecoveryConfig::default()
        },
        gateways,
        books,
    );

    let filled_legs = vec![(
        leg(Venue::Polymarket, "a", LegSide::Buy, dec!(0.52)),
        filled(dec!(100), dec!(0.52)),
    )];
    let failed_legs = vec![leg(Venue::Sx, "b", LegSide::Lay, dec!(0.40))];

    let outcome = handler.handle(filled_legs, failed_legs).await;
    assert_eq!(outcome.state, RecoveryState::Liquidated);
    // Exit was requested at best_bid - 0.02 = 0.50.
    let exits = poly.seen.lock();
    assert_eq!(exits.len(), 1);
    assert_eq!(exits[0].side, LegSide::Sell);
    assert_eq!(exits[0].limit_price, dec!(0.50));
    // Loss: (0.50 - 0.52) * 100 = -2.
    assert_eq!(outcome.realized_pnl, dec!(-2.00));

    // The loss feeds the guardian's consecutive-loss streak.
    let guardian = RiskGuardian::new(
        RiskConfig {
            max_consecutive_losses: 1,
            ..RiskConfig::default()
        },
        dec!(1000),
    );
    guardian.record_trade(outcome.realized_pnl);
    assert!(guardian.can_trade().is_err());
}

fn seeded_books() -> Arc<BookCache> {
    let cache = BookCache::new();
    cache.publish(OrderBook::with_levels(
        TokenId::from("yes"),
        vec![PriceLevel::new(dec!(0.52), dec!(500))],
        vec![PriceLevel::new(dec!(0.55), dec!(500))],
    ));
    cache.publish(OrderBook::with_levels(
        TokenId::from("no"),
        vec![PriceLevel::new(dec!(0.50), dec!(500))],
        vec![PriceLevel::new(dec!(0.53), dec!(500))],
    ));
    Arc::new(cache)
}

fn router(
    gateways: HashMap<Venue, Arc<dyn OrderGateway>>,
    books: Arc<BookCache>,
    risk: Arc<RiskGuardian>,
) -> SmartRouter {
    let recovery = RecoveryHandler::new(
        RecoveryConfig {
            retry_window: Duration::from_millis(80),
            attempt_timeout: Duration::from_millis(40),
            ..RecoveryConfig::default()
        },
        gateways.clone(),
        Arc::clone(&books),
    );
    SmartRouter::new(
        RouterConfig {
            min_net_profit: dec!(0.05),
        },
        gateways,
        VwapEngine::new(dec!(0.005)),
        books,
        BreakerSet::new(BreakerConfig::default()),
        risk,
        recovery,
    )
}

/// Full round trip through the router: dispatch, full fill, profit
/// recorded against equity.
#[tokio::test]
async fn router_full_fill_updates_equity() {
    let gateway = ScriptedGateway::new(Venue::Polymarket, vec![]);
    let mut gateways: HashMap<Venue, Arc<dyn OrderGateway>> = HashMap::new();
    gateways.insert(Venue::Polymarket, gateway);

    let risk = Arc::new(RiskGuardian::new(RiskConfig::default(), dec!(1000)));
    let router = router(gateways, seeded_books(), Arc::clone(&risk));

    let legs = vec![
        leg(Venue::Polymarket, "yes", LegSide::Sell, dec!(0.52)),
        leg(Venue::Polymarket, "no", LegSide::Sell, dec!(0.50)),
    ];
    let report = router.execute(legs, dec!(-100)).await;

    assert_eq!(report.state, StrategyState::FullFill);
    assert!(report.net_profit_projected > Decimal::ZERO);
    assert!(risk.equity() > dec!(1000));
}

/// Risk denial after a losing streak blocks the next dispatch.
#[tokio::test]
async fn losing_streak_blocks_the_next_strategy() {
    let gateway = ScriptedGateway::new(Venue::Polymarket, vec![]);
    let mut gateways: HashMap<Venue, Arc<dyn OrderGateway>> = HashMap::new();
    gateways.insert(Venue::Polymarket, gateway);

    let risk = Arc::new(RiskGuardian::new(
        RiskConfig {
            max_daily_loss: dec!(20),
            max_consecutive_losses: 100,
            max_drawdown_pct: dec!(0.99),
            ..RiskConfig::default()
        },
        dec!(1000),
    ));
    // Three losing recoveries summing to -22.
    risk.record_trade(dec!(-8));
    risk.record_trade(dec!(-7));
    risk.record_trade(dec!(-7));

    let router = router(gateways, seeded_books(), risk);
    let legs = vec![leg(Venue::Polymarket, "yes", LegSide::Sell, dec!(0.52))];
    let report = router.execute(legs, dec!(0)).await;

    assert_eq!(report.state, StrategyState::Aborted);
    assert_eq!(
        report.reason.as_deref(),
        Some("blocked_by_risk:daily_loss_limit")
    );
}
