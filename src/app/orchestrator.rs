//! Composition root and task topology.
//!
//! The orchestrator constructs every shared service exactly once and
//! injects handles into the components that need them. Logical tasks:
//!
//! - one ingestion task per enabled venue (owns the transport, applies
//!   books, publishes normalized updates),
//! - a bounded pool of detector workers consuming the bus,
//! - a mapping reload task (SIGHUP + timer),
//! - watchdog tasks for bus overflow, detection latency and risk state,
//! - the metrics HTTP exporter.
//!
//! Shutdown cancels ingestion, drains the bus with a deadline, then
//! aborts the remaining tasks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::{Config, Mode};
use crate::core::book::BookCache;
use crate::core::bus::{OverflowAlarm, UpdateBus};
use crate::core::detect::{ArbitrageDetector, AtomicDetector};
use crate::core::domain::{
    ConstraintGraph, Direction, ExecutionLeg, LegHint, LegSide, MappingTable, MarketId,
    MarketPair, MarketUpdate, Opportunity, TokenId, Venue,
};
use crate::core::exec::{
    GasEstimator, KellySizer, RecoveryHandler, RpcRacer, SmartRouter, StrategyState, VwapEngine,
};
use crate::core::projector::{CoordinateSignal, HighsOracle, PolytopeProjector};
use crate::core::risk::{DenyReason, RiskGuardian};
use crate::core::service::{AuditEvent, AuditLog, Metrics, PaperGateway, PaperLedger};
use crate::core::venue::{
    Backoff, BetfairGateway, BetfairGatewayConfig, BetfairStream, BreakerSet, MarketDataStream,
    MarketEvent, OrderGateway, PolymarketGateway, PolymarketStream, Signer, SxGateway, SxStream,
};
use crate::error::Result;

/// How long the shutdown path waits for the bus to drain.
const DRAIN_DEADLINE: Duration = Duration::from_secs(5);
/// Cadence of the watchdog tasks.
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(10);
/// Detection latency contract: p99 over this for 30s raises the alert.
const LATENCY_BOUND_MS: f64 = 100.0;
const LATENCY_SUSTAIN: Duration = Duration::from_secs(30);

/// Why the engine stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Operator shutdown (signal).
    Shutdown,
    /// A risk kill switch forced the stop.
    RiskTriggered,
    /// Signer or other unrecoverable failure.
    Fatal,
}

/// Engine composition root.
pub struct Orchestrator {
    config: Config,
    mode: Mode,
    metrics: Arc<Metrics>,
    audit: Arc<AuditLog>,
    books: Arc<BookCache>,
    bus: Arc<UpdateBus>,
    mappings: Arc<MappingTable>,
    risk: Arc<RiskGuardian>,
    breakers: BreakerSet,
    detector: Arc<ArbitrageDetector>,
    atomic: Arc<AtomicDetector>,
    projector: Arc<PolytopeProjector>,
    kelly: KellySizer,
    router: Arc<SmartRouter>,
    pairs: Arc<Vec<MarketPair>>,
    constraint_graphs: Arc<Vec<ConstraintGraph>>,
    paper_ledger: Option<Arc<PaperLedger>>,
    signer: Option<Arc<dyn Signer>>,
    /// Set on unrecoverable failures; the watchdog turns it into an exit.
    fatal: parking_lot::Mutex<Option<String>>,
}

impl Orchestrator {
    /// Build the engine from configuration. This is the only place that
    /// constructs shared services.
    pub fn build(config: Config, mode: Mode) -> Result<Self> {
        let metrics = Arc::new(Metrics::new()?);
        let audit = Arc::new(AuditLog::open(&config.app.audit_log)?);
        let books = Arc::new(BookCache::new());
        let bus = Arc::new(UpdateBus::new(config.app.bus_capacity));

        let mappings = Arc::new(MappingTable::new(config.app.min_mapping_confidence));
        match mappings.reload(&config.app.mappings_file) {
            Ok(()) => {}
            Err(e) => warn!(error = %e, "Mapping table unavailable at startup"),
        }

        let constraint_graphs = Arc::new(load_constraint_graphs(&config));

        let risk = Arc::new(RiskGuardian::new(config.risk_config(), config.app.bankroll));
        let breakers = BreakerSet::new(config.breaker_config());
        let detector = Arc::new(ArbitrageDetector::new(
            config.detector_config(),
            Arc::clone(&mappings),
        ));
        let atomic = Arc::new(AtomicDetector::new(config.atomic_config()));
        let projector = Arc::new(PolytopeProjector::new(
            config.projector_config(),
            Arc::new(HighsOracle::new()),
        ));
        let kelly = KellySizer::new(config.kelly_config());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;

        let gateways = build_gateways(&config, mode, &http);
        let vwap = VwapEngine::new(config.execution.slippage_penalty);
        let recovery = RecoveryHandler::new(
            config.recovery_config(),
            gateways.clone(),
            Arc::clone(&books),
        );

        let mut router = SmartRouter::new(
            config.router_config(),
            gateways,
            vwap,
            Arc::clone(&books),
            breakers.clone(),
            Arc::clone(&risk),
            recovery,
        )
        .with_metrics(Arc::clone(&metrics))
        .with_audit(Arc::clone(&audit));

        if config.rpc.endpoints.len() >= 2 {
            let gas = Arc::new(GasEstimator::new(config.gas_config(), http.clone()));
            let racer = Arc::new(RpcRacer::new(config.rpc_config(), http));
            router = router.with_chain(gas, racer);
        }

        let pairs = Arc::new(
            config
                .polymarket
                .markets
                .iter()
                .map(|m| {
                    MarketPair::new(
                        MarketId::from(m.market_id.clone()),
                        m.question.clone(),
                        TokenId::from(m.yes_token.clone()),
                        TokenId::from(m.no_token.clone()),
                    )
                })
                .collect::<Vec<_>>(),
        );

        let paper_ledger = if mode == Mode::Paper {
            Some(Arc::new(PaperLedger::create(
                &config.app.paper_ledger,
                config.app.bankroll,
            )?))
        } else {
            None
        };

        Ok(Self {
            config,
            mode,
            metrics,
            audit,
            books,
            bus,
            mappings,
            risk,
            breakers,
            detector,
            atomic,
            projector,
            kelly,
            router: Arc::new(router),
            pairs,
            constraint_graphs,
            paper_ledger,
            signer: None,
            fatal: parking_lot::Mutex::new(None),
        })
    }

    /// Attach an external signing capability for on-chain legs.
    #[must_use]
    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Run until a shutdown signal or a risk-triggered stop.
    pub async fn run(self: Arc<Self>) -> Result<ExitReason> {
        info!(mode = ?self.mode, "Engine starting");

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        let (stop_tx, mut stop_rx) = tokio::sync::mpsc::channel::<ExitReason>(1);

        // Metrics exporter.
        {
            let metrics = Arc::clone(&self.metrics);
            let port = self.config.app.metrics_port;
            tasks.push(tokio::spawn(async move {
                if let Err(e) = metrics.serve(port).await {
                    error!(error = %e, "Metrics exporter stopped");
                }
            }));
        }

        // Ingestion tasks.
        let poly_tokens: Vec<TokenId> = self.subscription_tokens();
        {
            let stream = PolymarketStream::new(self.config.polymarket_config());
            tasks.push(Arc::clone(&self).spawn_ingestion(stream, poly_tokens));
        }
        if self.config.betfair.enabled {
            let markets = self.exchange_markets(Venue::Betfair);
            let stream = BetfairStream::new(self.config.betfair_config());
            tasks.push(Arc::clone(&self).spawn_ingestion(stream, markets));
        }
        if self.config.sx.enabled {
            let markets = self.exchange_markets(Venue::Sx);
            let http = reqwest::Client::new();
            let stream = SxStream::new(self.config.sx_config(), http);
            tasks.push(Arc::clone(&self).spawn_ingestion(stream, markets));
        }

        // Detector worker pool.
        for worker in 0..self.config.worker_count() {
            let this = Arc::clone(&self);
            tasks.push(tokio::spawn(async move {
                this.worker_loop(worker).await;
            }));
        }

        // Mapping reload: SIGHUP and timer.
        tasks.push(Arc::clone(&self).spawn_mapping_reload());

        // Watchdogs.
        tasks.push(Arc::clone(&self).spawn_watchdogs(stop_tx));

        let reason = stop_rx.recv().await.unwrap_or(ExitReason::Shutdown);
        self.shutdown(tasks).await;
        Ok(reason)
    }

    /// Graceful shutdown: stop producers, drain, abort.
    async fn shutdown(&self, tasks: Vec<JoinHandle<()>>) {
        info!("Shutting down, draining update bus");
        let drained = self.bus.drain(DRAIN_DEADLINE).await;
        debug!(drained = drained.len(), "Bus drained");
        for task in tasks {
            task.abort();
        }
        info!("Engine stopped");
    }

    /// All Polymarket tokens we track: every side of every configured pair.
    fn subscription_tokens(&self) -> Vec<TokenId> {
        self.pairs
            .iter()
            .flat_map(|p| [p.yes_token().clone(), p.no_token().clone()])
            .collect()
    }

    /// Exchange market ids referenced by the current mapping generation.
    /// The mapping table is the source of truth for which exchange markets
    /// matter; subscriptions replay on every reconnect.
    fn exchange_markets(&self, venue: Venue) -> Vec<TokenId> {
        self.mappings
            .exchange_market_ids(venue)
            .into_iter()
            .map(|id| id.to_token())
            .collect()
    }

    /// One durable ingestion task: connect, subscribe, pump events,
    /// reconnect with jittered backoff on any transport failure.
    fn spawn_ingestion<S>(self: Arc<Self>, mut stream: S, tokens: Vec<TokenId>) -> JoinHandle<()>
    where
        S: MarketDataStream + 'static,
    {
        let this = self;
        tokio::spawn(async move {
            let venue = stream.venue();
            let label = venue.as_str();
            let mut backoff = Backoff::new(this.config.backoff_config());
            let mut reported_decode_errors = 0u64;

            loop {
                match stream.connect().await {
                    Ok(()) => {}
                    Err(e) if e.is_transient() => {
                        this.metrics.venue_connected.with_label_values(&[label]).set(0.0);
                        this.metrics.reconnects_total.with_label_values(&[label]).inc();
                        warn!(venue = label, error = %e, "Connect failed, backing off");
                        backoff.sleep().await;
                        continue;
                    }
                    Err(e) => {
                        // Auth/config failures halt this client until the
                        // operator intervenes.
                        error!(venue = label, error = %e, "Venue client halted");
                        this.audit.record(&AuditEvent::Lifecycle {
                            venue: label.into(),
                            state: "halted".into(),
                        });
                        return;
                    }
                }

                if let Err(e) = stream.subscribe(&tokens).await {
                    warn!(venue = label, error = %e, "Subscribe failed, reconnecting");
                    backoff.sleep().await;
                    continue;
                }

                this.metrics.venue_connected.with_label_values(&[label]).set(1.0);
                this.audit.record(&AuditEvent::Lifecycle {
                    venue: label.into(),
                    state: "connected".into(),
                });

                loop {
                    match stream.next_event().await {
                        Some(MarketEvent::Update { update, book }) => {
                            backoff.reset();
                            this.books.publish(book);
                            this.metrics.updates_total.with_label_values(&[label]).inc();
                            this.bus.publish(update);
                        }
                        Some(MarketEvent::Connected | MarketEvent::Authenticated) => {
                            backoff.reset();
                        }
                        Some(MarketEvent::Disconnected { reason }) => {
                            warn!(venue = label, reason = %reason, "Stream disconnected");
                            break;
                        }
                        None => {
                            warn!(venue = label, "Stream exhausted");
                            break;
                        }
                    }
                }

                let decode_errors = stream.decode_errors();
                this.metrics
                    .decode_errors_total
                    .with_label_values(&[label])
                    .inc_by(decode_errors.saturating_sub(reported_decode_errors));
                reported_decode_errors = decode_errors;

                this.metrics.venue_connected.with_label_values(&[label]).set(0.0);
                this.metrics.reconnects_total.with_label_values(&[label]).inc();
                this.audit.record(&AuditEvent::Lifecycle {
                    venue: label.into(),
                    state: "reconnecting".into(),
                });
                backoff.sleep().await;
            }
        })
    }

    /// One detector worker: drain the bus, run every detection pass, and
    /// hand opportunities to the execution path.
    async fn worker_loop(&self, worker: usize) {
        debug!(worker, "Detector worker started");
        loop {
            let update = self.bus.recv().await;
            self.metrics
                .detection_latency_ms
                .with_label_values(&["ingestion"])
                .observe(update.age().as_secs_f64() * 1000.0);

            let mut opportunities = self.detector.on_update(update.clone());
            if update.venue() == Venue::Polymarket {
                opportunities.extend(self.atomic_pass(&update));
                opportunities.extend(self.projector_pass(&update));
            }

            for opportunity in opportunities {
                self.handle_opportunity(opportunity).await;
            }
        }
    }

    /// Atomic sum-violation pass for the pair owning this token.
    fn atomic_pass(&self, update: &MarketUpdate) -> Vec<Opportunity> {
        let token = update.market_id().to_token();
        let Some(pair) = self.pairs.iter().find(|p| p.contains(&token)) else {
            return Vec::new();
        };
        // Both sides must be fresh: a one-sided sum is meaningless.
        let staleness = Duration::from_millis(self.config.detector.staleness_ms);
        let Some((yes, no)) = self
            .books
            .fresh_pair(pair.yes_token(), pair.no_token(), staleness)
        else {
            return Vec::new();
        };
        self.atomic
            .scan(pair, yes.as_ref(), no.as_ref())
            .into_iter()
            .collect()
    }

    /// Multi-market projection pass for any graph containing this token.
    fn projector_pass(&self, update: &MarketUpdate) -> Vec<Opportunity> {
        let token = update.market_id().to_token();
        let mut out = Vec::new();

        for graph in self.constraint_graphs.iter() {
            if !graph.tokens().contains(&token) {
                continue;
            }
            // A hole in the price vector invalidates the whole projection.
            let Some(books) = self.books.all(graph.tokens()) else {
                continue;
            };
            let mut theta = Vec::with_capacity(books.len());
            let mut hints: Vec<(TokenId, Decimal, Decimal)> = Vec::with_capacity(books.len());
            let mut complete = true;
            for (token, book) in graph.tokens().iter().zip(books.iter()) {
                match book.mid() {
                    Some(mid) => {
                        theta.push(mid.to_f64().unwrap_or(0.5));
                        let available = book
                            .best_ask()
                            .map(|l| l.size())
                            .unwrap_or(Decimal::ZERO);
                        hints.push((token.clone(), mid, available));
                    }
                    None => {
                        complete = false;
                        break;
                    }
                }
            }
            if !complete {
                continue;
            }

            match self.projector.detect(&theta, graph) {
                Ok(Some(signal)) => {
                    let legs = hints
                        .iter()
                        .zip(signal.signals.iter())
                        .filter(|(_, s)| **s != CoordinateSignal::Hold)
                        .map(|((token, mid, available), s)| LegHint {
                            venue: Venue::Polymarket,
                            market_id: MarketId::from(token.as_str()),
                            token_id: token.clone(),
                            side: match s {
                                CoordinateSignal::Buy => LegSide::Buy,
                                _ => LegSide::Sell,
                            },
                            price: *mid,
                            available: *available,
                        })
                        .collect::<Vec<_>>();
                    if legs.is_empty() {
                        continue;
                    }
                    let ev_percent = Decimal::try_from(signal.max_deviation * 100.0)
                        .unwrap_or(Decimal::ZERO);
                    out.push(Opportunity::new(
                        Direction::MultiMarket,
                        format!("graph:{:x}", graph.structure_hash()),
                        "Constraint-set mispricing",
                        legs,
                        ev_percent,
                        Decimal::ONE,
                    ));
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Projection failed"),
            }
        }
        out
    }

    /// Route one opportunity according to the run mode.
    async fn handle_opportunity(&self, opportunity: Opportunity) {
        self.metrics
            .opportunities_total
            .with_label_values(&[direction_label(opportunity.direction())])
            .inc();
        self.audit.record(&AuditEvent::Opportunity {
            id: opportunity.id().to_string(),
            direction: direction_label(opportunity.direction()).into(),
            event_key: opportunity.event_key().into(),
            ev_percent: opportunity.ev_percent(),
            confidence: opportunity.confidence(),
        });
        info!(
            direction = direction_label(opportunity.direction()),
            ev_percent = %opportunity.ev_percent(),
            question = opportunity.question(),
            "Opportunity detected"
        );

        if self.mode == Mode::Observer {
            return;
        }

        let Some((mut legs, expected_payout, size)) = self.plan_legs(&opportunity) else {
            debug!("Opportunity not plannable, skipping");
            return;
        };

        // Atomic round trips settle through the mint/merge capability when
        // a signer is attached; without one the book legs stand alone.
        if let Some(signer) = &self.signer {
            let on_chain_side = match opportunity.direction() {
                Direction::AtomicSplit => Some(LegSide::Mint),
                Direction::AtomicMerge => Some(LegSide::Merge),
                _ => None,
            };
            if let Some(side) = on_chain_side {
                match self.signed_chain_leg(&opportunity, side, size, signer.as_ref()).await {
                    Ok(leg) => legs.push(leg),
                    Err(e) => {
                        error!(error = %e, "Signer failure");
                        *self.fatal.lock() = Some(e.to_string());
                        return;
                    }
                }
            }
        }

        let report = self.router.execute(legs, expected_payout).await;
        info!(
            strategy = %report.strategy_id,
            state = report.state.as_label(),
            realized = %report.realized_pnl,
            "Strategy finished"
        );

        if let Some(ledger) = &self.paper_ledger {
            if report.state != StrategyState::Aborted {
                ledger.record(
                    direction_label(opportunity.direction()),
                    size,
                    report.net_profit_projected,
                    report.realized_pnl,
                );
            }
        }
    }

    /// Turn an opportunity's hints into executable legs. Re-reads current
    /// books, sizes with fractional Kelly, and attaches chase bounds.
    fn plan_legs(&self, opportunity: &Opportunity) -> Option<(Vec<ExecutionLeg>, Decimal, Decimal)> {
        let hints = opportunity.legs();
        if hints.is_empty() {
            return None;
        }

        // Tightest top-of-book availability bounds the notional.
        let liquidity_cap = hints
            .iter()
            .map(|h| h.available * h.price)
            .min()
            .unwrap_or(Decimal::ZERO);
        let profit_ratio = opportunity.ev_percent() / Decimal::ONE_HUNDRED;
        let notional = self.kelly.size(
            self.risk.equity(),
            Decimal::ONE,
            profit_ratio,
            liquidity_cap,
        );
        if notional <= Decimal::ZERO {
            return None;
        }

        let timeout = Duration::from_millis(self.config.execution.leg_timeout_ms);
        let mut legs = Vec::with_capacity(hints.len() + 1);
        let mut size = Decimal::ZERO;

        for hint in hints {
            if hint.price <= Decimal::ZERO {
                return None;
            }
            let book = self.books.get(&hint.token_id);
            let units = (notional / hint.price).round_dp(2);
            size = if size == Decimal::ZERO { units } else { size.min(units) };
            let chase_bound = match hint.side {
                LegSide::Buy | LegSide::Back | LegSide::Mint => {
                    Some((hint.price * (Decimal::ONE + profit_ratio)).round_dp(4))
                }
                LegSide::Sell | LegSide::Lay | LegSide::Merge => {
                    Some((hint.price * (Decimal::ONE - profit_ratio)).round_dp(4))
                }
            };
            legs.push(ExecutionLeg {
                venue: hint.venue,
                market_id: hint.market_id.clone(),
                token_id: hint.token_id.clone(),
                side: hint.side,
                size: units,
                limit_price: hint.price,
                book,
                timeout,
                allow_chase: true,
                chase_breakeven_price: chase_bound,
                raw_tx_hex: None,
            });
        }

        // Uniform size across legs keeps the round trip atomic.
        for leg in &mut legs {
            leg.size = size;
        }

        let expected_payout = match opportunity.direction() {
            // Split: mint one unit per share (outlay), sell both sides.
            Direction::AtomicSplit => -size,
            // Merge: buy both sides, merge redeems one unit per share.
            Direction::AtomicMerge => size,
            // Cross-venue and multi-market: payout implied by detected EV
            // over the planned signed cost.
            _ => {
                let cost = legs
                    .iter()
                    .map(|l| l.signed_notional(l.limit_price))
                    .sum::<Decimal>();
                cost * (Decimal::ONE + profit_ratio)
            }
        };

        Some((legs, expected_payout, size))
    }

    /// Build and sign the on-chain mint/merge leg for an atomic strategy.
    /// The transaction body is opaque to the engine; the external signer
    /// owns serialization and the key.
    async fn signed_chain_leg(
        &self,
        opportunity: &Opportunity,
        side: LegSide,
        size: Decimal,
        signer: &dyn Signer,
    ) -> Result<ExecutionLeg> {
        let action = if side == LegSide::Mint { "split" } else { "merge" };
        let payload = serde_json::json!({
            "action": action,
            "market": opportunity.event_key(),
            "size": size,
        })
        .to_string();
        let signed = signer.sign(payload.as_bytes()).await?;
        let raw_tx_hex = format!(
            "0x{}",
            signed.iter().map(|b| format!("{b:02x}")).collect::<String>()
        );

        Ok(ExecutionLeg {
            venue: Venue::Polymarket,
            market_id: MarketId::from(opportunity.event_key()),
            token_id: TokenId::from(opportunity.event_key()),
            side,
            size,
            limit_price: Decimal::ONE,
            book: None,
            timeout: Duration::from_millis(self.config.execution.leg_timeout_ms),
            allow_chase: false,
            chase_breakeven_price: None,
            raw_tx_hex: Some(raw_tx_hex),
        })
    }

    /// Mapping reload on SIGHUP or the periodic timer.
    fn spawn_mapping_reload(self: Arc<Self>) -> JoinHandle<()> {
        let this = self;
        tokio::spawn(async move {
            let mut hangup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
                Ok(signal) => signal,
                Err(e) => {
                    warn!(error = %e, "SIGHUP handler unavailable, timer reload only");
                    loop {
                        tokio::time::sleep(Duration::from_secs(
                            this.config.app.mapping_reload_minutes * 60,
                        ))
                        .await;
                        this.reload_mappings();
                    }
                }
            };
            let mut timer = tokio::time::interval(Duration::from_secs(
                this.config.app.mapping_reload_minutes * 60,
            ));
            timer.tick().await; // skip the immediate tick
            loop {
                tokio::select! {
                    _ = hangup.recv() => {
                        info!("SIGHUP received, reloading mappings");
                        this.reload_mappings();
                    }
                    _ = timer.tick() => this.reload_mappings(),
                }
            }
        })
    }

    fn reload_mappings(&self) {
        match self.mappings.reload(&self.config.app.mappings_file) {
            Ok(()) => {}
            Err(e) => warn!(error = %e, "Mapping reload failed, keeping previous generation"),
        }
    }

    /// Bus overflow, latency contract and risk watchdogs.
    fn spawn_watchdogs(self: Arc<Self>, stop: tokio::sync::mpsc::Sender<ExitReason>) -> JoinHandle<()> {
        let this = self;
        tokio::spawn(async move {
            let mut overflow = OverflowAlarm::new(100.0);
            let mut last_dropped = 0u64;
            let mut ticker = tokio::time::interval(WATCHDOG_INTERVAL);
            loop {
                ticker.tick().await;

                // Bus overflow: detectors are lagging, prices are stale.
                if let Some(rate) = overflow.check(&this.bus) {
                    this.audit.record(&AuditEvent::Risk {
                        kind: "bus_overflow".into(),
                        detail: format!("{rate:.0} drops/s"),
                    });
                }
                let dropped = this.bus.dropped();
                this.metrics
                    .updates_dropped_total
                    .with_label_values(&["all"])
                    .inc_by(dropped.saturating_sub(last_dropped));
                last_dropped = dropped;

                // Latency contract.
                let latency = this.detector.latency();
                if let Some(p99) = latency.ingestion_p99_ms() {
                    this.metrics
                        .detection_p99_ms
                        .with_label_values(&["ingestion"])
                        .set(p99);
                }
                if let Some(p99) = latency.processing_p99_ms() {
                    this.metrics
                        .detection_p99_ms
                        .with_label_values(&["processing"])
                        .set(p99);
                }
                if let Some(p99) = latency.check_alert(LATENCY_BOUND_MS, LATENCY_SUSTAIN) {
                    this.audit.record(&AuditEvent::Risk {
                        kind: "latency_exceeded".into(),
                        detail: format!("p99 {p99:.1}ms"),
                    });
                }

                // Breaker states.
                for venue in Venue::all() {
                    let state = match this.breakers.get(venue).state() {
                        crate::core::venue::BreakerState::Closed => 0.0,
                        crate::core::venue::BreakerState::HalfOpen => 1.0,
                        crate::core::venue::BreakerState::Open => 2.0,
                    };
                    this.metrics
                        .breaker_state
                        .with_label_values(&[venue.as_str()])
                        .set(state);
                }

                // Unrecoverable failures (signer) stop the process.
                let fatal_detail = this.fatal.lock().take();
                if let Some(detail) = fatal_detail {
                    this.audit.record(&AuditEvent::Risk {
                        kind: "fatal".into(),
                        detail,
                    });
                    let _ = stop.send(ExitReason::Fatal).await;
                    return;
                }

                // Risk kill switches stop a live engine outright.
                if let Err(reason) = this.risk.can_trade() {
                    let fatal = matches!(
                        reason,
                        DenyReason::DrawdownLimit
                            | DenyReason::DailyLossLimit
                            | DenyReason::ConsecutiveLosses
                    );
                    if fatal && this.mode == Mode::Live {
                        error!(reason = %reason, "Risk-triggered shutdown");
                        this.audit.record(&AuditEvent::Risk {
                            kind: "kill_switch".into(),
                            detail: reason.as_label(),
                        });
                        let _ = stop.send(ExitReason::RiskTriggered).await;
                        return;
                    }
                }
            }
        })
    }
}

fn build_gateways(
    config: &Config,
    mode: Mode,
    http: &reqwest::Client,
) -> HashMap<Venue, Arc<dyn OrderGateway>> {
    let mut gateways: HashMap<Venue, Arc<dyn OrderGateway>> = HashMap::new();
    match mode {
        Mode::Live => {
            gateways.insert(
                Venue::Polymarket,
                Arc::new(PolymarketGateway::new(
                    config.polymarket_config(),
                    config.polymarket.api_key.clone(),
                    http.clone(),
                )),
            );
            if config.betfair.enabled {
                gateways.insert(
                    Venue::Betfair,
                    Arc::new(BetfairGateway::new(
                        BetfairGatewayConfig {
                            api_url: config.betfair.api_url.clone(),
                            app_key: config.betfair.app_key.clone(),
                            session_token: config.betfair.session_token.clone(),
                        },
                        http.clone(),
                    )),
                );
            }
            if config.sx.enabled {
                gateways.insert(
                    Venue::Sx,
                    Arc::new(SxGateway::new(config.sx_config(), http.clone())),
                );
            }
        }
        Mode::Paper | Mode::Observer => {
            for venue in Venue::all() {
                gateways.insert(venue, Arc::new(PaperGateway::new(venue)));
            }
        }
    }
    gateways
}

fn load_constraint_graphs(config: &Config) -> Vec<ConstraintGraph> {
    let Some(path) = &config.app.constraints_file else {
        return Vec::new();
    };
    match std::fs::read_to_string(path)
        .map_err(crate::error::Error::from)
        .and_then(|raw| Ok(serde_json::from_str::<Vec<ConstraintGraph>>(&raw)?))
    {
        Ok(graphs) => {
            info!(graphs = graphs.len(), "Constraint graphs loaded");
            graphs
        }
        Err(e) => {
            warn!(error = %e, "Constraint graphs unavailable");
            Vec::new()
        }
    }
}

fn direction_label(direction: Direction) -> &'static str {
    match direction {
        Direction::BuyPolyLayExchange => "buy_poly_lay_exchange",
        Direction::BuyPolyBackExchange => "buy_poly_back_exchange",
        Direction::AtomicSplit => "atomic_split",
        Direction::AtomicMerge => "atomic_merge",
        Direction::MultiMarket => "multi_market",
    }
}
