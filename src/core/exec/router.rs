//! Multi-leg strategy router.
//!
//! One attempt runs the pipeline
//! `gating → dispatching → {full fill | all fail | partial}`, with partial
//! fills handed to the recovery handler
//! (`partial → recovering → {recovered | liquidated}`). Failures inside an
//! attempt terminate it cleanly with a report; nothing propagates out.
//!
//! Gating order: circuit breakers, risk admission, gas estimate, VWAP
//! depth validation, then the net-profit floor. On-chain legs bypass order
//! gateways and race the signed transaction across RPC endpoints.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    GasEstimator, RecoveryHandler, RecoveryState, RpcRacer, VwapEngine,
};
use crate::core::book::BookCache;
use crate::core::domain::{
    ExecutionLeg, ExecutionResult, LegStatus, OrderId, Venue, Volume,
};
use crate::core::risk::RiskGuardian;
use crate::core::service::{AuditEvent, AuditLog, Metrics};
use crate::core::venue::{BreakerSet, OrderGateway};

/// Router tuning.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Strategies below this net profit are not dispatched.
    pub min_net_profit: Decimal,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            min_net_profit: Decimal::new(5, 2), // $0.05
        }
    }
}

/// Terminal state of one strategy attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyState {
    /// Aborted during gating; no orders were sent.
    Aborted,
    FullFill,
    AllFail,
    Recovered,
    Liquidated,
}

impl StrategyState {
    /// Stable label for metrics and audit records.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Aborted => "aborted",
            Self::FullFill => "full_fill",
            Self::AllFail => "all_fail",
            Self::Recovered => "recovered",
            Self::Liquidated => "liquidated",
        }
    }
}

/// Outcome of one strategy attempt.
#[derive(Debug)]
pub struct StrategyReport {
    pub strategy_id: Uuid,
    pub state: StrategyState,
    /// Machine-readable abort reason, when aborted.
    pub reason: Option<String>,
    /// Net profit projected at the gate (payout − VWAP cost − fees).
    pub net_profit_projected: Decimal,
    /// Realized P&L, known for full fills and recovery outcomes.
    pub realized_pnl: Decimal,
    pub filled_legs: usize,
    pub failed_legs: usize,
    pub elapsed_ms: u64,
}

impl StrategyReport {
    fn aborted(strategy_id: Uuid, reason: impl Into<String>, started: Instant) -> Self {
        Self {
            strategy_id,
            state: StrategyState::Aborted,
            reason: Some(reason.into()),
            net_profit_projected: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            filled_legs: 0,
            failed_legs: 0,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Orchestrates validation, dispatch and recovery for strategy attempts.
pub struct SmartRouter {
    config: RouterConfig,
    gateways: HashMap<Venue, Arc<dyn OrderGateway>>,
    vwap: VwapEngine,
    books: Arc<BookCache>,
    breakers: BreakerSet,
    risk: Arc<RiskGuardian>,
    recovery: RecoveryHandler,
    gas: Option<Arc<GasEstimator>>,
    racer: Option<Arc<RpcRacer>>,
    metrics: Option<Arc<Metrics>>,
    audit: Option<Arc<AuditLog>>,
}

impl SmartRouter {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        config: RouterConfig,
        gateways: HashMap<Venue, Arc<dyn OrderGateway>>,
        vwap: VwapEngine,
        books: Arc<BookCache>,
        breakers: BreakerSet,
        risk: Arc<RiskGuardian>,
        recovery: RecoveryHandler,
    ) -> Self {
        Self {
            config,
            gateways,
            vwap,
            books,
            breakers,
            risk,
            recovery,
            gas: None,
            racer: None,
            metrics: None,
            audit: None,
        }
    }

    /// Attach the on-chain path (gas estimation + RPC racing).
    #[must_use]
    pub fn with_chain(mut self, gas: Arc<GasEstimator>, racer: Arc<RpcRacer>) -> Self {
        self.gas = Some(gas);
        self.racer = Some(racer);
        self
    }

    /// Attach the metrics exporter.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Attach the audit log.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Execute a strategy: validate, dispatch all legs in parallel,
    /// classify, and recover partial fills.
    pub async fn execute(
        &self,
        legs: Vec<ExecutionLeg>,
        expected_payout: Decimal,
    ) -> StrategyReport {
        let strategy_id = Uuid::new_v4();
        let started = Instant::now();

        if legs.is_empty() {
            return self.finish(StrategyReport::aborted(strategy_id, "no_legs", started));
        }

        // Breakers for every touched venue.
        let venues: Vec<Venue> = {
            let mut venues = Vec::new();
            for leg in &legs {
                if !venues.contains(&leg.venue) {
                    venues.push(leg.venue);
                }
            }
            venues
        };
        if !self.breakers.all_allow(&venues) {
            let open = venues
                .iter()
                .find(|v| !self.breakers.get(**v).allows())
                .copied()
                .unwrap_or(venues[0]);
            return self.finish(StrategyReport::aborted(
                strategy_id,
                format!("breaker_open:{open}"),
                started,
            ));
        }

        // Risk admission.
        if let Err(denied) = self.risk.can_trade() {
            if let Some(metrics) = &self.metrics {
                metrics
                    .blocked_by_risk_total
                    .with_label_values(&[denied.as_label().as_str()])
                    .inc();
            }
            return self.finish(StrategyReport::aborted(
                strategy_id,
                format!("blocked_by_risk:{denied}"),
                started,
            ));
        }

        // Chain fees for on-chain legs.
        let chain_leg_count = legs.iter().filter(|l| l.side.is_on_chain()).count();
        let chain_fees = if chain_leg_count > 0 {
            let Some(gas) = &self.gas else {
                return self.finish(StrategyReport::aborted(
                    strategy_id,
                    "chain_path_unconfigured",
                    started,
                ));
            };
            let _ = gas.optimal_gas().await;
            let fees = gas.estimate_tx_cost_usd() * Decimal::from(chain_leg_count as u64);
            if let Some(metrics) = &self.metrics {
                metrics
                    .chain_fees_usd_total
                    .add(fees.to_f64().unwrap_or(0.0));
            }
            fees
        } else {
            Decimal::ZERO
        };

        // Pre-flight VWAP: signed cost across legs.
        let mut total_vwap_cost = Decimal::ZERO;
        for leg in &legs {
            match self.preflight_price(leg) {
                Some(price) => total_vwap_cost += leg.signed_notional(price),
                None => {
                    return self.finish(StrategyReport::aborted(
                        strategy_id,
                        format!("insufficient_liquidity:{}", leg.token_id),
                        started,
                    ));
                }
            }
        }

        // Daily notional cap: gross cost-side exposure counts.
        let gross_notional: Decimal = legs
            .iter()
            .filter(|l| l.side.is_cost())
            .map(|l| l.limit_price * l.size)
            .sum();
        if let Err(denied) = self.risk.reserve_notional(gross_notional) {
            if let Some(metrics) = &self.metrics {
                metrics
                    .blocked_by_risk_total
                    .with_label_values(&[denied.as_label().as_str()])
                    .inc();
            }
            return self.finish(StrategyReport::aborted(
                strategy_id,
                format!("blocked_by_risk:{denied}"),
                started,
            ));
        }

        // Net profit gate.
        let net = expected_payout - total_vwap_cost - chain_fees;
        if net < self.config.min_net_profit {
            info!(
                strategy = %strategy_id,
                net = %net,
                floor = %self.config.min_net_profit,
                "Profit gating failed"
            );
            return self.finish(StrategyReport::aborted(
                strategy_id,
                "profit_gating_failed",
                started,
            ));
        }

        info!(
            strategy = %strategy_id,
            legs = legs.len(),
            net_projected = %net,
            "Dispatching strategy"
        );
        if let Some(audit) = &self.audit {
            audit.record(&AuditEvent::Dispatch {
                strategy_id: strategy_id.to_string(),
                legs: legs.len(),
                expected_payout,
                net_profit_projected: net,
            });
        }

        // Parallel dispatch; each leg enforces its own timeout.
        let results = join_all(legs.iter().map(|leg| self.dispatch_leg(leg))).await;
        for (leg, result) in legs.iter().zip(results.iter()) {
            let breaker = self.breakers.get(leg.venue);
            if result.is_filled() {
                breaker.record_success();
            } else {
                breaker.record_failure();
                self.risk.record_api_error(leg.venue);
            }
            if let Some(audit) = &self.audit {
                audit.record(&AuditEvent::LegResult {
                    strategy_id: strategy_id.to_string(),
                    venue: leg.venue.as_str().into(),
                    token_id: leg.token_id.to_string(),
                    status: format!("{:?}", result.status).to_lowercase(),
                    filled_size: result.filled_size,
                    executed_price: result.executed_price,
                });
            }
        }

        // Classification.
        let mut filled = Vec::new();
        let mut failed = Vec::new();
        for (leg, result) in legs.into_iter().zip(results.into_iter()) {
            if result.is_filled() {
                filled.push((leg, result));
            } else {
                failed.push(leg);
            }
        }

        let report = if failed.is_empty() {
            self.risk.record_trade(net);
            StrategyReport {
                strategy_id,
                state: StrategyState::FullFill,
                reason: None,
                net_profit_projected: net,
                realized_pnl: net,
                filled_legs: filled.len(),
                failed_legs: 0,
                elapsed_ms: started.elapsed().as_millis() as u64,
            }
        } else if filled.is_empty() {
            // Flat: nothing filled, nothing to unwind.
            warn!(strategy = %strategy_id, "All legs failed");
            StrategyReport {
                strategy_id,
                state: StrategyState::AllFail,
                reason: None,
                net_profit_projected: net,
                realized_pnl: Decimal::ZERO,
                filled_legs: 0,
                failed_legs: failed.len(),
                elapsed_ms: started.elapsed().as_millis() as u64,
            }
        } else {
            // Legging risk.
            warn!(
                strategy = %strategy_id,
                filled = filled.len(),
                failed = failed.len(),
                "Partial fill, recovering"
            );
            let filled_count = filled.len();
            let failed_count = failed.len();
            let outcome = self.recovery.handle(filled, failed).await;
            let state = match outcome.state {
                RecoveryState::Recovered => StrategyState::Recovered,
                RecoveryState::Liquidated => StrategyState::Liquidated,
            };
            let realized = match outcome.state {
                // A recovered strategy keeps its projected edge less the
                // chase concessions.
                RecoveryState::Recovered => net + outcome.realized_pnl,
                RecoveryState::Liquidated => outcome.realized_pnl,
            };
            self.risk.record_trade(realized);
            if let Some(metrics) = &self.metrics {
                metrics
                    .recoveries_total
                    .with_label_values(&[state.as_label()])
                    .inc();
            }
            if let Some(audit) = &self.audit {
                audit.record(&AuditEvent::Recovery {
                    strategy_id: strategy_id.to_string(),
                    state: state.as_label().into(),
                    realized_pnl: outcome.realized_pnl,
                    retry_attempts: outcome.retry_attempts,
                    residual_inventory: outcome.residual_inventory,
                });
            }
            StrategyReport {
                strategy_id,
                state,
                reason: None,
                net_profit_projected: net,
                realized_pnl: realized,
                filled_legs: filled_count,
                failed_legs: failed_count,
                elapsed_ms: started.elapsed().as_millis() as u64,
            }
        };

        self.finish(report)
    }

    /// Achievable price for one leg against the freshest book.
    ///
    /// Mint legs are priced at par: a split always costs exactly 1.0 per
    /// unit on-chain, and a merge always redeems 1.0.
    fn preflight_price(&self, leg: &ExecutionLeg) -> Option<Decimal> {
        if leg.side.is_on_chain() {
            return Some(Decimal::ONE);
        }
        let book = self
            .books
            .get(&leg.token_id)
            .or_else(|| leg.book.clone())?;
        if leg.side.is_cost() {
            self.vwap.buy_price(book.as_ref(), leg.size)
        } else {
            self.vwap.sell_price(book.as_ref(), leg.size)
        }
    }

    async fn dispatch_leg(&self, leg: &ExecutionLeg) -> ExecutionResult {
        let attempt = async {
            if leg.side.is_on_chain() {
                return self.dispatch_chain_leg(leg).await;
            }
            let Some(gateway) = self.gateways.get(&leg.venue) else {
                return ExecutionResult::failed(leg.size, format!("no gateway for {}", leg.venue));
            };
            match gateway.place_order(leg).await {
                Ok(result) => result,
                Err(e) => ExecutionResult::failed(leg.size, e.to_string()),
            }
        };

        match tokio::time::timeout(leg.timeout, attempt).await {
            Ok(result) => result,
            Err(_) => {
                warn!(token = %leg.token_id, "Leg timed out");
                ExecutionResult::timed_out(leg.size)
            }
        }
    }

    async fn dispatch_chain_leg(&self, leg: &ExecutionLeg) -> ExecutionResult {
        let (Some(racer), Some(raw_tx)) = (&self.racer, &leg.raw_tx_hex) else {
            return ExecutionResult::failed(leg.size, "on-chain leg without racer or payload");
        };
        match racer.broadcast(raw_tx).await {
            Ok(tx_hash) => ExecutionResult {
                order_id: Some(OrderId::from(tx_hash)),
                status: LegStatus::Filled,
                filled_size: leg.size,
                remaining_size: Volume::ZERO,
                executed_price: Some(leg.limit_price),
                error: None,
            },
            Err(e) => ExecutionResult::failed(leg.size, e.to_string()),
        }
    }

    /// Emit the terminal event for a report.
    fn finish(&self, report: StrategyReport) -> StrategyReport {
        if let Some(metrics) = &self.metrics {
            metrics
                .strategies_total
                .with_label_values(&[report.state.as_label()])
                .inc();
            metrics
                .execution_latency_ms
                .with_label_values(&[report.state.as_label()])
                .observe(report.elapsed_ms as f64);
            metrics
                .realized_pnl
                .add(report.realized_pnl.to_f64().unwrap_or(0.0));
            metrics
                .equity
                .set(self.risk.equity().to_f64().unwrap_or(0.0));
        }
        if let Some(audit) = &self.audit {
            audit.record(&AuditEvent::StrategyOutcome {
                strategy_id: report.strategy_id.to_string(),
                state: report.state.as_label().into(),
                reason: report.reason.clone(),
                realized_pnl: report.realized_pnl,
            });
        }
        report
    }
}
