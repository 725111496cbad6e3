//! Partial-fill recovery.
//!
//! A partial fill leaves the book unbalanced: some legs are on, their
//! hedges are not. Two strategies run in sequence:
//!
//! 1. **Retry** (time-bounded): resubmit each failed leg with the price
//!    loosened toward the counterparty on every attempt.
//! 2. **Liquidate**: when the retry window closes, dump every filled leg
//!    with an inverse order at a deep crossing price, sacrificing slippage
//!    to guarantee the exit.
//!
//! Whatever the path, the handler returns with net inventory in the
//! affected markets at zero (within one minimum lot).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::core::book::BookCache;
use crate::core::domain::{ExecutionLeg, ExecutionResult, LegSide, Price, Venue, Volume};
use crate::core::venue::OrderGateway;

/// Recovery tuning.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Total budget for the retry strategy.
    pub retry_window: Duration,
    /// Per-attempt order timeout.
    pub attempt_timeout: Duration,
    /// Price concession added per retry attempt.
    pub price_step: Decimal,
    /// Crossing depth for liquidation orders.
    pub liquidation_depth: Decimal,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            retry_window: Duration::from_millis(500),
            attempt_timeout: Duration::from_millis(100),
            price_step: Decimal::new(1, 2),         // 0.01
            liquidation_depth: Decimal::new(2, 2),  // 0.02
        }
    }
}

/// Terminal state of a recovery pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    /// Every failed leg eventually filled.
    Recovered,
    /// Filled legs were dumped at market.
    Liquidated,
}

/// Result of one recovery pass.
#[derive(Debug)]
pub struct RecoveryOutcome {
    pub state: RecoveryState,
    /// Realized P&L of the pass (liquidation slippage is negative).
    pub realized_pnl: Decimal,
    /// Absolute inventory left open, normally zero.
    pub residual_inventory: Volume,
    /// Retry attempts made across all legs.
    pub retry_attempts: u32,
}

/// Retry-then-liquidate recovery FSM.
pub struct RecoveryHandler {
    config: RecoveryConfig,
    gateways: HashMap<Venue, Arc<dyn OrderGateway>>,
    books: Arc<BookCache>,
}

impl RecoveryHandler {
    #[must_use]
    pub fn new(
        config: RecoveryConfig,
        gateways: HashMap<Venue, Arc<dyn OrderGateway>>,
        books: Arc<BookCache>,
    ) -> Self {
        Self {
            config,
            gateways,
            books,
        }
    }

    /// Handle a partial fill: `filled` carries the legs that are on
    /// together with their fills, `failed` the legs that are not.
    pub async fn handle(
        &self,
        filled: Vec<(ExecutionLeg, ExecutionResult)>,
        failed: Vec<ExecutionLeg>,
    ) -> RecoveryOutcome {
        warn!(
            filled = filled.len(),
            failed = failed.len(),
            "Partial execution, entering recovery"
        );

        let (recovered, attempts, retry_pnl) = self.retry(failed).await;
        if recovered {
            info!(attempts, "Recovery complete: all legs filled on retry");
            return RecoveryOutcome {
                state: RecoveryState::Recovered,
                realized_pnl: retry_pnl,
                residual_inventory: Decimal::ZERO,
                retry_attempts: attempts,
            };
        }

        error!("Retry window exhausted, liquidating open legs");
        let (liquidation_pnl, residual) = self.liquidate(filled).await;
        RecoveryOutcome {
            state: RecoveryState::Liquidated,
            realized_pnl: liquidation_pnl,
            residual_inventory: residual,
            retry_attempts: attempts,
        }
    }

    /// Strategy A: chase each failed leg with progressively worse prices
    /// until the window closes. Returns (all_filled, attempts, pnl_delta).
    async fn retry(&self, failed: Vec<ExecutionLeg>) -> (bool, u32, Decimal) {
        let deadline = Instant::now() + self.config.retry_window;
        let mut remaining = failed;
        let mut attempts: u32 = 0;
        let mut pnl = Decimal::ZERO;
        let mut round: u32 = 0;

        while !remaining.is_empty() && Instant::now() < deadline {
            round += 1;
            let mut still_failed = Vec::new();

            for leg in remaining {
                if !leg.allow_chase && round > 1 {
                    still_failed.push(leg);
                    continue;
                }
                let price = self.chase_price(&leg, round);
                let mut retry_leg = leg.clone();
                retry_leg.limit_price = price;
                attempts += 1;

                match self.dispatch(&retry_leg).await {
                    Some(result) if result.is_filled() => {
                        info!(
                            token = %leg.token_id,
                            price = %price,
                            attempt = attempts,
                            "Retry filled"
                        );
                        let executed = result.executed_price.unwrap_or(price);
                        // Cost of chasing relative to the original plan.
                        let concession = if leg.side.is_cost() {
                            leg.limit_price - executed
                        } else {
                            executed - leg.limit_price
                        };
                        pnl += concession * leg.size;
                    }
                    _ => still_failed.push(leg),
                }
            }

            remaining = still_failed;
            if !remaining.is_empty() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }

        (remaining.is_empty(), attempts, pnl)
    }

    /// Strategy B: inverse orders at deep crossing prices for every filled
    /// leg. Returns (realized_pnl, residual_inventory).
    async fn liquidate(&self, filled: Vec<(ExecutionLeg, ExecutionResult)>) -> (Decimal, Volume) {
        let mut pnl = Decimal::ZERO;
        let mut residual = Decimal::ZERO;

        for (leg, fill) in filled {
            let size = fill.filled_size;
            if size <= Decimal::ZERO {
                continue;
            }
            let fill_price = fill.executed_price.unwrap_or(leg.limit_price);

            let mut exit = leg.clone();
            exit.side = leg.side.inverse();
            exit.size = size;
            exit.limit_price = self.liquidation_price(&leg);

            warn!(
                token = %exit.token_id,
                side = ?exit.side,
                price = %exit.limit_price,
                "Liquidating open leg"
            );

            match self.dispatch(&exit).await {
                Some(result) if result.is_filled() => {
                    let exit_price = result.executed_price.unwrap_or(exit.limit_price);
                    // A bought leg realizes (exit - entry); a sold leg the
                    // opposite.
                    let delta = if leg.side.is_cost() {
                        exit_price - fill_price
                    } else {
                        fill_price - exit_price
                    };
                    pnl += delta * size;
                }
                _ => {
                    error!(token = %exit.token_id, "Liquidation order failed, inventory open");
                    residual += size;
                }
            }
        }

        (pnl, residual)
    }

    /// Retry price for attempt `round`, loosened toward the counterparty
    /// and clamped at the breakeven bound when the leg carries one.
    fn chase_price(&self, leg: &ExecutionLeg, round: u32) -> Price {
        let step = self.config.price_step * Decimal::from(round);
        let price = if leg.side.is_cost() {
            leg.limit_price + step
        } else {
            leg.limit_price - step
        };
        match (leg.side.is_cost(), leg.chase_breakeven_price) {
            (true, Some(bound)) => price.min(bound),
            (false, Some(bound)) => price.max(bound),
            _ => price,
        }
    }

    /// Deep crossing price from the freshest book available.
    fn liquidation_price(&self, leg: &ExecutionLeg) -> Price {
        let cached = self.books.get(&leg.token_id).or_else(|| leg.book.clone());
        let book = cached.as_deref();
        let depth = self.config.liquidation_depth;

        // Closing a bought leg sells at (best bid - depth); closing a sold
        // leg buys at (best ask + depth).
        if leg.side.is_cost() {
            let bid = book
                .and_then(|b| b.best_bid().map(|l| l.price()))
                .unwrap_or(leg.limit_price);
            (bid - depth).max(Decimal::new(1, 2))
        } else {
            let ask = book
                .and_then(|b| b.best_ask().map(|l| l.price()))
                .unwrap_or(leg.limit_price);
            (ask + depth).min(Decimal::new(99, 2))
        }
    }

    async fn dispatch(&self, leg: &ExecutionLeg) -> Option<ExecutionResult> {
        let gateway = self.gateways.get(&leg.venue)?;
        match tokio::time::timeout(self.config.attempt_timeout, gateway.place_order(leg)).await {
            Ok(Ok(result)) => Some(result),
            Ok(Err(e)) => {
                warn!(error = %e, token = %leg.token_id, "Recovery order rejected");
                None
            }
            Err(_) => {
                warn!(token = %leg.token_id, "Recovery order timed out");
                None
            }
        }
    }
}
