//! Global kill-switch risk guardian.
//!
//! Tracks equity, drawdown from peak, daily P&L, consecutive losing
//! strategies and per-venue API error bursts. Any tripped limit pauses
//! trading for a configured window; the router checks admission before
//! every dispatch.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Datelike, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{error, warn};

use crate::core::domain::Venue;

/// Guardian tuning.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Maximum drawdown from peak equity, as a fraction.
    pub max_drawdown_pct: Decimal,
    /// Consecutive losing strategies before pausing.
    pub max_consecutive_losses: u32,
    /// Absolute daily loss cap in settlement currency.
    pub max_daily_loss: Decimal,
    /// Gross notional dispatched per day.
    pub max_daily_notional: Decimal,
    /// Pause duration once a switch trips.
    pub pause: Duration,
    /// API errors per venue tolerated inside the sliding window.
    pub api_error_limit: usize,
    /// Sliding window for API error counting.
    pub api_error_window: Duration,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_drawdown_pct: dec!(0.05),
            max_consecutive_losses: 5,
            max_daily_loss: dec!(100),
            max_daily_notional: dec!(5000),
            pause: Duration::from_secs(60 * 60),
            api_error_limit: 10,
            api_error_window: Duration::from_secs(60),
        }
    }
}

/// Why admission was denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    Paused,
    DrawdownLimit,
    ConsecutiveLosses,
    DailyLossLimit,
    DailyNotionalLimit,
    ApiErrorRate(Venue),
}

impl DenyReason {
    /// Stable label for metrics and audit records.
    #[must_use]
    pub fn as_label(&self) -> String {
        match self {
            Self::Paused => "paused".into(),
            Self::DrawdownLimit => "drawdown_limit".into(),
            Self::ConsecutiveLosses => "consecutive_losses".into(),
            Self::DailyLossLimit => "daily_loss_limit".into(),
            Self::DailyNotionalLimit => "daily_notional_limit".into(),
            Self::ApiErrorRate(venue) => format!("api_error_rate:{venue}"),
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_label())
    }
}

#[derive(Debug)]
struct RiskState {
    equity: Decimal,
    peak_equity: Decimal,
    daily_pnl: Decimal,
    daily_notional: Decimal,
    daily_anchor: DateTime<Utc>,
    consecutive_losses: u32,
    pause_until: Option<Instant>,
    pause_reason: Option<DenyReason>,
    api_errors: HashMap<Venue, VecDeque<Instant>>,
}

/// Shared risk guardian. Updates are short critical sections behind a
/// mutex; contention is negligible at strategy cadence.
pub struct RiskGuardian {
    config: RiskConfig,
    state: Mutex<RiskState>,
}

impl RiskGuardian {
    /// Create a guardian seeded with the starting bankroll.
    #[must_use]
    pub fn new(config: RiskConfig, initial_equity: Decimal) -> Self {
        Self {
            config,
            state: Mutex::new(RiskState {
                equity: initial_equity,
                peak_equity: initial_equity,
                daily_pnl: Decimal::ZERO,
                daily_notional: Decimal::ZERO,
                daily_anchor: Utc::now(),
                consecutive_losses: 0,
                pause_until: None,
                pause_reason: None,
                api_errors: HashMap::new(),
            }),
        }
    }

    /// Current equity.
    #[must_use]
    pub fn equity(&self) -> Decimal {
        self.state.lock().equity
    }

    /// Today's accumulated P&L.
    #[must_use]
    pub fn daily_pnl(&self) -> Decimal {
        self.state.lock().daily_pnl
    }

    /// Pre-trade admission check.
    pub fn can_trade(&self) -> Result<(), DenyReason> {
        let mut state = self.state.lock();
        Self::roll_daily_window(&mut state);

        if let Some(until) = state.pause_until {
            if Instant::now() < until {
                // Surface the switch that tripped, not just "paused".
                return Err(state.pause_reason.clone().unwrap_or(DenyReason::Paused));
            }
            state.pause_until = None;
            state.pause_reason = None;
        }
        if Self::drawdown_pct(&state) > self.config.max_drawdown_pct {
            return Err(DenyReason::DrawdownLimit);
        }
        if state.consecutive_losses >= self.config.max_consecutive_losses {
            return Err(DenyReason::ConsecutiveLosses);
        }
        if state.daily_pnl <= -self.config.max_daily_loss {
            return Err(DenyReason::DailyLossLimit);
        }
        let now = Instant::now();
        for (venue, errors) in &mut state.api_errors {
            Self::trim_errors(errors, now, self.config.api_error_window);
            if errors.len() >= self.config.api_error_limit {
                return Err(DenyReason::ApiErrorRate(*venue));
            }
        }
        Ok(())
    }

    /// Post-trade update: adjusts equity and trips switches.
    pub fn record_trade(&self, pnl: Decimal) {
        let mut state = self.state.lock();
        Self::roll_daily_window(&mut state);

        state.equity += pnl;
        state.daily_pnl += pnl;
        if state.equity > state.peak_equity {
            state.peak_equity = state.equity;
        }
        if pnl < Decimal::ZERO {
            state.consecutive_losses += 1;
        } else {
            state.consecutive_losses = 0;
        }

        let drawdown = Self::drawdown_pct(&state);
        let mut tripped: Option<DenyReason> = None;
        if drawdown > self.config.max_drawdown_pct {
            tripped = Some(DenyReason::DrawdownLimit);
        } else if state.consecutive_losses >= self.config.max_consecutive_losses {
            tripped = Some(DenyReason::ConsecutiveLosses);
        } else if state.daily_pnl <= -self.config.max_daily_loss {
            tripped = Some(DenyReason::DailyLossLimit);
        }

        if let Some(switch) = tripped {
            state.pause_until = Some(Instant::now() + self.config.pause);
            error!(
                switch = %switch,
                equity = %state.equity,
                daily_pnl = %state.daily_pnl,
                pause_secs = self.config.pause.as_secs(),
                "Risk kill switch tripped"
            );
            state.pause_reason = Some(switch);
        }
    }

    /// Reserve gross notional against the daily cap. Returns an error
    /// without reserving when the cap would be exceeded.
    pub fn reserve_notional(&self, notional: Decimal) -> Result<(), DenyReason> {
        let mut state = self.state.lock();
        Self::roll_daily_window(&mut state);
        if state.daily_notional + notional > self.config.max_daily_notional {
            return Err(DenyReason::DailyNotionalLimit);
        }
        state.daily_notional += notional;
        Ok(())
    }

    /// Record one API error against a venue's sliding window.
    pub fn record_api_error(&self, venue: Venue) {
        let mut state = self.state.lock();
        let now = Instant::now();
        let errors = state.api_errors.entry(venue).or_default();
        errors.push_back(now);
        Self::trim_errors(errors, now, self.config.api_error_window);
        if errors.len() >= self.config.api_error_limit {
            warn!(venue = %venue, errors = errors.len(), "Venue API error rate at limit");
        }
    }

    fn drawdown_pct(state: &RiskState) -> Decimal {
        if state.peak_equity <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let loss = (state.peak_equity - state.equity).max(Decimal::ZERO);
        loss / state.peak_equity
    }

    fn trim_errors(errors: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while errors
            .front()
            .map(|t| now.duration_since(*t) > window)
            .unwrap_or(false)
        {
            errors.pop_front();
        }
    }

    fn roll_daily_window(state: &mut RiskState) {
        let now = Utc::now();
        if now.ordinal() != state.daily_anchor.ordinal() || now.year() != state.daily_anchor.year()
        {
            state.daily_pnl = Decimal::ZERO;
            state.daily_notional = Decimal::ZERO;
            state.daily_anchor = now;
        }
    }
}
