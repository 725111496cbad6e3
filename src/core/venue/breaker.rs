//! Per-venue circuit breakers.
//!
//! A breaker trips after a run of consecutive failures, fails calls fast
//! while open, and probes recovery with a single half-open call after the
//! reset timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::core::domain::Venue;

/// Breaker tuning.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before opening.
    pub failure_threshold: u32,
    /// Time in open state before allowing a probe.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Failure-counting circuit breaker for one venue.
#[derive(Debug)]
pub struct CircuitBreaker {
    venue: Venue,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(venue: Venue, config: BreakerConfig) -> Self {
        Self {
            venue,
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// The venue this breaker guards.
    #[must_use]
    pub const fn venue(&self) -> Venue {
        self.venue
    }

    /// Current state, transitioning Open → HalfOpen when the reset timeout
    /// has elapsed.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        if inner.state == BreakerState::Open {
            let elapsed = inner
                .opened_at
                .map(|at| at.elapsed() >= self.config.reset_timeout)
                .unwrap_or(false);
            if elapsed {
                info!(venue = %self.venue, "Circuit breaker half-open, probing");
                inner.state = BreakerState::HalfOpen;
            }
        }
        inner.state
    }

    /// Whether a call may proceed right now.
    #[must_use]
    pub fn allows(&self) -> bool {
        self.state() != BreakerState::Open
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != BreakerState::Closed {
            info!(venue = %self.venue, "Circuit breaker closed");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    /// Record a failed call, possibly tripping the breaker.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                warn!(venue = %self.venue, "Probe failed, circuit breaker re-open");
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
            }
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        venue = %self.venue,
                        failures = inner.consecutive_failures,
                        "Circuit breaker open"
                    );
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::Open => {}
        }
    }
}

/// Shared registry of one breaker per venue.
#[derive(Clone)]
pub struct BreakerSet {
    breakers: Arc<HashMap<Venue, Arc<CircuitBreaker>>>,
}

impl BreakerSet {
    /// Create breakers for all venues with the same tuning.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        let breakers = Venue::all()
            .into_iter()
            .map(|venue| (venue, Arc::new(CircuitBreaker::new(venue, config.clone()))))
            .collect();
        Self {
            breakers: Arc::new(breakers),
        }
    }

    /// The breaker for a venue.
    #[must_use]
    pub fn get(&self, venue: Venue) -> Arc<CircuitBreaker> {
        Arc::clone(&self.breakers[&venue])
    }

    /// Whether all the given venues currently allow calls.
    #[must_use]
    pub fn all_allow(&self, venues: &[Venue]) -> bool {
        venues.iter().all(|v| self.get(*v).allows())
    }
}
