//! Barrier Frank-Wolfe projection onto the marginal polytope.
//!
//! Given current prices θ of n correlated binary tokens and a constraint
//! graph defining the polytope P of logically consistent price vectors,
//! the projector computes `μ* = argmin_{μ in P} KL(μ ‖ θ)` by conditional
//! gradient descent: instead of projecting directly, each iteration solves
//! a linear minimization over the binary vertices of P (an integer
//! programme) and steps toward the minimizing vertex.
//!
//! The KL gradient `log(μ) − log(θ)` explodes near the boundary, so a log
//! barrier is blended into the gradient and oracle vertices are contracted
//! toward the uniform point `u = 1/n · 1`. The contraction ε decays
//! geometrically as the iterate converges.
//!
//! A price vector outside P by more than a threshold is a multi-market
//! arbitrage; the per-coordinate sign of `μ* − θ` gives the trade
//! direction.

mod cache;
mod oracle;

pub use cache::{CacheStats, LmoCache};
pub use oracle::{HighsOracle, VertexOracle};

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::core::domain::ConstraintGraph;
use crate::error::{Error, Result};

const CLIP_FLOOR: f64 = 1e-12;
const CLIP_CEIL: f64 = 1.0 - 1e-12;

/// Tuning parameters for the projection.
#[derive(Debug, Clone)]
pub struct ProjectorConfig {
    /// Maximum Frank-Wolfe iterations.
    pub max_iterations: usize,
    /// Duality-gap convergence tolerance.
    pub tolerance: f64,
    /// Weight of the log barrier in the gradient.
    pub barrier_weight: f64,
    /// Starting vertex contraction toward the uniform point.
    pub initial_epsilon: f64,
    /// Geometric decay factor for the contraction.
    pub epsilon_decay: f64,
    /// Contraction floor.
    pub epsilon_floor: f64,
    /// Stop after this many iterations with an unchanged gap.
    pub stall_limit: usize,
    /// Fast mode for volatile ticks: fewer iterations, faster decay.
    pub volatility_mode: bool,
    /// Max-norm deviation above which a multi-market arb is signalled.
    pub deviation_threshold: f64,
    /// LMO cache capacity.
    pub cache_size: usize,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            tolerance: 1e-6,
            barrier_weight: 0.01,
            initial_epsilon: 0.1,
            epsilon_decay: 0.9,
            epsilon_floor: 1e-6,
            stall_limit: 5,
            volatility_mode: false,
            deviation_threshold: 0.01,
            cache_size: 500,
        }
    }
}

/// Result of one projection.
#[derive(Debug, Clone)]
pub struct Projection {
    /// Arbitrage-free price vector on (or ε-near) the polytope.
    pub mu: Vec<f64>,
    /// Iterations executed.
    pub iterations: usize,
    /// Whether the duality gap fell below tolerance.
    pub converged: bool,
    /// Whether the loop exited on stall detection.
    pub stalled: bool,
    /// KL(μ* ‖ θ), an estimate of the maximal arbitrage profit.
    pub divergence: f64,
}

impl Projection {
    /// Per-coordinate deviation μ* − θ.
    #[must_use]
    pub fn deviations(&self, theta: &[f64]) -> Vec<f64> {
        self.mu
            .iter()
            .zip(theta.iter())
            .map(|(m, t)| m - t)
            .collect()
    }

    /// Largest absolute deviation.
    #[must_use]
    pub fn max_deviation(&self, theta: &[f64]) -> f64 {
        self.deviations(theta)
            .iter()
            .fold(0.0_f64, |acc, d| acc.max(d.abs()))
    }
}

/// Per-coordinate trade signal derived from a projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinateSignal {
    /// Fair value above market: buy.
    Buy,
    /// Fair value below market: sell.
    Sell,
    /// Within threshold.
    Hold,
}

/// A detected multi-market mispricing.
#[derive(Debug, Clone)]
pub struct MultiMarketSignal {
    /// μ* − θ per coordinate.
    pub deviations: Vec<f64>,
    /// Largest absolute deviation.
    pub max_deviation: f64,
    /// Trade direction per coordinate.
    pub signals: Vec<CoordinateSignal>,
}

/// Barrier Frank-Wolfe projector with a shared oracle cache.
pub struct PolytopeProjector {
    config: ProjectorConfig,
    oracle: Arc<dyn VertexOracle>,
    cache: Mutex<LmoCache>,
}

impl PolytopeProjector {
    /// Create a projector over the given vertex oracle.
    #[must_use]
    pub fn new(config: ProjectorConfig, oracle: Arc<dyn VertexOracle>) -> Self {
        let cache = Mutex::new(LmoCache::new(config.cache_size));
        Self {
            config,
            oracle,
            cache,
        }
    }

    /// Current oracle cache statistics.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().stats()
    }

    /// Check that the constraint system admits at least one point.
    ///
    /// Contradictory constraint sets are rejected before any projection.
    pub fn validate(&self, graph: &ConstraintGraph) -> Result<()> {
        if self.oracle.is_satisfiable(graph)? {
            Ok(())
        } else {
            Err(Error::Solver("constraint system is infeasible".into()))
        }
    }

    /// Project θ onto the polytope defined by `graph`.
    pub fn project(&self, theta: &[f64], graph: &ConstraintGraph) -> Result<Projection> {
        let n = theta.len();
        if n == 0 || n != graph.dimension() {
            return Ok(Projection {
                mu: vec![],
                iterations: 0,
                converged: true,
                stalled: false,
                divergence: 0.0,
            });
        }

        let uniform = vec![1.0 / n as f64; n];

        let mut max_iterations = self.config.max_iterations;
        let mut epsilon = self.config.initial_epsilon;
        if self.config.volatility_mode {
            max_iterations = max_iterations.min(50);
            epsilon *= 0.5;
        }

        // Feasible starting point: a vertex blended toward the barrier point.
        let z0 = self.descent_vertex(graph, &vec![0.0; n])?;
        let mut mu: Vec<f64> = z0
            .iter()
            .zip(uniform.iter())
            .map(|(z, u)| (1.0 - epsilon) * z + epsilon * u)
            .collect();
        clip(&mut mu);

        let mut prev_gap = f64::INFINITY;
        let mut stall_count = 0usize;
        let mut iterations = 0usize;
        let mut converged = false;
        let mut stalled = false;

        for t in 0..max_iterations {
            iterations = t + 1;

            let gradient = barrier_gradient(&mu, theta, self.config.barrier_weight);
            let s = self.descent_vertex(graph, &gradient)?;

            let s_bar: Vec<f64> = s
                .iter()
                .zip(uniform.iter())
                .map(|(si, u)| (1.0 - epsilon) * si + epsilon * u)
                .collect();

            let gap: f64 = gradient
                .iter()
                .zip(mu.iter().zip(s_bar.iter()))
                .map(|(g, (m, sb))| g * (m - sb))
                .sum();

            debug!(iteration = t, gap, epsilon, "projection step");

            if gap <= self.config.tolerance {
                converged = true;
                break;
            }

            if (prev_gap - gap).abs() < self.config.tolerance * 0.1 {
                stall_count += 1;
                if stall_count > self.config.stall_limit {
                    warn!(iteration = t, gap, "projection stalled");
                    stalled = true;
                    break;
                }
            } else {
                stall_count = 0;
            }
            prev_gap = gap;

            if self.config.volatility_mode {
                epsilon = (epsilon * 0.8).max(1e-8);
            } else if gap < 10.0 * epsilon {
                epsilon = (epsilon * self.config.epsilon_decay).max(self.config.epsilon_floor);
            }

            let gamma = 2.0 / (t as f64 + 2.0);
            for i in 0..n {
                mu[i] = (1.0 - gamma) * mu[i] + gamma * s_bar[i];
            }
            clip(&mut mu);
        }

        let divergence = kl_divergence(&mu, theta);
        Ok(Projection {
            mu,
            iterations,
            converged,
            stalled,
            divergence,
        })
    }

    /// Project and translate the deviation into a trade signal.
    ///
    /// Returns `None` when θ is within the deviation threshold of the
    /// polytope, i.e. no multi-market arbitrage exists.
    pub fn detect(&self, theta: &[f64], graph: &ConstraintGraph) -> Result<Option<MultiMarketSignal>> {
        let projection = self.project(theta, graph)?;
        let deviations = projection.deviations(theta);
        let max_deviation = projection.max_deviation(theta);

        if max_deviation <= self.config.deviation_threshold {
            return Ok(None);
        }

        let threshold = self.config.deviation_threshold;
        let signals = deviations
            .iter()
            .map(|d| {
                if *d > threshold {
                    CoordinateSignal::Buy
                } else if *d < -threshold {
                    CoordinateSignal::Sell
                } else {
                    CoordinateSignal::Hold
                }
            })
            .collect();

        Ok(Some(MultiMarketSignal {
            deviations,
            max_deviation,
            signals,
        }))
    }

    /// Solve the linear minimization oracle, consulting the cache first.
    fn descent_vertex(&self, graph: &ConstraintGraph, gradient: &[f64]) -> Result<Vec<f64>> {
        let key = LmoCache::key(graph.structure_hash(), gradient);
        if let Some(vertex) = self.cache.lock().get(key) {
            return Ok(vertex);
        }

        let vertex = self.oracle.descent_vertex(graph, gradient)?;
        self.cache.lock().put(key, vertex.clone());
        Ok(vertex)
    }
}

/// `D(μ ‖ θ) = Σ μ ln(μ/θ)`, the LMSR conjugate divergence.
#[must_use]
pub fn kl_divergence(mu: &[f64], theta: &[f64]) -> f64 {
    mu.iter()
        .zip(theta.iter())
        .map(|(m, t)| {
            let m = m.clamp(CLIP_FLOOR, 1.0);
            let t = t.clamp(CLIP_FLOOR, 1.0);
            m * (m.ln() - t.ln())
        })
        .sum()
}

/// Gradient of the barrier-augmented objective:
/// `log(μ) − log(θ) + w·(−1/μ + 1/(1−μ))`.
#[must_use]
pub fn barrier_gradient(mu: &[f64], theta: &[f64], barrier_weight: f64) -> Vec<f64> {
    mu.iter()
        .zip(theta.iter())
        .map(|(m, t)| {
            let m = m.clamp(CLIP_FLOOR, CLIP_CEIL);
            let t = t.clamp(CLIP_FLOOR, 1.0);
            let kl = m.ln() - t.ln();
            let barrier = -1.0 / m + 1.0 / (1.0 - m);
            kl + barrier_weight * barrier
        })
        .collect()
}

fn clip(mu: &mut [f64]) {
    for m in mu {
        *m = m.clamp(CLIP_FLOOR, CLIP_CEIL);
    }
}
