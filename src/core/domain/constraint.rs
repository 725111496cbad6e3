//! Logical constraints between correlated markets.
//!
//! A constraint graph over n binary outcome tokens defines a convex
//! polytope in [0,1]^n; prices outside the polytope are logically
//! inconsistent and therefore arbitrageable.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::id::TokenId;

/// Kind of logical relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConstraintKind {
    /// `sum(z[i] for i in indices) = rhs` (e.g. all outcomes of one market).
    SumEquals { indices: Vec<usize>, rhs: Decimal },
    /// `z[lesser] <= z[greater]` (A implies B: P(A) <= P(B)).
    Implication { lesser: usize, greater: usize },
    /// `z[a] + z[b] <= 1` for mutually exclusive events.
    MutuallyExclusive { a: usize, b: usize },
}

/// One constraint over the outcome vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketConstraint {
    pub kind: ConstraintKind,
}

impl MarketConstraint {
    #[must_use]
    pub const fn new(kind: ConstraintKind) -> Self {
        Self { kind }
    }

    /// Whether a vector satisfies this constraint within `tolerance`.
    #[must_use]
    pub fn is_satisfied(&self, z: &[f64], tolerance: f64) -> bool {
        match &self.kind {
            ConstraintKind::SumEquals { indices, rhs } => {
                let sum: f64 = indices.iter().map(|&i| z[i]).sum();
                let rhs = decimal_to_f64(*rhs);
                (sum - rhs).abs() <= tolerance
            }
            ConstraintKind::Implication { lesser, greater } => {
                z[*lesser] <= z[*greater] + tolerance
            }
            ConstraintKind::MutuallyExclusive { a, b } => z[*a] + z[*b] <= 1.0 + tolerance,
        }
    }
}

/// A set of constraints over `n` correlated outcome tokens.
///
/// The token list gives each coordinate its identity; index i of a price
/// vector refers to `tokens[i]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintGraph {
    tokens: Vec<TokenId>,
    constraints: Vec<MarketConstraint>,
}

impl ConstraintGraph {
    /// Create a graph over the given tokens.
    #[must_use]
    pub fn new(tokens: Vec<TokenId>) -> Self {
        Self {
            tokens,
            constraints: Vec::new(),
        }
    }

    /// Add a constraint. Out-of-range indices are rejected.
    pub fn add(&mut self, kind: ConstraintKind) -> bool {
        let n = self.tokens.len();
        let in_range = match &kind {
            ConstraintKind::SumEquals { indices, .. } => indices.iter().all(|&i| i < n),
            ConstraintKind::Implication { lesser, greater } => *lesser < n && *greater < n,
            ConstraintKind::MutuallyExclusive { a, b } => *a < n && *b < n,
        };
        if in_range {
            self.constraints.push(MarketConstraint::new(kind));
        }
        in_range
    }

    /// Number of outcome tokens (polytope dimension).
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.tokens.len()
    }

    /// The outcome tokens, in coordinate order.
    #[must_use]
    pub fn tokens(&self) -> &[TokenId] {
        &self.tokens
    }

    /// The constraints.
    #[must_use]
    pub fn constraints(&self) -> &[MarketConstraint] {
        &self.constraints
    }

    /// Whether a vector satisfies every constraint within `tolerance`.
    #[must_use]
    pub fn is_feasible(&self, z: &[f64], tolerance: f64) -> bool {
        z.len() == self.dimension()
            && self
                .constraints
                .iter()
                .all(|c| c.is_satisfied(z, tolerance))
    }

    /// Stable hash of the constraint structure, used as a cache key for
    /// the linear minimization oracle.
    #[must_use]
    pub fn structure_hash(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.tokens.len().hash(&mut hasher);
        for c in &self.constraints {
            match &c.kind {
                ConstraintKind::SumEquals { indices, rhs } => {
                    0u8.hash(&mut hasher);
                    indices.hash(&mut hasher);
                    rhs.hash(&mut hasher);
                }
                ConstraintKind::Implication { lesser, greater } => {
                    1u8.hash(&mut hasher);
                    lesser.hash(&mut hasher);
                    greater.hash(&mut hasher);
                }
                ConstraintKind::MutuallyExclusive { a, b } => {
                    2u8.hash(&mut hasher);
                    a.hash(&mut hasher);
                    b.hash(&mut hasher);
                }
            }
        }
        hasher.finish()
    }
}

fn decimal_to_f64(d: Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    d.to_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn graph() -> ConstraintGraph {
        let mut g = ConstraintGraph::new(vec![
            TokenId::from("a"),
            TokenId::from("b"),
            TokenId::from("a-and-b"),
        ]);
        assert!(g.add(ConstraintKind::Implication { lesser: 2, greater: 0 }));
        assert!(g.add(ConstraintKind::Implication { lesser: 2, greater: 1 }));
        g
    }

    #[test]
    fn feasibility_checks_all_constraints() {
        let g = graph();
        assert!(g.is_feasible(&[0.5, 0.5, 0.3], 1e-9));
        // P(A and B) above P(A) violates the implication.
        assert!(!g.is_feasible(&[0.3, 0.4, 0.5], 1e-9));
    }

    #[test]
    fn out_of_range_constraints_are_rejected() {
        let mut g = ConstraintGraph::new(vec![TokenId::from("a")]);
        assert!(!g.add(ConstraintKind::MutuallyExclusive { a: 0, b: 3 }));
        assert!(g.constraints().is_empty());
    }

    #[test]
    fn sum_constraint_uses_tolerance() {
        let mut g = ConstraintGraph::new(vec![TokenId::from("y"), TokenId::from("n")]);
        g.add(ConstraintKind::SumEquals {
            indices: vec![0, 1],
            rhs: dec!(1),
        });
        assert!(g.is_feasible(&[0.6, 0.4], 1e-6));
        assert!(!g.is_feasible(&[0.6, 0.5], 1e-6));
    }

    #[test]
    fn structure_hash_is_stable_and_discriminating() {
        let g1 = graph();
        let g2 = graph();
        assert_eq!(g1.structure_hash(), g2.structure_hash());

        let mut g3 = graph();
        g3.add(ConstraintKind::MutuallyExclusive { a: 0, b: 1 });
        assert_ne!(g1.structure_hash(), g3.structure_hash());
    }
}
