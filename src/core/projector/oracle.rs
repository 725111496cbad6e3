//! Linear minimization oracle over the polytope's binary vertices.
//!
//! Each Frank-Wolfe iteration needs `argmin_{z in vertices(P)} <c, z>`,
//! an integer programme over n binary outcome variables constrained by
//! the graph's structure. The model is assembled straight from the
//! constraint kinds (no intermediate matrix form): a `SumEquals` row
//! becomes an equality over its member variables, an `Implication`
//! orders two variables, `MutuallyExclusive` caps a pair at one.
//!
//! The trait seam lets tests substitute a deterministic oracle; the
//! production implementation runs HiGHS through good_lp.

use good_lp::solvers::highs::highs;
use good_lp::{constraint, variable, variables, Expression, Solution, SolverModel, Variable};
use rust_decimal::prelude::ToPrimitive;

use crate::core::domain::{ConstraintGraph, ConstraintKind};
use crate::error::{Error, Result};

/// Solves the projection's linear subproblems over one constraint graph.
pub trait VertexOracle: Send + Sync {
    /// Oracle name for logging.
    fn name(&self) -> &'static str;

    /// The polytope vertex minimizing `<gradient, z>`.
    ///
    /// # Errors
    ///
    /// Fails when the gradient dimension does not match the graph or the
    /// constraint system admits no vertex.
    fn descent_vertex(&self, graph: &ConstraintGraph, gradient: &[f64]) -> Result<Vec<f64>>;

    /// Whether the constraint system admits any point at all, checked on
    /// the continuous relaxation. Contradictory graphs are rejected here
    /// before any projection runs.
    fn is_satisfiable(&self, graph: &ConstraintGraph) -> Result<bool>;
}

/// HiGHS-backed oracle.
#[derive(Debug, Default, Clone)]
pub struct HighsOracle;

impl HighsOracle {
    /// Create a new HiGHS oracle.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Build and solve the model. `integral` selects the vertex programme
    /// (binary variables) versus the continuous relaxation used for
    /// satisfiability. Returns `None` when HiGHS proves infeasibility.
    fn solve(
        graph: &ConstraintGraph,
        gradient: &[f64],
        integral: bool,
    ) -> Option<Vec<f64>> {
        let n = graph.dimension();
        if n == 0 {
            return Some(Vec::new());
        }

        let mut vars = variables!();
        let z: Vec<Variable> = (0..n)
            .map(|_| {
                let mut outcome = variable().min(0.0).max(1.0);
                if integral {
                    outcome = outcome.integer();
                }
                vars.add(outcome)
            })
            .collect();

        let objective: Expression = z
            .iter()
            .zip(gradient.iter())
            .map(|(var, g)| *g * *var)
            .sum();
        let mut model = vars.minimise(objective).using(highs);

        for rule in graph.constraints() {
            match &rule.kind {
                ConstraintKind::SumEquals { indices, rhs } => {
                    let members: Expression = indices
                        .iter()
                        .map(|&i| Expression::from(z[i]))
                        .sum();
                    let rhs = rhs.to_f64().unwrap_or(0.0);
                    model = model.with(constraint!(members == rhs));
                }
                ConstraintKind::Implication { lesser, greater } => {
                    model = model.with(constraint!(z[*lesser] <= z[*greater]));
                }
                ConstraintKind::MutuallyExclusive { a, b } => {
                    model = model.with(constraint!(z[*a] + z[*b] <= 1.0));
                }
            }
        }

        // good_lp reports infeasible/unbounded as a solve error; with all
        // variables boxed in [0, 1] only infeasibility remains.
        let solution = model.solve().ok()?;
        Some(z.iter().map(|var| solution.value(*var)).collect())
    }
}

impl VertexOracle for HighsOracle {
    fn name(&self) -> &'static str {
        "highs"
    }

    fn descent_vertex(&self, graph: &ConstraintGraph, gradient: &[f64]) -> Result<Vec<f64>> {
        if gradient.len() != graph.dimension() {
            return Err(Error::Solver(format!(
                "gradient dimension {} does not match graph dimension {}",
                gradient.len(),
                graph.dimension()
            )));
        }
        Self::solve(graph, gradient, true)
            .ok_or_else(|| Error::Solver("constraint system admits no vertex".into()))
    }

    fn is_satisfiable(&self, graph: &ConstraintGraph) -> Result<bool> {
        let flat = vec![0.0; graph.dimension()];
        Ok(Self::solve(graph, &flat, false).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::TokenId;
    use rust_decimal_macros::dec;

    fn tokens(n: usize) -> Vec<TokenId> {
        (0..n).map(|i| TokenId::from(format!("t{i}"))).collect()
    }

    fn assert_close(vertex: &[f64], expected: &[f64]) {
        assert_eq!(vertex.len(), expected.len());
        for (v, e) in vertex.iter().zip(expected.iter()) {
            assert!((v - e).abs() < 1e-6, "expected {expected:?}, got {vertex:?}");
        }
    }

    #[test]
    fn gradient_signs_pick_the_cheap_corner() {
        let graph = ConstraintGraph::new(tokens(3));
        let oracle = HighsOracle::new();

        // Negative gradient coordinates want 1, positive want 0.
        let vertex = oracle.descent_vertex(&graph, &[-1.0, 2.0, -0.5]).unwrap();
        assert_close(&vertex, &[1.0, 0.0, 1.0]);
    }

    #[test]
    fn implication_keeps_vertices_ordered() {
        let mut graph = ConstraintGraph::new(tokens(2));
        graph.add(ConstraintKind::Implication { lesser: 0, greater: 1 });
        let oracle = HighsOracle::new();

        // Pulling z0 up drags z1 with it.
        let vertex = oracle.descent_vertex(&graph, &[-5.0, 0.1]).unwrap();
        assert_close(&vertex, &[1.0, 1.0]);
    }

    #[test]
    fn exclusive_pair_cannot_both_be_one() {
        let mut graph = ConstraintGraph::new(tokens(2));
        graph.add(ConstraintKind::MutuallyExclusive { a: 0, b: 1 });
        let oracle = HighsOracle::new();

        let vertex = oracle.descent_vertex(&graph, &[-1.0, -1.0]).unwrap();
        let sum: f64 = vertex.iter().sum();
        assert!(sum <= 1.0 + 1e-9, "vertex violated exclusivity: {vertex:?}");
    }

    #[test]
    fn sum_constraint_holds_at_the_vertex() {
        let mut graph = ConstraintGraph::new(tokens(3));
        graph.add(ConstraintKind::SumEquals {
            indices: vec![0, 1, 2],
            rhs: dec!(1),
        });
        let oracle = HighsOracle::new();

        let vertex = oracle.descent_vertex(&graph, &[0.3, -0.7, 0.1]).unwrap();
        let sum: f64 = vertex.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        // The minimizer puts the unit on the most negative coordinate.
        assert!((vertex[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn contradictory_graph_is_unsatisfiable() {
        let mut graph = ConstraintGraph::new(tokens(2));
        graph.add(ConstraintKind::SumEquals {
            indices: vec![0, 1],
            rhs: dec!(3),
        });
        let oracle = HighsOracle::new();

        assert!(!oracle.is_satisfiable(&graph).unwrap());
        assert!(oracle.descent_vertex(&graph, &[0.0, 0.0]).is_err());
    }

    #[test]
    fn satisfiable_graph_passes_the_relaxation() {
        let mut graph = ConstraintGraph::new(tokens(2));
        graph.add(ConstraintKind::MutuallyExclusive { a: 0, b: 1 });
        assert!(HighsOracle::new().is_satisfiable(&graph).unwrap());
    }

    #[test]
    fn dimension_mismatch_is_an_error() {
        let graph = ConstraintGraph::new(tokens(3));
        let err = HighsOracle::new().descent_vertex(&graph, &[0.0, 0.0]);
        assert!(matches!(err, Err(Error::Solver(_))));
    }

    #[test]
    fn empty_graph_yields_the_empty_vertex() {
        let graph = ConstraintGraph::new(Vec::new());
        let vertex = HighsOracle::new().descent_vertex(&graph, &[]).unwrap();
        assert!(vertex.is_empty());
    }
}
