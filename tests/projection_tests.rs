//! Multi-market projection scenarios over the public API.

use std::sync::Arc;

use polyarb::core::domain::{ConstraintGraph, ConstraintKind, TokenId};
use polyarb::core::projector::{
    CoordinateSignal, HighsOracle, PolytopeProjector, ProjectorConfig, VertexOracle,
};

fn conjunction_graph() -> ConstraintGraph {
    // Three markets: A, B, and the conjunction A∧B with
    // P(A∧B) <= P(A) and P(A∧B) <= P(B).
    let mut graph = ConstraintGraph::new(vec![
        TokenId::from("a"),
        TokenId::from("b"),
        TokenId::from("a-and-b"),
    ]);
    assert!(graph.add(ConstraintKind::Implication { lesser: 2, greater: 0 }));
    assert!(graph.add(ConstraintKind::Implication { lesser: 2, greater: 1 }));
    graph
}

fn projector() -> PolytopeProjector {
    PolytopeProjector::new(ProjectorConfig::default(), Arc::new(HighsOracle::new()))
}

/// Scenario: θ = (0.30, 0.40, 0.50) violates both implications. The
/// projection satisfies the constraints and prices the conjunction below
/// both marginals; the trade direction is to sell the conjunction.
#[test]
fn conjunction_overpricing_is_projected_out() {
    let p = projector();
    let graph = conjunction_graph();
    let theta = [0.30, 0.40, 0.50];

    let projection = p.project(&theta, &graph).unwrap();
    assert!(graph.is_feasible(&projection.mu, 1e-5));
    assert!(
        projection.mu[2] <= projection.mu[0].min(projection.mu[1]) + 1e-5,
        "projection kept the conjunction above its marginals: {:?}",
        projection.mu
    );
    assert!(projection.mu.iter().all(|m| (0.0..=1.0).contains(m)));

    let signal = p.detect(&theta, &graph).unwrap().expect("arbitrage expected");
    assert!(signal.max_deviation > 0.01);
    assert_eq!(signal.signals[2], CoordinateSignal::Sell);
}

/// The projector validates constraint systems before projecting.
#[test]
fn contradictory_systems_are_rejected_up_front() {
    use rust_decimal_macros::dec;

    let p = projector();
    let mut graph = ConstraintGraph::new(vec![TokenId::from("x"), TokenId::from("y")]);
    graph.add(ConstraintKind::SumEquals {
        indices: vec![0, 1],
        rhs: dec!(3),
    });
    assert!(p.validate(&graph).is_err());
    assert!(!HighsOracle::new().is_satisfiable(&graph).unwrap());

    assert!(p.validate(&conjunction_graph()).is_ok());
}

/// Mutually exclusive outcomes priced over 1.0 yield a sell signal on at
/// least one side.
#[test]
fn exclusive_overpricing_yields_sell_signals() {
    let mut graph = ConstraintGraph::new(vec![TokenId::from("p"), TokenId::from("q")]);
    graph.add(ConstraintKind::MutuallyExclusive { a: 0, b: 1 });

    let p = projector();
    let theta = [0.65, 0.60]; // sums to 1.25
    let signal = p.detect(&theta, &graph).unwrap().expect("arbitrage expected");
    assert!(signal
        .signals
        .iter()
        .any(|s| *s == CoordinateSignal::Sell));
}

/// Repeated projections reuse oracle vertices through the LRU cache.
#[test]
fn oracle_cache_reuses_vertices_across_ticks() {
    let p = projector();
    let graph = conjunction_graph();

    p.project(&[0.30, 0.40, 0.50], &graph).unwrap();
    p.project(&[0.30, 0.40, 0.50], &graph).unwrap();

    let stats = p.cache_stats();
    assert!(stats.hits > 0);
    assert!(stats.size <= stats.capacity);
}
