//! Prometheus metrics registry and HTTP exporter.
//!
//! All counters, gauges and histograms live in one registry served in
//! Prometheus text format at `/metrics`, with a `/healthz` liveness probe
//! beside it.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use prometheus::{
    Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use tracing::info;

use crate::error::{Error, Result};

/// Centralized metrics for the engine.
///
/// Naming convention: `polyarb_*`, with venue/direction labels where a
/// breakdown is useful.
pub struct Metrics {
    registry: Registry,
    /// Updates accepted onto the bus, by venue.
    pub updates_total: IntCounterVec,
    /// Updates dropped by bus coalescing, by venue.
    pub updates_dropped_total: IntCounterVec,
    /// Frames dropped by protocol decoders, by venue.
    pub decode_errors_total: IntCounterVec,
    /// Venue connectivity (1 = connected).
    pub venue_connected: GaugeVec,
    /// Venue reconnect attempts.
    pub reconnects_total: IntCounterVec,
    /// Opportunities emitted, by direction.
    pub opportunities_total: IntCounterVec,
    /// Strategy outcomes, by terminal state.
    pub strategies_total: IntCounterVec,
    /// Opportunities denied by the risk guardian, by reason.
    pub blocked_by_risk_total: IntCounterVec,
    /// Detection-path latency histograms, by stage.
    pub detection_latency_ms: HistogramVec,
    /// p99 gauges published from the latency tracker, by stage.
    pub detection_p99_ms: GaugeVec,
    /// End-to-end strategy execution latency.
    pub execution_latency_ms: HistogramVec,
    /// Recovery passes, by terminal state.
    pub recoveries_total: IntCounterVec,
    /// Accumulated realized P&L.
    pub realized_pnl: Gauge,
    /// Current equity.
    pub equity: Gauge,
    /// Circuit breaker state per venue (0 closed, 1 half-open, 2 open).
    pub breaker_state: GaugeVec,
    /// Estimated chain fees spent.
    pub chain_fees_usd_total: Gauge,
}

impl Metrics {
    /// Create and register all metrics.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let updates_total = IntCounterVec::new(
            Opts::new("polyarb_updates_total", "Market updates accepted"),
            &["venue"],
        )
        .map_err(to_error)?;
        let updates_dropped_total = IntCounterVec::new(
            Opts::new("polyarb_updates_dropped_total", "Updates dropped by the bus"),
            &["venue"],
        )
        .map_err(to_error)?;
        let decode_errors_total = IntCounterVec::new(
            Opts::new("polyarb_decode_errors_total", "Frames dropped by decoders"),
            &["venue"],
        )
        .map_err(to_error)?;
        let venue_connected = GaugeVec::new(
            Opts::new("polyarb_venue_connected", "Venue connectivity (1=connected)"),
            &["venue"],
        )
        .map_err(to_error)?;
        let reconnects_total = IntCounterVec::new(
            Opts::new("polyarb_reconnects_total", "Venue reconnect attempts"),
            &["venue"],
        )
        .map_err(to_error)?;
        let opportunities_total = IntCounterVec::new(
            Opts::new("polyarb_opportunities_total", "Opportunities emitted"),
            &["direction"],
        )
        .map_err(to_error)?;
        let strategies_total = IntCounterVec::new(
            Opts::new("polyarb_strategies_total", "Strategy attempts by outcome"),
            &["state"],
        )
        .map_err(to_error)?;
        let blocked_by_risk_total = IntCounterVec::new(
            Opts::new("polyarb_blocked_by_risk_total", "Risk guardian denials"),
            &["reason"],
        )
        .map_err(to_error)?;
        let detection_latency_ms = HistogramVec::new(
            HistogramOpts::new(
                "polyarb_detection_latency_ms",
                "Detection path latency in milliseconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0]),
            &["stage"],
        )
        .map_err(to_error)?;
        let detection_p99_ms = GaugeVec::new(
            Opts::new("polyarb_detection_p99_ms", "Detection p99 latency"),
            &["stage"],
        )
        .map_err(to_error)?;
        let execution_latency_ms = HistogramVec::new(
            HistogramOpts::new(
                "polyarb_execution_latency_ms",
                "Strategy execution latency in milliseconds",
            )
            .buckets(vec![10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2000.0, 5000.0]),
            &["state"],
        )
        .map_err(to_error)?;
        let recoveries_total = IntCounterVec::new(
            Opts::new("polyarb_recoveries_total", "Recovery passes by outcome"),
            &["state"],
        )
        .map_err(to_error)?;
        let realized_pnl = Gauge::new("polyarb_realized_pnl_usd", "Accumulated realized P&L")
            .map_err(to_error)?;
        let equity = Gauge::new("polyarb_equity_usd", "Current equity").map_err(to_error)?;
        let breaker_state = GaugeVec::new(
            Opts::new(
                "polyarb_breaker_state",
                "Circuit breaker state (0=closed,1=half-open,2=open)",
            ),
            &["venue"],
        )
        .map_err(to_error)?;
        let chain_fees_usd_total =
            Gauge::new("polyarb_chain_fees_usd_total", "Estimated chain fees spent")
                .map_err(to_error)?;

        for collector in [
            Box::new(updates_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(updates_dropped_total.clone()),
            Box::new(decode_errors_total.clone()),
            Box::new(venue_connected.clone()),
            Box::new(reconnects_total.clone()),
            Box::new(opportunities_total.clone()),
            Box::new(strategies_total.clone()),
            Box::new(blocked_by_risk_total.clone()),
            Box::new(detection_latency_ms.clone()),
            Box::new(detection_p99_ms.clone()),
            Box::new(execution_latency_ms.clone()),
            Box::new(recoveries_total.clone()),
            Box::new(realized_pnl.clone()),
            Box::new(equity.clone()),
            Box::new(breaker_state.clone()),
            Box::new(chain_fees_usd_total.clone()),
        ] {
            registry.register(collector).map_err(to_error)?;
        }

        Ok(Self {
            registry,
            updates_total,
            updates_dropped_total,
            decode_errors_total,
            venue_connected,
            reconnects_total,
            opportunities_total,
            strategies_total,
            blocked_by_risk_total,
            detection_latency_ms,
            detection_p99_ms,
            execution_latency_ms,
            recoveries_total,
            realized_pnl,
            equity,
            breaker_state,
            chain_fees_usd_total,
        })
    }

    /// Render the registry in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// Serve `/metrics` and `/healthz` on the given port until the process
    /// exits.
    pub async fn serve(self: Arc<Self>, port: u16) -> Result<()> {
        let app = Router::new()
            .route("/metrics", get(render_metrics))
            .route("/healthz", get(|| async { "ok" }))
            .with_state(Arc::clone(&self));

        let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
        info!(port, "Metrics exporter listening");
        axum::serve(listener, app).await?;
        Ok(())
    }
}

async fn render_metrics(State(metrics): State<Arc<Metrics>>) -> String {
    metrics.render()
}

fn to_error(e: prometheus::Error) -> Error {
    Error::Execution(format!("metrics registry: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_without_collision() {
        let metrics = Metrics::new().unwrap();
        metrics.updates_total.with_label_values(&["polymarket"]).inc();
        metrics
            .opportunities_total
            .with_label_values(&["atomic_split"])
            .inc();
        metrics.equity.set(1000.0);

        let rendered = metrics.render();
        assert!(rendered.contains("polyarb_updates_total"));
        assert!(rendered.contains("polyarb_equity_usd 1000"));
    }

    #[test]
    fn histograms_observe() {
        let metrics = Metrics::new().unwrap();
        metrics
            .detection_latency_ms
            .with_label_values(&["ingestion"])
            .observe(3.2);
        assert!(metrics.render().contains("polyarb_detection_latency_ms"));
    }

    #[test]
    fn breaker_gauge_tracks_states() {
        let metrics = Metrics::new().unwrap();
        metrics.breaker_state.with_label_values(&["betfair"]).set(2.0);
        assert!(metrics.render().contains("polyarb_breaker_state"));
    }
}
