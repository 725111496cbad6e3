//! Parallel transaction broadcast across RPC endpoints.
//!
//! The signed transaction races to every configured endpoint at once; the
//! first hash back wins and slow endpoints are ignored. Per-endpoint
//! latency/reliability EWMAs rank healthier endpoints first so the race
//! starts where it is most likely to finish.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use futures_util::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// EWMA smoothing factor for latency and jitter.
const EWMA_ALPHA: f64 = 0.2;

/// Racer settings.
#[derive(Debug, Clone)]
pub struct RpcRacerConfig {
    /// JSON-RPC endpoints; at least two are required for racing.
    pub endpoints: Vec<String>,
    /// Per-endpoint request timeout.
    pub request_timeout: Duration,
    /// Jitter (seconds) above which an endpoint is considered unstable.
    pub jitter_threshold: f64,
}

impl Default for RpcRacerConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            request_timeout: Duration::from_secs(2),
            jitter_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct NodeStats {
    latency_ewma: f64,
    jitter_ewma: f64,
    success_count: u64,
    failure_count: u64,
}

impl NodeStats {
    fn record(&mut self, latency: Option<f64>, success: bool) {
        if let Some(latency) = latency {
            if self.latency_ewma == 0.0 {
                self.latency_ewma = latency;
            } else {
                let deviation = (latency - self.latency_ewma).abs();
                self.jitter_ewma = EWMA_ALPHA * deviation + (1.0 - EWMA_ALPHA) * self.jitter_ewma;
                self.latency_ewma = EWMA_ALPHA * latency + (1.0 - EWMA_ALPHA) * self.latency_ewma;
            }
        }
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
    }

    fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            return 0.5; // unknown
        }
        self.success_count as f64 / total as f64
    }

    /// Combined score, lower is better.
    fn reliability_score(&self) -> f64 {
        let latency = if self.latency_ewma == 0.0 {
            1.0
        } else {
            self.latency_ewma
        };
        latency * (2.0 - self.success_rate()) + self.jitter_ewma * 2.0
    }
}

/// Health snapshot for one endpoint.
#[derive(Debug, Clone)]
pub struct NodeHealth {
    pub url: String,
    pub latency_ewma: f64,
    pub jitter_ewma: f64,
    pub success_rate: f64,
    pub score: f64,
    pub healthy: bool,
}

/// Races raw transactions across all configured endpoints.
pub struct RpcRacer {
    config: RpcRacerConfig,
    client: reqwest::Client,
    stats: Mutex<HashMap<String, NodeStats>>,
}

impl RpcRacer {
    #[must_use]
    pub fn new(config: RpcRacerConfig, client: reqwest::Client) -> Self {
        let stats = config
            .endpoints
            .iter()
            .map(|url| (url.clone(), NodeStats::default()))
            .collect();
        Self {
            config,
            client,
            stats: Mutex::new(stats),
        }
    }

    /// Number of configured endpoints.
    #[must_use]
    pub fn endpoint_count(&self) -> usize {
        self.config.endpoints.len()
    }

    /// Endpoints ranked by reliability, best first. Endpoints with high
    /// jitter and repeated failures are demoted behind stable ones.
    #[must_use]
    pub fn ranked_endpoints(&self) -> Vec<String> {
        let stats = self.stats.lock();
        let mut active: Vec<(&String, &NodeStats)> = stats
            .iter()
            .filter(|(_, s)| s.jitter_ewma < self.config.jitter_threshold || s.failure_count < 3)
            .collect();
        if active.is_empty() {
            active = stats.iter().collect();
        }
        active.sort_by(|a, b| {
            a.1.reliability_score()
                .partial_cmp(&b.1.reliability_score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        active.into_iter().map(|(url, _)| url.clone()).collect()
    }

    /// Broadcast a signed transaction to every endpoint; first hash wins.
    pub async fn broadcast(&self, raw_tx_hex: &str) -> Result<String> {
        let ranked = self.ranked_endpoints();
        if ranked.len() < 2 {
            return Err(Error::Execution(
                "rpc racing requires at least two endpoints".into(),
            ));
        }
        debug!(endpoints = ranked.len(), "Racing transaction broadcast");

        let mut in_flight: FuturesUnordered<_> = ranked
            .iter()
            .map(|url| self.send_to_endpoint(url.clone(), raw_tx_hex.to_string()))
            .collect();

        let mut last_error: Option<String> = None;
        while let Some((url, outcome)) = in_flight.next().await {
            match outcome {
                Ok(hash) => {
                    info!(endpoint = %url, tx_hash = %hash, "Transaction accepted");
                    return Ok(hash);
                }
                Err(reason) => {
                    debug!(endpoint = %url, reason = %reason, "Endpoint rejected broadcast");
                    last_error = Some(reason);
                }
            }
        }

        Err(Error::Execution(format!(
            "all endpoints rejected the transaction: {}",
            last_error.unwrap_or_else(|| "no endpoints responded".into())
        )))
    }

    async fn send_to_endpoint(
        &self,
        url: String,
        raw_tx_hex: String,
    ) -> (String, std::result::Result<String, String>) {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": "eth_sendRawTransaction",
            "params": [raw_tx_hex],
            "id": 1,
        });

        let started = Instant::now();
        let outcome = tokio::time::timeout(
            self.config.request_timeout,
            self.client.post(&url).json(&payload).send(),
        )
        .await;

        let result = match outcome {
            Err(_) => Err("timeout".to_string()),
            Ok(Err(e)) => Err(e.to_string()),
            Ok(Ok(response)) => match response.json::<serde_json::Value>().await {
                Err(e) => Err(e.to_string()),
                Ok(body) => {
                    if let Some(hash) = body.get("result").and_then(|v| v.as_str()) {
                        Ok(hash.to_string())
                    } else {
                        Err(body
                            .get("error")
                            .map(|e| e.to_string())
                            .unwrap_or_else(|| "malformed response".into()))
                    }
                }
            },
        };

        let latency = started.elapsed().as_secs_f64();
        let success = result.is_ok();
        if let Some(stats) = self.stats.lock().get_mut(&url) {
            stats.record(Some(latency), success);
        }
        if !success {
            warn!(endpoint = %url, "RPC broadcast attempt failed");
        }
        (url, result)
    }

    /// Health snapshot across all endpoints.
    #[must_use]
    pub fn health_check(&self) -> Vec<NodeHealth> {
        let stats = self.stats.lock();
        stats
            .iter()
            .map(|(url, s)| NodeHealth {
                url: url.clone(),
                latency_ewma: s.latency_ewma,
                jitter_ewma: s.jitter_ewma,
                success_rate: s.success_rate(),
                score: s.reliability_score(),
                healthy: s.jitter_ewma < self.config.jitter_threshold,
            })
            .collect()
    }

    #[cfg(test)]
    fn seed_stats(&self, url: &str, latency: f64, successes: u64, failures: u64) {
        let mut stats = self.stats.lock();
        let entry = stats.entry(url.to_string()).or_default();
        for _ in 0..successes {
            entry.record(Some(latency), true);
        }
        for _ in 0..failures {
            entry.record(Some(latency), false);
        }
    }
}
