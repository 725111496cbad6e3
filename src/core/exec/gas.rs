//! EIP-1559 fee prediction for on-chain legs.
//!
//! Queries `eth_feeHistory` for recent base fees and priority-fee
//! percentiles, predicts the next block's base fee (bounded by the 12.5%
//! per-block change rule), and falls back to static safe parameters when
//! the endpoint is unreachable.

use std::collections::VecDeque;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::Result;

const GWEI: u128 = 1_000_000_000;
/// Sliding window of observed base fees.
const HISTORY_SIZE: usize = 10;

/// Estimator settings.
#[derive(Debug, Clone)]
pub struct GasEstimatorConfig {
    /// JSON-RPC endpoint for `eth_feeHistory`; `None` forces the fallback.
    pub rpc_url: Option<String>,
    /// Safety multiplier on the observed priority fee.
    pub multiplier: f64,
    /// Gas units budgeted per transaction.
    pub gas_limit_per_tx: u64,
    /// Native token price for USD cost estimates.
    pub native_price_usd: Decimal,
}

impl Default for GasEstimatorConfig {
    fn default() -> Self {
        Self {
            rpc_url: None,
            multiplier: 1.1,
            gas_limit_per_tx: 200_000,
            native_price_usd: Decimal::new(5, 1), // $0.50
        }
    }
}

/// EIP-1559 gas parameters, in wei.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasParams {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
    pub estimated_base_fee: u128,
}

/// Gas price oracle.
pub struct GasEstimator {
    config: GasEstimatorConfig,
    client: reqwest::Client,
    base_fee_history: Mutex<VecDeque<u128>>,
}

impl GasEstimator {
    #[must_use]
    pub fn new(config: GasEstimatorConfig, client: reqwest::Client) -> Self {
        Self {
            config,
            client,
            base_fee_history: Mutex::new(VecDeque::with_capacity(HISTORY_SIZE)),
        }
    }

    /// Fetch optimal gas parameters, falling back to static values on any
    /// endpoint failure.
    pub async fn optimal_gas(&self) -> GasParams {
        if let Some(url) = self.config.rpc_url.clone() {
            match self.from_fee_history(&url).await {
                Ok(params) => return params,
                Err(e) => warn!(error = %e, "feeHistory failed, using fallback gas"),
            }
        }
        Self::fallback()
    }

    /// Hardcoded safe parameters.
    #[must_use]
    pub fn fallback() -> GasParams {
        GasParams {
            max_fee_per_gas: 300 * GWEI,
            max_priority_fee_per_gas: 50 * GWEI,
            estimated_base_fee: 100 * GWEI,
        }
    }

    async fn from_fee_history(&self, url: &str) -> Result<GasParams> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": "eth_feeHistory",
            "params": ["0x5", "latest", [25, 50, 75]],
            "id": 1,
        });
        let body: serde_json::Value = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let result = body
            .get("result")
            .ok_or_else(|| crate::error::Error::Execution("feeHistory: no result".into()))?;

        let base_fees: Vec<u128> = result
            .get("baseFeePerGas")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(parse_hex_u128).collect())
            .unwrap_or_default();
        let latest_base = *base_fees.last().ok_or_else(|| {
            crate::error::Error::Execution("feeHistory: empty baseFeePerGas".into())
        })?;
        self.record_base_fee(latest_base);

        // Median priority fee of the most recent block.
        let median_priority = result
            .get("reward")
            .and_then(|v| v.as_array())
            .and_then(|blocks| blocks.last())
            .and_then(|percentiles| percentiles.as_array())
            .and_then(|p| p.get(1))
            .and_then(parse_hex_u128_ref)
            .unwrap_or(30 * GWEI);

        let predicted_base = self.predict_next_base_fee(latest_base);
        let priority = (median_priority as f64 * self.config.multiplier) as u128;
        let params = GasParams {
            max_fee_per_gas: predicted_base + priority * 2,
            max_priority_fee_per_gas: priority,
            estimated_base_fee: predicted_base,
        };
        debug!(
            base_fee_gwei = predicted_base / GWEI,
            priority_gwei = priority / GWEI,
            "Gas parameters updated"
        );
        Ok(params)
    }

    fn record_base_fee(&self, base_fee: u128) {
        let mut history = self.base_fee_history.lock();
        if history.len() >= HISTORY_SIZE {
            history.pop_front();
        }
        history.push_back(base_fee);
    }

    /// Next-block base fee from the recent trend, dampened and bounded by
    /// the protocol's 12.5% max per-block increase.
    fn predict_next_base_fee(&self, current: u128) -> u128 {
        let history = self.base_fee_history.lock();
        if history.len() < 2 {
            return current;
        }
        let recent: Vec<u128> = history.iter().rev().take(3).rev().copied().collect();
        let first = recent[0] as i128;
        let last = *recent.last().unwrap() as i128;
        let avg_change = (last - first) / recent.len() as i128;

        let predicted = (current as i128 + avg_change / 2).max(0) as u128;
        let max_increase = current / 8;
        predicted.min(current + max_increase)
    }

    /// Estimated cost of one transaction in USD, from the latest observed
    /// base fee plus a typical priority fee.
    #[must_use]
    pub fn estimate_tx_cost_usd(&self) -> Decimal {
        let base_fee = self
            .base_fee_history
            .lock()
            .back()
            .copied()
            .unwrap_or(100 * GWEI);
        let total_price = base_fee + 30 * GWEI;
        let cost_wei = total_price.saturating_mul(u128::from(self.config.gas_limit_per_tx));
        let cost_native =
            Decimal::from(u64::try_from(cost_wei).unwrap_or(u64::MAX)) / Decimal::from(10u64.pow(18));
        cost_native * self.config.native_price_usd
    }
}

fn parse_hex_u128(value: &serde_json::Value) -> Option<u128> {
    let s = value.as_str()?;
    u128::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

fn parse_hex_u128_ref(value: &serde_json::Value) -> Option<u128> {
    parse_hex_u128(value)
}
