//! Application configuration loading and validation.
//!
//! Configuration is loaded from a TOML file with environment variable
//! overrides for credentials (API keys, session tokens, RPC endpoints,
//! signer key path). Environment variables are read once at startup.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use crate::core::detect::{AtomicConfig, DetectorConfig};
use crate::core::exec::{GasEstimatorConfig, KellyConfig, RecoveryConfig, RouterConfig, RpcRacerConfig};
use crate::core::projector::ProjectorConfig;
use crate::core::risk::RiskConfig;
use crate::core::venue::{BackoffConfig, BetfairConfig, BreakerConfig, PolymarketConfig, SxConfig};
use crate::error::{ConfigError, Result};

/// Run mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Dispatch real orders.
    Live,
    /// Simulate fills and keep a ledger.
    Paper,
    /// Detect and log only.
    #[default]
    Observer,
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "live" => Ok(Self::Live),
            "paper" => Ok(Self::Paper),
            "observer" => Ok(Self::Observer),
            other => Err(ConfigError::Invalid {
                field: "mode",
                reason: format!("unknown mode {other:?}"),
            }),
        }
    }
}

/// Top-level application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    #[serde(default = "default_audit_log")]
    pub audit_log: String,
    #[serde(default = "default_paper_ledger")]
    pub paper_ledger: String,
    #[serde(default = "default_bankroll")]
    pub bankroll: Decimal,
    pub mappings_file: String,
    /// Optional JSON file of constraint graphs for multi-market detection.
    #[serde(default)]
    pub constraints_file: Option<String>,
    #[serde(default = "default_mapping_reload_minutes")]
    pub mapping_reload_minutes: u64,
    #[serde(default = "default_min_mapping_confidence")]
    pub min_mapping_confidence: Decimal,
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
    /// Detector worker count; 0 sizes from the core count.
    #[serde(default)]
    pub detector_workers: usize,
}

fn default_metrics_port() -> u16 {
    8000
}
fn default_audit_log() -> String {
    "polyarb-audit.jsonl".into()
}
fn default_paper_ledger() -> String {
    "polyarb-paper.csv".into()
}
fn default_bankroll() -> Decimal {
    dec!(1000)
}
fn default_mapping_reload_minutes() -> u64 {
    15
}
fn default_min_mapping_confidence() -> Decimal {
    dec!(0.85)
}
fn default_bus_capacity() -> usize {
    4096
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

/// One tracked CLOB market pair.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketEntry {
    pub market_id: String,
    #[serde(default)]
    pub question: String,
    pub yes_token: String,
    pub no_token: String,
}

/// Polymarket venue settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PolymarketSection {
    pub ws_url: String,
    pub api_url: String,
    #[serde(default)]
    pub fee_rate: Decimal,
    #[serde(default)]
    pub markets: Vec<MarketEntry>,
    #[serde(skip)]
    pub api_key: String,
}

/// Betfair venue settings. Credentials come from the environment.
#[derive(Debug, Clone, Deserialize)]
pub struct BetfairSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_betfair_host")]
    pub stream_host: String,
    #[serde(default = "default_betfair_port")]
    pub stream_port: u16,
    #[serde(default = "default_betfair_api_url")]
    pub api_url: String,
    #[serde(default = "default_betfair_commission")]
    pub commission: Decimal,
    #[serde(skip)]
    pub app_key: String,
    #[serde(skip)]
    pub session_token: String,
}

impl Default for BetfairSection {
    fn default() -> Self {
        Self {
            enabled: false,
            stream_host: default_betfair_host(),
            stream_port: default_betfair_port(),
            api_url: default_betfair_api_url(),
            commission: default_betfair_commission(),
            app_key: String::new(),
            session_token: String::new(),
        }
    }
}

fn default_betfair_host() -> String {
    "stream-api.betfair.com".into()
}
fn default_betfair_port() -> u16 {
    443
}
fn default_betfair_api_url() -> String {
    "https://api.betfair.com/exchange/betting/rest/v1.0".into()
}
fn default_betfair_commission() -> Decimal {
    dec!(0.02)
}

/// SX venue settings. The API key comes from the environment.
#[derive(Debug, Clone, Deserialize)]
pub struct SxSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_sx_url")]
    pub base_url: String,
    #[serde(default = "default_sx_poll_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_sx_commission")]
    pub commission: Decimal,
    #[serde(skip)]
    pub api_key: String,
}

impl Default for SxSection {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_sx_url(),
            poll_interval_ms: default_sx_poll_ms(),
            commission: default_sx_commission(),
            api_key: String::new(),
        }
    }
}

fn default_sx_url() -> String {
    "https://api.sx.bet".into()
}
fn default_sx_poll_ms() -> u64 {
    2000
}
fn default_sx_commission() -> Decimal {
    dec!(0.04)
}

/// Cross-venue detector settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectorSection {
    #[serde(default)]
    pub min_ev_percent: Decimal,
    #[serde(default = "default_staleness_ms")]
    pub staleness_ms: u64,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

impl Default for DetectorSection {
    fn default() -> Self {
        Self {
            min_ev_percent: Decimal::ZERO,
            staleness_ms: default_staleness_ms(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

fn default_staleness_ms() -> u64 {
    500
}
fn default_cooldown_ms() -> u64 {
    500
}

/// Atomic detector settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AtomicSection {
    #[serde(default = "default_atomic_epsilon")]
    pub epsilon: Decimal,
    #[serde(default = "default_atomic_min_net")]
    pub min_net_profit: Decimal,
    #[serde(default = "default_atomic_min_rel")]
    pub min_relative_profit: Decimal,
    #[serde(default = "default_atomic_min_notional")]
    pub min_top_notional: Decimal,
}

impl Default for AtomicSection {
    fn default() -> Self {
        Self {
            epsilon: default_atomic_epsilon(),
            min_net_profit: default_atomic_min_net(),
            min_relative_profit: default_atomic_min_rel(),
            min_top_notional: default_atomic_min_notional(),
        }
    }
}

fn default_atomic_epsilon() -> Decimal {
    dec!(0.005)
}
fn default_atomic_min_net() -> Decimal {
    dec!(0.05)
}
fn default_atomic_min_rel() -> Decimal {
    dec!(0.002)
}
fn default_atomic_min_notional() -> Decimal {
    dec!(100)
}

/// Projector settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectorSection {
    #[serde(default = "default_projector_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_projector_tolerance")]
    pub tolerance: f64,
    #[serde(default = "default_projector_barrier")]
    pub barrier_weight: f64,
    #[serde(default = "default_projector_epsilon")]
    pub initial_epsilon: f64,
    #[serde(default = "default_projector_threshold")]
    pub deviation_threshold: f64,
    #[serde(default = "default_projector_cache")]
    pub cache_size: usize,
    #[serde(default)]
    pub volatility_mode: bool,
}

impl Default for ProjectorSection {
    fn default() -> Self {
        Self {
            max_iterations: default_projector_iterations(),
            tolerance: default_projector_tolerance(),
            barrier_weight: default_projector_barrier(),
            initial_epsilon: default_projector_epsilon(),
            deviation_threshold: default_projector_threshold(),
            cache_size: default_projector_cache(),
            volatility_mode: false,
        }
    }
}

fn default_projector_iterations() -> usize {
    200
}
fn default_projector_tolerance() -> f64 {
    1e-6
}
fn default_projector_barrier() -> f64 {
    0.01
}
fn default_projector_epsilon() -> f64 {
    0.1
}
fn default_projector_threshold() -> f64 {
    0.01
}
fn default_projector_cache() -> usize {
    500
}

/// Execution settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionSection {
    #[serde(default = "default_min_net_profit")]
    pub min_net_profit: Decimal,
    #[serde(default = "default_leg_timeout_ms")]
    pub leg_timeout_ms: u64,
    #[serde(default = "default_slippage_penalty")]
    pub slippage_penalty: Decimal,
    #[serde(default = "default_retry_window_ms")]
    pub retry_window_ms: u64,
    #[serde(default = "default_attempt_timeout_ms")]
    pub retry_attempt_timeout_ms: u64,
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            min_net_profit: default_min_net_profit(),
            leg_timeout_ms: default_leg_timeout_ms(),
            slippage_penalty: default_slippage_penalty(),
            retry_window_ms: default_retry_window_ms(),
            retry_attempt_timeout_ms: default_attempt_timeout_ms(),
        }
    }
}

fn default_min_net_profit() -> Decimal {
    dec!(0.05)
}
fn default_leg_timeout_ms() -> u64 {
    2000
}
fn default_slippage_penalty() -> Decimal {
    dec!(0.005)
}
fn default_retry_window_ms() -> u64 {
    500
}
fn default_attempt_timeout_ms() -> u64 {
    100
}

/// Kelly sizing settings.
#[derive(Debug, Clone, Deserialize)]
pub struct KellySection {
    #[serde(default = "default_kelly_fraction")]
    pub fraction: Decimal,
    #[serde(default = "default_kelly_exposure")]
    pub max_exposure_pct: Decimal,
    #[serde(default = "default_kelly_token_cap")]
    pub per_token_cap: Decimal,
    #[serde(default = "default_kelly_min_bet")]
    pub min_bet: Decimal,
}

impl Default for KellySection {
    fn default() -> Self {
        Self {
            fraction: default_kelly_fraction(),
            max_exposure_pct: default_kelly_exposure(),
            per_token_cap: default_kelly_token_cap(),
            min_bet: default_kelly_min_bet(),
        }
    }
}

fn default_kelly_fraction() -> Decimal {
    dec!(0.25)
}
fn default_kelly_exposure() -> Decimal {
    dec!(0.05)
}
fn default_kelly_token_cap() -> Decimal {
    dec!(250)
}
fn default_kelly_min_bet() -> Decimal {
    dec!(1)
}

/// Risk guardian settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RiskSection {
    #[serde(default = "default_max_drawdown")]
    pub max_drawdown_pct: Decimal,
    #[serde(default = "default_max_losses")]
    pub max_consecutive_losses: u32,
    #[serde(default = "default_max_daily_loss")]
    pub max_daily_loss: Decimal,
    #[serde(default = "default_max_daily_notional")]
    pub max_daily_notional: Decimal,
    #[serde(default = "default_pause_minutes")]
    pub pause_minutes: u64,
    #[serde(default = "default_api_error_limit")]
    pub api_error_limit: usize,
    #[serde(default = "default_api_error_window_s")]
    pub api_error_window_s: u64,
}

impl Default for RiskSection {
    fn default() -> Self {
        Self {
            max_drawdown_pct: default_max_drawdown(),
            max_consecutive_losses: default_max_losses(),
            max_daily_loss: default_max_daily_loss(),
            max_daily_notional: default_max_daily_notional(),
            pause_minutes: default_pause_minutes(),
            api_error_limit: default_api_error_limit(),
            api_error_window_s: default_api_error_window_s(),
        }
    }
}

fn default_max_drawdown() -> Decimal {
    dec!(0.05)
}
fn default_max_losses() -> u32 {
    5
}
fn default_max_daily_loss() -> Decimal {
    dec!(100)
}
fn default_max_daily_notional() -> Decimal {
    dec!(5000)
}
fn default_pause_minutes() -> u64 {
    60
}
fn default_api_error_limit() -> usize {
    10
}
fn default_api_error_window_s() -> u64 {
    60
}

/// RPC broadcast settings. Endpoints come from the environment.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcSection {
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default = "default_gas_multiplier")]
    pub gas_multiplier: f64,
    #[serde(skip)]
    pub signer_key_path: String,
}

impl Default for RpcSection {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            gas_multiplier: default_gas_multiplier(),
            signer_key_path: String::new(),
        }
    }
}

fn default_gas_multiplier() -> f64 {
    1.1
}

/// Reconnection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectionSection {
    #[serde(default = "default_backoff_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub cap_ms: u64,
}

impl Default for ReconnectionSection {
    fn default() -> Self {
        Self {
            base_ms: default_backoff_base_ms(),
            cap_ms: default_backoff_cap_ms(),
        }
    }
}

fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_backoff_cap_ms() -> u64 {
    60_000
}

/// Circuit breaker settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BreakerSection {
    #[serde(default = "default_breaker_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_breaker_reset_s")]
    pub reset_timeout_s: u64,
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: default_breaker_threshold(),
            reset_timeout_s: default_breaker_reset_s(),
        }
    }
}

fn default_breaker_threshold() -> u32 {
    3
}
fn default_breaker_reset_s() -> u64 {
    60
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    #[serde(default)]
    pub logging: LoggingSection,
    pub polymarket: PolymarketSection,
    #[serde(default)]
    pub betfair: BetfairSection,
    #[serde(default)]
    pub sx: SxSection,
    #[serde(default)]
    pub detector: DetectorSection,
    #[serde(default)]
    pub atomic: AtomicSection,
    #[serde(default)]
    pub projector: ProjectorSection,
    #[serde(default)]
    pub execution: ExecutionSection,
    #[serde(default)]
    pub kelly: KellySection,
    #[serde(default)]
    pub risk: RiskSection,
    #[serde(default)]
    pub rpc: RpcSection,
    #[serde(default)]
    pub reconnection: ReconnectionSection,
    #[serde(default)]
    pub breaker: BreakerSection,
}

impl Config {
    /// Load from a TOML file, apply environment overrides, validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::ReadFile)?;
        let mut config: Self = toml::from_str(&raw).map_err(ConfigError::Parse)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Credentials and endpoint overrides, read once at startup.
    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("POLYARB_POLYMARKET_API_KEY") {
            self.polymarket.api_key = key;
        }
        if let Ok(key) = std::env::var("POLYARB_BETFAIR_APP_KEY") {
            self.betfair.app_key = key;
        }
        if let Ok(token) = std::env::var("POLYARB_BETFAIR_SESSION") {
            self.betfair.session_token = token;
        }
        if let Ok(key) = std::env::var("POLYARB_SX_API_KEY") {
            self.sx.api_key = key;
        }
        if let Ok(urls) = std::env::var("POLYARB_RPC_URLS") {
            self.rpc.endpoints = urls
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(path) = std::env::var("POLYARB_SIGNER_KEY_PATH") {
            self.rpc.signer_key_path = path;
        }
        if let Ok(bankroll) = std::env::var("POLYARB_BANKROLL") {
            if let Ok(value) = bankroll.parse() {
                self.app.bankroll = value;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.app.bankroll <= Decimal::ZERO {
            return Err(ConfigError::Invalid {
                field: "app.bankroll",
                reason: "must be positive".into(),
            }
            .into());
        }
        if self.app.min_mapping_confidence < Decimal::ZERO
            || self.app.min_mapping_confidence > Decimal::ONE
        {
            return Err(ConfigError::Invalid {
                field: "app.min_mapping_confidence",
                reason: "must be within [0, 1]".into(),
            }
            .into());
        }
        if self.rpc.endpoints.len() == 1 {
            return Err(ConfigError::Invalid {
                field: "rpc.endpoints",
                reason: "racing requires at least two endpoints".into(),
            }
            .into());
        }
        for url in &self.rpc.endpoints {
            url::Url::parse(url)?;
        }
        url::Url::parse(&self.polymarket.ws_url)?;
        url::Url::parse(&self.polymarket.api_url)?;
        if self.betfair.enabled && self.betfair.app_key.is_empty() {
            return Err(ConfigError::MissingField {
                field: "POLYARB_BETFAIR_APP_KEY",
            }
            .into());
        }
        if self.sx.enabled && self.sx.api_key.is_empty() {
            return Err(ConfigError::MissingField {
                field: "POLYARB_SX_API_KEY",
            }
            .into());
        }
        Ok(())
    }

    // -- typed views consumed by the composition root -------------------

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            min_ev_percent: self.detector.min_ev_percent,
            staleness: Duration::from_millis(self.detector.staleness_ms),
            cooldown: Duration::from_millis(self.detector.cooldown_ms),
        }
    }

    pub fn atomic_config(&self) -> AtomicConfig {
        AtomicConfig {
            epsilon: self.atomic.epsilon,
            fee_rate: self.polymarket.fee_rate,
            min_net_profit: self.atomic.min_net_profit,
            min_relative_profit: self.atomic.min_relative_profit,
            min_top_notional: self.atomic.min_top_notional,
        }
    }

    pub fn projector_config(&self) -> ProjectorConfig {
        ProjectorConfig {
            max_iterations: self.projector.max_iterations,
            tolerance: self.projector.tolerance,
            barrier_weight: self.projector.barrier_weight,
            initial_epsilon: self.projector.initial_epsilon,
            deviation_threshold: self.projector.deviation_threshold,
            cache_size: self.projector.cache_size,
            volatility_mode: self.projector.volatility_mode,
            ..ProjectorConfig::default()
        }
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            min_net_profit: self.execution.min_net_profit,
        }
    }

    pub fn recovery_config(&self) -> RecoveryConfig {
        RecoveryConfig {
            retry_window: Duration::from_millis(self.execution.retry_window_ms),
            attempt_timeout: Duration::from_millis(self.execution.retry_attempt_timeout_ms),
            ..RecoveryConfig::default()
        }
    }

    pub fn kelly_config(&self) -> KellyConfig {
        KellyConfig {
            fraction: self.kelly.fraction,
            max_exposure_pct: self.kelly.max_exposure_pct,
            per_token_cap: self.kelly.per_token_cap,
            min_bet: self.kelly.min_bet,
        }
    }

    pub fn risk_config(&self) -> RiskConfig {
        RiskConfig {
            max_drawdown_pct: self.risk.max_drawdown_pct,
            max_consecutive_losses: self.risk.max_consecutive_losses,
            max_daily_loss: self.risk.max_daily_loss,
            max_daily_notional: self.risk.max_daily_notional,
            pause: Duration::from_secs(self.risk.pause_minutes * 60),
            api_error_limit: self.risk.api_error_limit,
            api_error_window: Duration::from_secs(self.risk.api_error_window_s),
        }
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.breaker.failure_threshold,
            reset_timeout: Duration::from_secs(self.breaker.reset_timeout_s),
        }
    }

    pub fn backoff_config(&self) -> BackoffConfig {
        BackoffConfig {
            base: Duration::from_millis(self.reconnection.base_ms),
            cap: Duration::from_millis(self.reconnection.cap_ms),
        }
    }

    pub fn polymarket_config(&self) -> PolymarketConfig {
        PolymarketConfig {
            ws_url: self.polymarket.ws_url.clone(),
            api_url: self.polymarket.api_url.clone(),
            fee_rate: self.polymarket.fee_rate,
        }
    }

    pub fn betfair_config(&self) -> BetfairConfig {
        BetfairConfig {
            host: self.betfair.stream_host.clone(),
            port: self.betfair.stream_port,
            app_key: self.betfair.app_key.clone(),
            session_token: self.betfair.session_token.clone(),
            commission: self.betfair.commission,
        }
    }

    pub fn sx_config(&self) -> SxConfig {
        SxConfig {
            base_url: self.sx.base_url.clone(),
            api_key: self.sx.api_key.clone(),
            poll_interval: Duration::from_millis(self.sx.poll_interval_ms),
            commission: self.sx.commission,
        }
    }

    pub fn rpc_config(&self) -> RpcRacerConfig {
        RpcRacerConfig {
            endpoints: self.rpc.endpoints.clone(),
            ..RpcRacerConfig::default()
        }
    }

    pub fn gas_config(&self) -> GasEstimatorConfig {
        GasEstimatorConfig {
            rpc_url: self.rpc.endpoints.first().cloned(),
            multiplier: self.rpc.gas_multiplier,
            ..GasEstimatorConfig::default()
        }
    }

    /// Detector worker pool size: configured, else from the core count.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        if self.app.detector_workers > 0 {
            return self.app.detector_workers;
        }
        (num_cpus::get() / 2).clamp(2, 4)
    }
}
