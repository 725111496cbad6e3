//! Application configuration and orchestration.

mod config;
mod orchestrator;

pub use config::{
    AppConfig, AtomicSection, BetfairSection, BreakerSection, Config, DetectorSection,
    ExecutionSection, KellySection, LoggingSection, MarketEntry, Mode, PolymarketSection,
    ProjectorSection, ReconnectionSection, RiskSection, RpcSection, SxSection,
};
pub use orchestrator::{ExitReason, Orchestrator};
