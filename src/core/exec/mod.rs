//! Execution: sizing, routing, recovery, and on-chain broadcast.

mod gas;
mod kelly;
mod recovery;
mod router;
mod rpc;
mod vwap;

pub use gas::{GasEstimator, GasEstimatorConfig, GasParams};
pub use kelly::{KellyConfig, KellySizer};
pub use recovery::{RecoveryConfig, RecoveryHandler, RecoveryOutcome, RecoveryState};
pub use router::{RouterConfig, SmartRouter, StrategyReport, StrategyState};
pub use rpc::{NodeHealth, RpcRacer, RpcRacerConfig};
pub use vwap::VwapEngine;
