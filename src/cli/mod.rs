//! Command-line surface.
//!
//! Exit codes: 0 normal, 1 configuration error, 2 unrecoverable failure,
//! 3 risk-triggered shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use rust_decimal::Decimal;
use tracing::{error, info};

use crate::app::{Config, ExitReason, Mode, Orchestrator};
use crate::error::Error;

/// Multi-venue prediction market arbitrage engine.
#[derive(Debug, Parser)]
#[command(name = "polyarb", version, about)]
pub struct Cli {
    /// Config file (TOML).
    #[arg(long, default_value = "polyarb.toml")]
    pub config: PathBuf,

    /// Run mode: live dispatches real orders, paper simulates, observer
    /// only detects.
    #[arg(long, value_parser = parse_mode)]
    pub mode: Option<Mode>,

    /// Force paper mode regardless of configuration.
    #[arg(long)]
    pub dry_run: bool,

    /// Override the minimum net profit gate (USD).
    #[arg(long)]
    pub min_profit: Option<Decimal>,
}

fn parse_mode(s: &str) -> Result<Mode, String> {
    s.parse().map_err(|e: crate::error::ConfigError| e.to_string())
}

/// Run the engine; returns the process exit code.
pub async fn run(cli: Cli) -> i32 {
    let mut config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return 1;
        }
    };

    if let Some(min_profit) = cli.min_profit {
        config.execution.min_net_profit = min_profit;
    }

    let mut mode = cli.mode.unwrap_or(config.app.mode);
    if cli.dry_run && mode == Mode::Live {
        mode = Mode::Paper;
    }

    init_logging(&config);
    info!(config = %cli.config.display(), mode = ?mode, "polyarb starting");

    let orchestrator = match Orchestrator::build(config, mode) {
        Ok(orchestrator) => Arc::new(orchestrator),
        Err(Error::Config(e)) => {
            error!(error = %e, "Configuration rejected");
            return 1;
        }
        Err(e) => {
            error!(error = %e, "Startup failed");
            return 2;
        }
    };

    let outcome = tokio::select! {
        result = Arc::clone(&orchestrator).run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            Ok(ExitReason::Shutdown)
        }
    };

    match outcome {
        Ok(ExitReason::Shutdown) => {
            info!("polyarb stopped");
            0
        }
        Ok(ExitReason::RiskTriggered) => {
            error!("polyarb stopped by risk kill switch");
            3
        }
        Ok(ExitReason::Fatal) => {
            error!("polyarb stopped on unrecoverable failure");
            2
        }
        Err(e) => {
            error!(error = %e, "polyarb crashed");
            2
        }
    }
}

fn init_logging(config: &Config) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if config.logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    // A second init (tests) is fine; keep the first subscriber.
    let _ = result;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_flags() {
        let cli = Cli::parse_from([
            "polyarb",
            "--config",
            "custom.toml",
            "--mode",
            "paper",
            "--min-profit",
            "0.25",
        ]);
        assert_eq!(cli.config, PathBuf::from("custom.toml"));
        assert_eq!(cli.mode, Some(Mode::Paper));
        assert_eq!(cli.min_profit, Some(Decimal::new(25, 2)));
        assert!(!cli.dry_run);
    }

    #[test]
    fn invalid_mode_is_rejected() {
        assert!(Cli::try_parse_from(["polyarb", "--mode", "turbo"]).is_err());
    }

    #[tokio::test]
    async fn missing_config_exits_with_code_one() {
        let cli = Cli::parse_from(["polyarb", "--config", "/nonexistent/polyarb.toml"]);
        assert_eq!(run(cli).await, 1);
    }
}
