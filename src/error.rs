//! Crate-wide error types.
//!
//! Failures inside a single strategy attempt are reported through
//! [`crate::core::exec::StrategyReport`] and never surface here; this enum
//! covers transport, decode, configuration, and solver failures that callers
//! must handle explicitly.

use thiserror::Error;

use crate::core::domain::Venue;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("Transport error on {venue}: {reason}")]
    Transport { venue: Venue, reason: String },

    #[error("Authentication rejected by {venue}: {reason}")]
    Auth { venue: Venue, reason: String },

    #[error("Protocol decode error on {venue}: {reason}")]
    Decode { venue: Venue, reason: String },

    #[error("Circuit breaker open for {0}")]
    BreakerOpen(Venue),

    #[error("Solver error: {0}")]
    Solver(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Signer error: {0}")]
    Signer(String),
}

impl Error {
    /// Whether the error is worth a reconnect attempt.
    ///
    /// Auth and decode failures are not: auth requires operator action and
    /// decode failures are handled frame-by-frame at the call site.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::WebSocket(_)
                | Self::Http(_)
                | Self::Io(_)
                | Self::Tls(_)
        )
    }
}

/// Configuration loading and validation failures.
///
/// These terminate the process with exit code 1.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_transient() {
        let err = Error::Transport {
            venue: Venue::Polymarket,
            reason: "connection reset".into(),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn auth_errors_are_not_transient() {
        let err = Error::Auth {
            venue: Venue::Betfair,
            reason: "invalid session".into(),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn config_error_converts_into_error() {
        let err: Error = ConfigError::MissingField { field: "bankroll" }.into();
        assert!(matches!(err, Error::Config(_)));
    }
}
