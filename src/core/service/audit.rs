//! Append-only JSONL audit trail.
//!
//! Every opportunity, dispatch, leg result, recovery transition and risk
//! event lands here as one JSON object per line, timestamped at write.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::warn;

use crate::error::Result;

/// One audit record.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    Opportunity {
        id: String,
        direction: String,
        event_key: String,
        ev_percent: Decimal,
        confidence: Decimal,
    },
    Dispatch {
        strategy_id: String,
        legs: usize,
        expected_payout: Decimal,
        net_profit_projected: Decimal,
    },
    LegResult {
        strategy_id: String,
        venue: String,
        token_id: String,
        status: String,
        filled_size: Decimal,
        executed_price: Option<Decimal>,
    },
    StrategyOutcome {
        strategy_id: String,
        state: String,
        reason: Option<String>,
        realized_pnl: Decimal,
    },
    Recovery {
        strategy_id: String,
        state: String,
        realized_pnl: Decimal,
        retry_attempts: u32,
        residual_inventory: Decimal,
    },
    Risk {
        kind: String,
        detail: String,
    },
    Lifecycle {
        venue: String,
        state: String,
    },
}

/// Append-only audit writer; flushes on every record so a crash loses at
/// most the in-flight line.
pub struct AuditLog {
    writer: Mutex<BufWriter<File>>,
}

impl AuditLog {
    /// Open (or create) the log at `path` for appending.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Append one event. Failures are logged, never propagated: audit
    /// must not take down the trading path.
    pub fn record(&self, event: &AuditEvent) {
        #[derive(Serialize)]
        struct Envelope<'a> {
            ts: chrono::DateTime<Utc>,
            #[serde(flatten)]
            event: &'a AuditEvent,
        }

        let envelope = Envelope {
            ts: Utc::now(),
            event,
        };
        let mut writer = self.writer.lock();
        let outcome = serde_json::to_writer(&mut *writer, &envelope)
            .map_err(std::io::Error::other)
            .and_then(|()| writer.write_all(b"\n"))
            .and_then(|()| writer.flush());
        if let Err(e) = outcome {
            warn!(error = %e, "Audit write failed");
        }
    }
}
