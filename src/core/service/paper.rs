//! Paper trading: simulated fills and a CSV ledger.

use std::fs::File;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use crate::core::domain::{ExecutionLeg, ExecutionResult, OrderId, Venue};
use crate::core::venue::OrderGateway;
use crate::error::Result;

/// One ledger row.
#[derive(Debug, Serialize)]
struct LedgerRow {
    timestamp: String,
    strategy: String,
    position_size: Decimal,
    expected_profit: Decimal,
    realized_profit: Decimal,
    balance: Decimal,
}

/// CSV ledger of simulated strategies.
pub struct PaperLedger {
    writer: Mutex<csv::Writer<File>>,
    balance: Mutex<Decimal>,
}

impl PaperLedger {
    /// Create a ledger at `path`, seeded with the starting balance.
    pub fn create(path: impl AsRef<Path>, starting_balance: Decimal) -> Result<Self> {
        let writer = csv::Writer::from_path(path).map_err(csv_error)?;
        Ok(Self {
            writer: Mutex::new(writer),
            balance: Mutex::new(starting_balance),
        })
    }

    /// Record one completed simulated strategy.
    pub fn record(
        &self,
        strategy: &str,
        position_size: Decimal,
        expected_profit: Decimal,
        realized_profit: Decimal,
    ) {
        let balance = {
            let mut balance = self.balance.lock();
            *balance += realized_profit;
            *balance
        };
        let row = LedgerRow {
            timestamp: Utc::now().to_rfc3339(),
            strategy: strategy.to_string(),
            position_size,
            expected_profit,
            realized_profit,
            balance,
        };
        let mut writer = self.writer.lock();
        let outcome = writer.serialize(&row).and_then(|()| Ok(writer.flush()?));
        if let Err(e) = outcome {
            warn!(error = %e, "Paper ledger write failed");
        }
    }

    /// Current simulated balance.
    #[must_use]
    pub fn balance(&self) -> Decimal {
        *self.balance.lock()
    }
}

fn csv_error(e: csv::Error) -> crate::error::Error {
    crate::error::Error::Execution(format!("paper ledger: {e}"))
}

/// Order gateway that fills every order at its limit price.
///
/// Used in paper and dry-run modes so the full router/recovery path runs
/// without touching a venue.
pub struct PaperGateway {
    venue: Venue,
}

impl PaperGateway {
    #[must_use]
    pub const fn new(venue: Venue) -> Self {
        Self { venue }
    }
}

#[async_trait]
impl OrderGateway for PaperGateway {
    fn venue(&self) -> Venue {
        self.venue
    }

    async fn place_order(&self, leg: &ExecutionLeg) -> Result<ExecutionResult> {
        info!(
            venue = %self.venue,
            token = %leg.token_id,
            side = ?leg.side,
            size = %leg.size,
            price = %leg.limit_price,
            "Paper fill"
        );
        Ok(ExecutionResult::filled(
            OrderId::random(),
            leg.size,
            leg.limit_price,
        ))
    }

    async fn cancel(&self, _order_id: &OrderId) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::{LegSide, MarketId, TokenId};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    #[test]
    fn ledger_rows_carry_running_balance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paper.csv");
        let ledger = PaperLedger::create(&path, dec!(1000)).unwrap();

        ledger.record("atomic_split", dec!(100), dec!(1.49), dec!(1.40));
        ledger.record("cross_venue", dec!(50), dec!(4.60), dec!(-2.00));

        assert_eq!(ledger.balance(), dec!(999.40));

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        // Header plus two rows.
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("strategy"));
        assert!(lines[1].contains("atomic_split"));
        assert!(lines[2].contains("-2.00"));
    }

    #[tokio::test]
    async fn paper_gateway_fills_at_limit() {
        let gateway = PaperGateway::new(Venue::Polymarket);
        let leg = ExecutionLeg {
            venue: Venue::Polymarket,
            market_id: MarketId::from("tok"),
            token_id: TokenId::from("tok"),
            side: LegSide::Buy,
            size: dec!(25),
            limit_price: dec!(0.47),
            book: None,
            timeout: Duration::from_secs(2),
            allow_chase: false,
            chase_breakeven_price: None,
            raw_tx_hex: None,
        };

        let result = gateway.place_order(&leg).await.unwrap();
        assert!(result.is_filled());
        assert_eq!(result.filled_size, dec!(25));
        assert_eq!(result.executed_price, Some(dec!(0.47)));
    }
}
