//! Venue identifiers and fee schedules.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::money::Price;

/// An integrated trading venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    /// The USDC-settled central-limit order book on Polygon.
    Polymarket,
    /// Betfair-style streaming betting exchange.
    Betfair,
    /// SX-style REST betting exchange.
    Sx,
}

impl Venue {
    /// Stable lowercase name for logging and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Polymarket => "polymarket",
            Self::Betfair => "betfair",
            Self::Sx => "sx",
        }
    }

    /// Whether this venue is a traditional betting exchange.
    #[must_use]
    pub const fn is_exchange(&self) -> bool {
        matches!(self, Self::Betfair | Self::Sx)
    }

    /// All venues, for breaker/metric registration.
    #[must_use]
    pub const fn all() -> [Self; 3] {
        [Self::Polymarket, Self::Betfair, Self::Sx]
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a venue charges its fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeKind {
    /// Taker fee as a fraction of traded notional (Polymarket).
    TakerOnNotional,
    /// Commission charged on net winnings only (Betfair, SX).
    CommissionOnWinnings,
}

/// A venue's fee model, used to fee-adjust prices at ingestion so that
/// downstream arithmetic is fee-blind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    kind: FeeKind,
    rate: Decimal,
    settlement: SettlementCurrency,
}

/// Settlement currency of a venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementCurrency {
    Usdc,
    Gbp,
    Usd,
}

impl FeeSchedule {
    /// Create a fee schedule.
    #[must_use]
    pub const fn new(kind: FeeKind, rate: Decimal, settlement: SettlementCurrency) -> Self {
        Self {
            kind,
            rate,
            settlement,
        }
    }

    /// Get the fee rate (fraction, e.g. 0.02 for 2%).
    #[must_use]
    pub const fn rate(&self) -> Decimal {
        self.rate
    }

    /// Get the fee kind.
    #[must_use]
    pub const fn kind(&self) -> FeeKind {
        self.kind
    }

    /// Get the settlement currency.
    #[must_use]
    pub const fn settlement(&self) -> SettlementCurrency {
        self.settlement
    }

    /// Fee-adjust a raw bid-side probability.
    ///
    /// Notional fees reduce what a seller receives; winnings commissions
    /// shrink the payout of the winning side, which raises the implied
    /// probability of the quote.
    #[must_use]
    pub fn adjust_bid(&self, raw: Price) -> Price {
        match self.kind {
            FeeKind::TakerOnNotional => raw * (Decimal::ONE - self.rate),
            FeeKind::CommissionOnWinnings => {
                super::odds::net_exchange_probability(raw, self.rate)
            }
        }
    }

    /// Fee-adjust a raw ask-side probability.
    #[must_use]
    pub fn adjust_ask(&self, raw: Price) -> Price {
        match self.kind {
            FeeKind::TakerOnNotional => raw * (Decimal::ONE + self.rate),
            FeeKind::CommissionOnWinnings => {
                super::odds::net_exchange_probability(raw, self.rate)
            }
        }
    }

    /// Reverse of [`Self::adjust_bid`]; recovers the raw quoted price.
    #[must_use]
    pub fn unadjust_bid(&self, adjusted: Price) -> Price {
        match self.kind {
            FeeKind::TakerOnNotional => adjusted / (Decimal::ONE - self.rate),
            FeeKind::CommissionOnWinnings => {
                super::odds::raw_exchange_probability(adjusted, self.rate)
            }
        }
    }

    /// Reverse of [`Self::adjust_ask`]; recovers the raw quoted price.
    #[must_use]
    pub fn unadjust_ask(&self, adjusted: Price) -> Price {
        match self.kind {
            FeeKind::TakerOnNotional => adjusted / (Decimal::ONE + self.rate),
            FeeKind::CommissionOnWinnings => {
                super::odds::raw_exchange_probability(adjusted, self.rate)
            }
        }
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self::new(FeeKind::TakerOnNotional, Decimal::ZERO, SettlementCurrency::Usdc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn venue_names_are_stable() {
        assert_eq!(Venue::Polymarket.as_str(), "polymarket");
        assert_eq!(Venue::Betfair.to_string(), "betfair");
        assert!(Venue::Sx.is_exchange());
        assert!(!Venue::Polymarket.is_exchange());
    }

    #[test]
    fn notional_fee_adjustment_is_involutive() {
        let fees = FeeSchedule::new(
            FeeKind::TakerOnNotional,
            dec!(0.005),
            SettlementCurrency::Usdc,
        );
        let raw = dec!(0.52);

        let bid = fees.adjust_bid(raw);
        assert!(bid < raw);
        assert!((fees.unadjust_bid(bid) - raw).abs() < dec!(0.0000001));

        let ask = fees.adjust_ask(raw);
        assert!(ask > raw);
        assert!((fees.unadjust_ask(ask) - raw).abs() < dec!(0.0000001));
    }

    #[test]
    fn winnings_commission_adjustment_is_involutive() {
        let fees = FeeSchedule::new(
            FeeKind::CommissionOnWinnings,
            dec!(0.02),
            SettlementCurrency::Gbp,
        );
        let raw = dec!(0.40);

        let adjusted = fees.adjust_ask(raw);
        // Commission on winnings raises the implied probability.
        assert!(adjusted > raw);
        assert!((fees.unadjust_ask(adjusted) - raw).abs() < dec!(0.0000001));
    }

    #[test]
    fn zero_fee_is_identity() {
        let fees = FeeSchedule::default();
        assert_eq!(fees.adjust_bid(dec!(0.5)), dec!(0.5));
        assert_eq!(fees.adjust_ask(dec!(0.5)), dec!(0.5));
    }
}
