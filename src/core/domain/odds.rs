//! Conversions between exchange decimal odds and implied probabilities.
//!
//! Exchanges charge commission on net winnings only. Folding that into the
//! implied probability at ingestion (`net = 1 - (1 - q)(1 - c)`) lets every
//! downstream comparison treat venue prices as plain probabilities.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Highest decimal odds we will represent (prices very close to zero).
const MAX_ODDS: Decimal = dec!(1000);
/// Lowest decimal odds we will represent (prices very close to one).
const MIN_ODDS: Decimal = dec!(1.01);

/// Convert a probability in (0, 1) to decimal odds, clamped to the
/// exchange-representable range.
#[must_use]
pub fn to_decimal_odds(probability: Decimal) -> Decimal {
    if probability <= Decimal::ZERO {
        return MAX_ODDS;
    }
    if probability >= Decimal::ONE {
        return MIN_ODDS;
    }
    Decimal::ONE / probability
}

/// Convert decimal odds to their implied probability `q = 1 / odds`.
#[must_use]
pub fn implied_probability(odds: Decimal) -> Decimal {
    if odds <= Decimal::ONE {
        return Decimal::ONE;
    }
    Decimal::ONE / odds
}

/// Fold a commission on net winnings into an implied probability:
/// `q_net = 1 - (1 - q)(1 - commission)`.
#[must_use]
pub fn net_exchange_probability(q: Decimal, commission: Decimal) -> Decimal {
    Decimal::ONE - (Decimal::ONE - q) * (Decimal::ONE - commission)
}

/// Reverse of [`net_exchange_probability`].
#[must_use]
pub fn raw_exchange_probability(q_net: Decimal, commission: Decimal) -> Decimal {
    if commission >= Decimal::ONE {
        return q_net;
    }
    Decimal::ONE - (Decimal::ONE - q_net) / (Decimal::ONE - commission)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odds_and_probability_invert() {
        let odds = dec!(2.5);
        let q = implied_probability(odds);
        assert_eq!(q, dec!(0.4));
        assert_eq!(to_decimal_odds(q), dec!(2.5));
    }

    #[test]
    fn degenerate_probabilities_clamp() {
        assert_eq!(to_decimal_odds(Decimal::ZERO), dec!(1000));
        assert_eq!(to_decimal_odds(Decimal::ONE), dec!(1.01));
        assert_eq!(implied_probability(Decimal::ONE), Decimal::ONE);
    }

    #[test]
    fn commission_raises_implied_probability() {
        // Lay odds 2.50 at 2% commission: q = 0.40, q_net = 1 - 0.6 * 0.98 = 0.412
        let q_net = net_exchange_probability(dec!(0.40), dec!(0.02));
        assert_eq!(q_net, dec!(0.412));
    }

    #[test]
    fn net_probability_round_trips() {
        let q = dec!(0.37);
        let c = dec!(0.065);
        let q_net = net_exchange_probability(q, c);
        let back = raw_exchange_probability(q_net, c);
        assert!((back - q).abs() < dec!(0.0000000001));
    }

    #[test]
    fn zero_commission_is_identity() {
        assert_eq!(net_exchange_probability(dec!(0.4), Decimal::ZERO), dec!(0.4));
    }
}
