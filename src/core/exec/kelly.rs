//! Fractional Kelly position sizing.
//!
//! Full Kelly maximizes long-term growth but has brutal variance; a
//! fractional coefficient keeps most of the growth rate at a fraction of
//! the swing. For pure arbitrage the win probability is nominally 1.0 and
//! the fraction plus the caps provide the margin against execution risk.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::core::domain::Volume;

/// Sizing parameters.
#[derive(Debug, Clone)]
pub struct KellyConfig {
    /// Kelly fraction multiplier (0.25 = quarter-Kelly).
    pub fraction: Decimal,
    /// Global cap as a fraction of bankroll.
    pub max_exposure_pct: Decimal,
    /// Per-token open-notional cap in settlement currency.
    pub per_token_cap: Decimal,
    /// Orders below this notional are not worth dispatching.
    pub min_bet: Decimal,
}

impl Default for KellyConfig {
    fn default() -> Self {
        Self {
            fraction: dec!(0.25),
            max_exposure_pct: dec!(0.05),
            per_token_cap: dec!(250),
            min_bet: dec!(1),
        }
    }
}

/// Fractional-Kelly sizer with liquidity and exposure caps.
#[derive(Debug, Clone)]
pub struct KellySizer {
    config: KellyConfig,
}

impl KellySizer {
    #[must_use]
    pub const fn new(config: KellyConfig) -> Self {
        Self { config }
    }

    /// Optimal wager given bankroll, win probability, net profit ratio
    /// `b` (profit per unit staked), and the book's liquidity cap.
    ///
    /// `f* = (b·p − (1−p)) / b`, scaled by the fractional coefficient and
    /// clamped by liquidity, the per-token cap and the global exposure
    /// cap. Anything below `min_bet` rounds down to zero.
    #[must_use]
    pub fn size(
        &self,
        bankroll: Decimal,
        win_prob: Decimal,
        profit_ratio: Decimal,
        liquidity_cap: Volume,
    ) -> Volume {
        if profit_ratio <= Decimal::ZERO || win_prob <= Decimal::ZERO || bankroll <= Decimal::ZERO
        {
            return Decimal::ZERO;
        }

        let b = profit_ratio;
        let p = win_prob;
        let q = Decimal::ONE - p;

        let f_star = (b * p - q) / b;
        if f_star <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let effective = f_star * self.config.fraction;
        let wager = bankroll * effective;

        let global_cap = bankroll * self.config.max_exposure_pct;
        let size = wager
            .min(liquidity_cap)
            .min(self.config.per_token_cap)
            .min(global_cap);

        if size < self.config.min_bet {
            Decimal::ZERO
        } else {
            size.round_dp(2)
        }
    }
}

impl Default for KellySizer {
    fn default() -> Self {
        Self::new(KellyConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizer() -> KellySizer {
        KellySizer::new(KellyConfig {
            fraction: dec!(0.25),
            max_exposure_pct: dec!(0.05),
            per_token_cap: dec!(250),
            min_bet: dec!(1),
        })
    }

    #[test]
    fn arbitrage_sizing_hits_the_global_cap() {
        // p = 1: f* = 1, effective 0.25, but the 5% global cap binds first.
        let size = sizer().size(dec!(1000), dec!(1.0), dec!(0.05), dec!(10000));
        assert_eq!(size, dec!(50));
    }

    #[test]
    fn liquidity_cap_binds_when_thin() {
        let size = sizer().size(dec!(1000), dec!(1.0), dec!(0.05), dec!(30));
        assert_eq!(size, dec!(30));
    }

    #[test]
    fn per_token_cap_binds_for_large_bankrolls() {
        let size = sizer().size(dec!(100000), dec!(1.0), dec!(0.05), dec!(10000));
        assert_eq!(size, dec!(250));
    }

    #[test]
    fn zero_for_non_positive_edge() {
        assert_eq!(sizer().size(dec!(1000), dec!(0.5), dec!(0), dec!(100)), Decimal::ZERO);
        assert_eq!(
            sizer().size(dec!(1000), dec!(0.5), dec!(-0.1), dec!(100)),
            Decimal::ZERO
        );
        assert_eq!(sizer().size(dec!(1000), dec!(0), dec!(0.1), dec!(100)), Decimal::ZERO);
    }

    #[test]
    fn negative_kelly_fraction_gives_zero() {
        // p = 0.4, b = 0.5: f* = (0.2 - 0.6) / 0.5 < 0.
        assert_eq!(
            sizer().size(dec!(1000), dec!(0.4), dec!(0.5), dec!(100)),
            Decimal::ZERO
        );
    }

    #[test]
    fn sub_minimum_wagers_round_to_zero() {
        // Tiny bankroll: capped wager lands under min_bet.
        assert_eq!(sizer().size(dec!(10), dec!(1.0), dec!(0.05), dec!(100)), Decimal::ZERO);
    }

    #[test]
    fn zero_bankroll_gives_zero() {
        assert_eq!(sizer().size(Decimal::ZERO, dec!(1.0), dec!(0.05), dec!(100)), Decimal::ZERO);
    }
}
