//! Monetary types for price and volume representation.

use rust_decimal::Decimal;

/// Price represented as a Decimal for precision.
///
/// Binary market prices live in (0, 1); exchange odds are converted to
/// implied probabilities before entering the engine.
pub type Price = Decimal;

/// Volume represented as a Decimal for precision.
pub type Volume = Decimal;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn price_and_volume_are_decimal() {
        let price: Price = dec!(0.45);
        let volume: Volume = dec!(100.0);

        assert_eq!(price * volume, dec!(45.0));
    }
}
