//! Cent arithmetic helpers shared by every settlement formula

use bigdecimal::{BigDecimal, RoundingMode};

/// Round to cents, half away from zero (`1.005 -> 1.01`, `-1.005 -> -1.01`)
pub fn round_cents(value: &BigDecimal) -> BigDecimal {
    value.with_scale_round(2, RoundingMode::HalfUp)
}

/// Sum an addition chain and round the result once
pub fn sum_cents<'a, I>(values: I) -> BigDecimal
where
    I: IntoIterator<Item = &'a BigDecimal>,
{
    let total: BigDecimal = values.into_iter().sum();
    round_cents(&total)
}

/// Zero with cent scale, so serialized output is always `0.00`
pub fn zero_cents() -> BigDecimal {
    round_cents(&BigDecimal::from(0))
}

/// Whether a magnitude is at or below the tolerance
pub fn is_negligible(value: &BigDecimal, tolerance: &BigDecimal) -> bool {
    value.abs() <= *tolerance
}

/// `amount * rate_percent / 100`, unrounded
pub fn apply_percent(amount: &BigDecimal, rate_percent: &BigDecimal) -> BigDecimal {
    (amount * rate_percent) / BigDecimal::from(100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn test_sum_is_rounded_once() {
        let values = [dec("1.005"), dec("1.004")];
        assert_eq!(sum_cents(values.iter()), dec("2.01"));

        let thirds = [dec("1.004"), dec("1.004"), dec("1.004")];
        let per_operand: BigDecimal = thirds.iter().map(round_cents).sum();
        assert_eq!(sum_cents(thirds.iter()), dec("3.01"));
        assert_eq!(per_operand, dec("3.00"));
    }

    #[test]
    fn test_half_up_is_symmetric() {
        assert_eq!(round_cents(&dec("2.345")), dec("2.35"));
        assert_eq!(round_cents(&dec("-2.345")), dec("-2.35"));
        assert_eq!(round_cents(&dec("2.344")), dec("2.34"));
    }

    #[test]
    fn test_negligible_boundary() {
        let tolerance = dec("0.01");
        assert!(is_negligible(&dec("0.009"), &tolerance));
        assert!(is_negligible(&dec("-0.01"), &tolerance));
        assert!(!is_negligible(&dec("0.011"), &tolerance));
    }

    #[test]
    fn test_apply_percent() {
        assert_eq!(apply_percent(&dec("1000"), &dec("10")), dec("100"));
        assert_eq!(apply_percent(&dec("33.33"), &dec("15")), dec("4.9995"));
    }
}
