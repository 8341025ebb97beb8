//! Decimal amount strings <-> 18-decimal fixed point values
//!
//! Canonical decimal form: no sign, no leading zeros on the integer part
//! (other than a lone `0`), no trailing zeros in the fraction and no dangling
//! `.`. Canonical strings round-trip exactly through [`to_fixed_point`] and
//! [`to_decimal_string`].

use alloy::primitives::U256;

use crate::error::{BatcherError, Result};

/// Fractional digits of the on-chain representation
pub const DECIMALS: usize = 18;

/// 10^18
const UNIT: u64 = 1_000_000_000_000_000_000;

/// Parse a base-10 decimal string into its fixed point value.
pub fn to_fixed_point(input: &str) -> Result<U256> {
    let fail = |reason: String| BatcherError::AmountFormat {
        input: input.to_string(),
        reason,
    };

    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(fail("empty amount".to_string()));
    }

    let (whole, fraction) = trimmed.split_once('.').unwrap_or((trimmed, ""));

    if whole.is_empty() && fraction.is_empty() {
        return Err(fail("no digits".to_string()));
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return Err(fail("not a plain decimal number".to_string()));
    }
    if fraction.len() > DECIMALS {
        return Err(fail(format!(
            "{} fractional digits exceed {}-decimal precision",
            fraction.len(),
            DECIMALS
        )));
    }

    let whole = if whole.is_empty() {
        U256::ZERO
    } else {
        U256::from_str_radix(whole, 10).map_err(|e| fail(format!("integer part: {}", e)))?
    };

    let fraction = if fraction.is_empty() {
        U256::ZERO
    } else {
        let padded = format!("{:0<width$}", fraction, width = DECIMALS);
        U256::from_str_radix(&padded, 10).map_err(|e| fail(format!("fraction: {}", e)))?
    };

    whole
        .checked_mul(U256::from(UNIT))
        .and_then(|scaled| scaled.checked_add(fraction))
        .ok_or_else(|| fail("amount overflows 256 bits".to_string()))
}

/// Render a fixed point value in canonical decimal form.
pub fn to_decimal_string(value: U256) -> String {
    let unit = U256::from(UNIT);
    let whole = value / unit;
    let fraction = value % unit;

    if fraction.is_zero() {
        return whole.to_string();
    }

    let fraction = format!("{:0>width$}", fraction.to_string(), width = DECIMALS);
    format!("{}.{}", whole, fraction.trim_end_matches('0'))
}

/// Sum of fixed point amounts, saturating at `U256::MAX`.
pub fn total(amounts: &[U256]) -> U256 {
    amounts
        .iter()
        .fold(U256::ZERO, |acc, amount| acc.saturating_add(*amount))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_and_fractional_amounts() {
        assert_eq!(to_fixed_point("1").unwrap(), U256::from(UNIT));
        assert_eq!(
            to_fixed_point("12.34").unwrap(),
            U256::from(12_340_000_000_000_000_000u128)
        );
        assert_eq!(to_fixed_point("0.000000000000000001").unwrap(), U256::from(1));
        assert_eq!(to_fixed_point(" 5 ").unwrap(), U256::from(5 * UNIT));
    }

    #[test]
    fn test_canonical_round_trip() {
        for s in [
            "0",
            "1",
            "12.34",
            "0.5",
            "1000000",
            "0.000000000000000001",
            "98765.432109876543210987",
        ] {
            let fixed = to_fixed_point(s).unwrap();
            assert_eq!(to_decimal_string(fixed), s, "round trip of {}", s);
        }
    }

    #[test]
    fn test_fixed_point_round_trip() {
        for value in [
            U256::ZERO,
            U256::from(1),
            U256::from(UNIT),
            U256::from(UNIT) * U256::from(7) + U256::from(3),
            U256::MAX,
        ] {
            assert_eq!(to_fixed_point(&to_decimal_string(value)).unwrap(), value);
        }
    }

    #[test]
    fn test_non_canonical_inputs_normalize() {
        assert_eq!(to_decimal_string(to_fixed_point("1.50").unwrap()), "1.5");
        assert_eq!(to_decimal_string(to_fixed_point(".5").unwrap()), "0.5");
        assert_eq!(to_decimal_string(to_fixed_point("5.").unwrap()), "5");
        assert_eq!(to_decimal_string(to_fixed_point("007").unwrap()), "7");
    }

    #[test]
    fn test_nineteen_fractional_digits_rejected() {
        let err = to_fixed_point("12.3400000000000000001").unwrap_err();
        assert!(matches!(err, BatcherError::AmountFormat { .. }));
    }

    #[test]
    fn test_eighteen_fractional_digits_exact() {
        assert_eq!(
            to_fixed_point("12.340000000000000001").unwrap(),
            U256::from(12_340_000_000_000_000_001u128)
        );
    }

    #[test]
    fn test_malformed_amounts_rejected() {
        for s in ["", "   ", ".", "abc", "-1", "+1", "1e18", "1.2.3", "1,000", "0x10"] {
            assert!(
                matches!(to_fixed_point(s), Err(BatcherError::AmountFormat { .. })),
                "{:?} should be rejected",
                s
            );
        }
    }

    #[test]
    fn test_overflow_rejected() {
        let huge = format!("{}", U256::MAX);
        assert!(matches!(
            to_fixed_point(&huge),
            Err(BatcherError::AmountFormat { .. })
        ));
    }

    #[test]
    fn test_total() {
        let amounts = [U256::from(1), U256::from(2), U256::from(3)];
        assert_eq!(total(&amounts), U256::from(6));
        assert_eq!(total(&[U256::MAX, U256::from(1)]), U256::MAX);
    }
}
