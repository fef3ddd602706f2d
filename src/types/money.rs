//! Money handling for the ledger
//!
//! Amounts travel through the public API as [`Decimal`] rupees and are stored as
//! integer minor units (paise). Every conversion into storage goes through
//! [`to_minor`], which rejects non-positive amounts and amounts with more than
//! two decimal places, so nothing fractional ever reaches the database.

use super::error::{LedgerError, LedgerResult};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Number of decimal places carried by the currency
pub const MINOR_UNIT_SCALE: u32 = 2;

/// Amount in minor units (paise), as stored
pub type Minor = i64;

/// Convert a positive amount into minor units
///
/// # Errors
///
/// * `LedgerError::Validation` if the amount is zero, negative, has more than
///   two decimal places, or does not fit into an `i64` of paise.
pub fn to_minor(field: &str, amount: Decimal) -> LedgerResult<Minor> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::validation(
            field,
            format!("must be positive, got {amount}"),
        ));
    }
    non_negative_to_minor(field, amount)
}

/// Convert a zero-or-positive amount into minor units
///
/// Used for limits, where zero is meaningful (unlimited).
pub fn non_negative_to_minor(field: &str, amount: Decimal) -> LedgerResult<Minor> {
    if amount < Decimal::ZERO {
        return Err(LedgerError::validation(
            field,
            format!("must not be negative, got {amount}"),
        ));
    }
    if amount.normalize().scale() > MINOR_UNIT_SCALE {
        return Err(LedgerError::validation(
            field,
            format!("at most {MINOR_UNIT_SCALE} decimal places allowed, got {amount}"),
        ));
    }
    amount
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|minor| minor.to_i64())
        .ok_or_else(|| LedgerError::validation(field, format!("amount {amount} is out of range")))
}

/// Convert stored minor units back into a decimal amount
pub fn from_minor(minor: Minor) -> Decimal {
    Decimal::new(minor, MINOR_UNIT_SCALE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::whole(Decimal::from(500), 50_000)]
    #[case::paise(Decimal::new(1999, 2), 1_999)]
    #[case::one_place(Decimal::new(15, 1), 150)]
    #[case::trailing_zeros(Decimal::new(12_3000, 4), 1_230)]
    fn test_to_minor_accepts(#[case] amount: Decimal, #[case] expected: Minor) {
        assert_eq!(to_minor("amount", amount).unwrap(), expected);
    }

    #[rstest]
    #[case::zero(Decimal::ZERO)]
    #[case::negative(Decimal::from(-5))]
    #[case::three_places(Decimal::new(1001, 3))]
    #[case::overflow(Decimal::MAX)]
    #[case::beyond_i64(Decimal::from(i64::MAX))]
    fn test_to_minor_rejects(#[case] amount: Decimal) {
        let err = to_minor("amount", amount).unwrap_err();
        assert!(matches!(err, LedgerError::Validation { .. }));
    }

    #[test]
    fn test_non_negative_accepts_zero() {
        assert_eq!(non_negative_to_minor("daily_limit", Decimal::ZERO).unwrap(), 0);
    }

    #[test]
    fn test_from_minor_keeps_value() {
        assert_eq!(from_minor(30_000), Decimal::from(300));
        assert_eq!(from_minor(1_999).to_string(), "19.99");
    }
}
