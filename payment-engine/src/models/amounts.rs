//! Field validators shared by engine inputs.

use rust_decimal::Decimal;
use validator::ValidationError;

/// Largest amount accepted on any input, in whole currency units. Sums of
/// bounded amounts stay far inside `Decimal`'s range.
pub const MAX_AMOUNT_UNITS: i64 = 1_000_000_000_000_000;

pub fn max_amount() -> Decimal {
    Decimal::from(MAX_AMOUNT_UNITS)
}

fn too_large() -> ValidationError {
    let mut err = ValidationError::new("amount_too_large");
    err.message = Some(format!("Amount cannot exceed {}", MAX_AMOUNT_UNITS).into());
    err
}

pub fn validate_positive_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount <= Decimal::ZERO {
        let mut err = ValidationError::new("positive_amount");
        err.message = Some("Amount must be greater than zero".into());
        return Err(err);
    }
    if *amount > max_amount() {
        return Err(too_large());
    }
    Ok(())
}

pub fn validate_non_negative_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        let mut err = ValidationError::new("non_negative_amount");
        err.message = Some("Amount cannot be negative".into());
        return Err(err);
    }
    if *amount > max_amount() {
        return Err(too_large());
    }
    Ok(())
}
