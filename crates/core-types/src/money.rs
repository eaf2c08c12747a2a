//! Exact decimal arithmetic for balances, quantities and prices.
//!
//! Every ledger computation goes through these helpers. They never panic on
//! overflow, and ratio helpers fall back to zero when the denominator is zero.

use crate::error::CoreError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::cmp::Ordering;

pub fn add(a: Decimal, b: Decimal) -> Result<Decimal, CoreError> {
    a.checked_add(b).ok_or(CoreError::Overflow("addition"))
}

pub fn sub(a: Decimal, b: Decimal) -> Result<Decimal, CoreError> {
    a.checked_sub(b).ok_or(CoreError::Overflow("subtraction"))
}

pub fn mul(a: Decimal, b: Decimal) -> Result<Decimal, CoreError> {
    a.checked_mul(b).ok_or(CoreError::Overflow("multiplication"))
}

/// Multiplies without rounding.
///
/// `Decimal` silently rounds a product whose scale would exceed 28 digits or whose
/// mantissa would exceed 96 bits; such a product is an error here instead.
pub fn mul_exact(a: Decimal, b: Decimal) -> Result<Decimal, CoreError> {
    let (a, b) = (a.normalize(), b.normalize());
    let product = mul(a, b)?;
    if product.scale() != a.scale() + b.scale() {
        return Err(CoreError::Inexact("multiplication"));
    }
    Ok(product)
}

/// Divides `numerator` by `denominator`, yielding zero for a zero denominator.
pub fn ratio_or_zero(numerator: Decimal, denominator: Decimal) -> Result<Decimal, CoreError> {
    if denominator.is_zero() {
        return Ok(Decimal::ZERO);
    }
    numerator
        .checked_div(denominator)
        .ok_or(CoreError::Overflow("division"))
}

/// `part / whole * 100`, or zero when `whole` is zero.
pub fn percent_or_zero(part: Decimal, whole: Decimal) -> Result<Decimal, CoreError> {
    mul(ratio_or_zero(part, whole)?, dec!(100))
}

pub fn cmp(a: Decimal, b: Decimal) -> Ordering {
    a.cmp(&b)
}

/// Strips trailing zeros so equal values render identically (`1.50` -> `1.5`).
pub fn canonical(value: Decimal) -> Decimal {
    value.normalize()
}
