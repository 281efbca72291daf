//! Fixed-point BRL arithmetic.
//!
//! Every monetary value in the system is an `i64` amount of centavos. Decimal
//! conversion happens in exactly two places: percentage math (which rounds
//! half-up to the nearest centavo) and display formatting.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::errors::ServiceError;

/// Adds two amounts, saturating at `i64::MAX`.
pub fn add(a: i64, b: i64) -> i64 {
    a.saturating_add(b)
}

/// Subtracts `b` from `a`, flooring the result at zero.
pub fn saturating_subtract(a: i64, b: i64) -> i64 {
    a.saturating_sub(b).max(0)
}

/// Subtracts `b` from `a`, allowing a negative result (refund math).
pub fn subtract_allow_negative(a: i64, b: i64) -> i64 {
    a.saturating_sub(b)
}

/// Extends a unit price over a line quantity.
///
/// Rejects negative unit prices and non-positive quantities before any
/// arithmetic runs.
pub fn multiply_by_quantity(unit_price_cents: i64, quantity: i32) -> Result<i64, ServiceError> {
    if unit_price_cents < 0 {
        return Err(ServiceError::ValidationError(format!(
            "unit price must not be negative, got {}",
            unit_price_cents
        )));
    }
    if quantity <= 0 {
        return Err(ServiceError::ValidationError(format!(
            "quantity must be positive, got {}",
            quantity
        )));
    }
    unit_price_cents
        .checked_mul(i64::from(quantity))
        .ok_or_else(|| ServiceError::ValidationError("line total overflows".to_string()))
}

/// Takes `pct` percent of `amount_cents`, rounded half-up to the nearest
/// centavo. `percentage_of(a, 100) == a` and `percentage_of(a, 0) == 0` hold
/// for every non-negative amount.
pub fn percentage_of(amount_cents: i64, pct: Decimal) -> i64 {
    let exact = Decimal::from(amount_cents) * pct / Decimal::from(100);
    exact
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(0)
}

/// Clamps a discount so it never exceeds the subtotal it applies to.
pub fn clamp_discount(discount_cents: i64, subtotal_cents: i64) -> i64 {
    discount_cents.clamp(0, subtotal_cents.max(0))
}

/// Formats centavos as a localized BRL string, e.g. `R$ 1.234,56`.
pub fn format_brl(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    let reais = abs / 100;
    let centavos = abs % 100;

    let digits = reais.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }

    format!("{}R$ {},{:02}", sign, grouped, centavos)
}
