//! # Fixed-width Arithmetic
//!
//! `a * b / c` shows up everywhere in share accounting. The product of two
//! `u128` values always fits in 256 bits, so these helpers widen, divide,
//! and only then check that the quotient fits back into `u128`.

use primitive_types::U256;

use crate::error::{ProtocolError, ProtocolResult};

fn narrow(value: U256, context: &'static str) -> ProtocolResult<u128> {
    if value > U256::from(u128::MAX) {
        return Err(ProtocolError::Overflow(context));
    }
    Ok(value.low_u128())
}

/// `floor(a * b / denominator)`.
///
/// Division by zero and quotients above `u128::MAX` are reported as
/// [`ProtocolError::Overflow`].
pub fn mul_div(a: u128, b: u128, denominator: u128) -> ProtocolResult<u128> {
    if denominator == 0 {
        return Err(ProtocolError::Overflow("mul_div by zero"));
    }
    let product = U256::from(a) * U256::from(b);
    narrow(product / U256::from(denominator), "mul_div")
}

/// `ceil(a * b / denominator)`.
pub fn mul_div_round_up(a: u128, b: u128, denominator: u128) -> ProtocolResult<u128> {
    if denominator == 0 {
        return Err(ProtocolError::Overflow("mul_div_round_up by zero"));
    }
    let product = U256::from(a) * U256::from(b);
    let d = U256::from(denominator);
    let mut quotient = product / d;
    if !(product % d).is_zero() {
        quotient += U256::one();
    }
    narrow(quotient, "mul_div_round_up")
}

/// Checked addition with a named context for the error.
pub fn add(a: u128, b: u128, context: &'static str) -> ProtocolResult<u128> {
    a.checked_add(b).ok_or(ProtocolError::Overflow(context))
}
