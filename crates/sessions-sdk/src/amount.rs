//! Conversion between decimal strings and integer base-unit amounts
//!
//! All arithmetic is arbitrary precision; token amounts never pass through floats.

use num_bigint::{BigInt, Sign};
use num_traits::{Signed, Zero};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,

    #[error("amount `{0}` has more than one decimal point")]
    TooManyDecimalPoints(String),

    #[error("amount `{0}` is not a non-negative decimal number")]
    NonNumeric(String),

    #[error("amount `{text}` has {found} fractional digits, token allows {max}")]
    TooManyFractionalDigits {
        text: String,
        found: usize,
        max: u32,
    },

    #[error("amount {0} does not fit in a 64-bit token amount")]
    OutOfRange(BigInt),
}

fn is_digits(text: &str) -> bool {
    !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit())
}

fn scale(decimals: u32) -> BigInt {
    num_traits::pow(BigInt::from(10u8), decimals as usize)
}

/// Parse a human-readable decimal string into base units.
pub fn string_to_amount(text: &str, decimals: u32) -> Result<BigInt, AmountError> {
    if text.is_empty() {
        return Err(AmountError::Empty);
    }

    let mut parts = text.split('.');
    let integer = parts.next().unwrap_or_default();
    let fraction = parts.next();
    if parts.next().is_some() {
        return Err(AmountError::TooManyDecimalPoints(text.to_string()));
    }

    let integer = if integer.is_empty() { "0" } else { integer };
    if !is_digits(integer) {
        return Err(AmountError::NonNumeric(text.to_string()));
    }

    let fraction = match fraction {
        None => "",
        Some(fraction) if is_digits(fraction) => fraction,
        Some(_) => return Err(AmountError::NonNumeric(text.to_string())),
    };
    if fraction.len() > decimals as usize {
        return Err(AmountError::TooManyFractionalDigits {
            text: text.to_string(),
            found: fraction.len(),
            max: decimals,
        });
    }

    let padded = format!("{fraction:0<width$}", width = decimals as usize);
    let whole = BigInt::parse_bytes(integer.as_bytes(), 10)
        .ok_or_else(|| AmountError::NonNumeric(text.to_string()))?;
    let fractional = if padded.is_empty() {
        BigInt::zero()
    } else {
        BigInt::parse_bytes(padded.as_bytes(), 10)
            .ok_or_else(|| AmountError::NonNumeric(text.to_string()))?
    };

    Ok(whole * scale(decimals) + fractional)
}

/// Parse a decimal string into a `u64` token amount.
pub fn string_to_token_amount(text: &str, decimals: u32) -> Result<u64, AmountError> {
    let amount = string_to_amount(text, decimals)?;
    u64::try_from(&amount).map_err(|_| AmountError::OutOfRange(amount))
}

/// Render base units as the shortest decimal string that parses back to them.
pub fn amount_to_string(amount: &BigInt, decimals: u32) -> String {
    let magnitude = amount.abs();
    let unit = scale(decimals);
    let whole = &magnitude / &unit;
    let fraction = &magnitude % &unit;

    let mut rendered = whole.to_string();
    if !fraction.is_zero() {
        let digits = format!("{:0>width$}", fraction.to_string(), width = decimals as usize);
        rendered.push('.');
        rendered.push_str(digits.trim_end_matches('0'));
    }

    if amount.sign() == Sign::Minus {
        rendered.insert(0, '-');
    }
    rendered
}

/// Render a `u64` token amount.
pub fn token_amount_to_string(amount: u64, decimals: u32) -> String {
    amount_to_string(&BigInt::from(amount), decimals)
}
