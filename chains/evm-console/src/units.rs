use ethers::types::U256;
use ethers::utils::{format_units, parse_units};
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

use crate::client::ChainError;

/// Largest number of significant digits a `Decimal` holds without loss.
const DECIMAL_DIGITS: usize = 28;

/// Human-readable amount to base units. Digits beyond `decimals` are
/// truncated, never rounded up.
pub fn to_base_units(amount: Decimal, decimals: u8) -> Result<U256, ChainError> {
    if amount.is_sign_negative() {
        return Err(ChainError::Conversion(format!("negative amount {}", amount)));
    }
    let truncated = amount
        .round_dp_with_strategy(decimals as u32, RoundingStrategy::ToZero)
        .normalize();
    let parsed = parse_units(truncated.to_string(), decimals as u32)
        .map_err(|e| ChainError::Conversion(format!("{}: {}", truncated, e)))?;
    Ok(parsed.into())
}

/// Base units to a human-readable amount, dropping fractional digits that do
/// not fit.
pub fn from_base_units(value: U256, decimals: u8) -> Result<Decimal, ChainError> {
    let formatted = format_units(value, decimals as u32)
        .map_err(|e| ChainError::Conversion(format!("{}: {}", value, e)))?;
    let (int_part, frac_part) = formatted
        .split_once('.')
        .unwrap_or((formatted.as_str(), ""));
    if int_part.len() > DECIMAL_DIGITS {
        return Err(ChainError::Conversion(format!("{} is too large", formatted)));
    }

    let room = DECIMAL_DIGITS - int_part.len();
    let frac_part = frac_part.trim_end_matches('0');
    let frac_part = &frac_part[..frac_part.len().min(room)];
    let text = if frac_part.is_empty() {
        int_part.to_string()
    } else {
        format!("{}.{}", int_part, frac_part)
    };
    Decimal::from_str(&text).map_err(|e| ChainError::Conversion(format!("{}: {}", text, e)))
}
