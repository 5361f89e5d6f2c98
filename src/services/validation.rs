// services/validation.rs
use crate::errors::{AppError, Result};

pub const COUNTRY_PREFIX: &str = "254";
const NATIONAL_DIGITS: usize = 9;

/// Normalizes a Kenyan MSISDN to `254` followed by nine digits.
pub fn normalize_phone_number(raw: &str) -> Result<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    let formatted = if let Some(national) = digits.strip_prefix('0') {
        format!("{}{}", COUNTRY_PREFIX, national)
    } else if digits.starts_with(COUNTRY_PREFIX) {
        digits
    } else {
        format!("{}{}", COUNTRY_PREFIX, digits)
    };

    if formatted.len() != COUNTRY_PREFIX.len() + NATIONAL_DIGITS {
        return Err(AppError::invalid_data("invalid phone number"));
    }

    Ok(formatted)
}

pub fn parse_amount(raw: &str) -> Result<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|amount| amount.is_finite() && *amount > 0.0)
        .ok_or_else(|| AppError::invalid_data("invalid amount"))
}

/// Whole amounts go on the wire as integers.
pub fn amount_to_wire(amount: f64) -> serde_json::Number {
    if amount.fract() == 0.0 && amount <= u64::MAX as f64 {
        serde_json::Number::from(amount as u64)
    } else {
        serde_json::Number::from_f64(amount).unwrap_or_else(|| serde_json::Number::from(0))
    }
}
