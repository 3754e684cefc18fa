use std::str::FromStr;

use rust_decimal::Decimal;
use thiserror::Error;

/// Money is an exact decimal so no precision is lost on currency values.
/// The scale is kept as given: "12.345" stays 12.345.
pub type Amount = Decimal;

/// Format an amount as a human-readable string with at least two decimals.
/// Example: 50 -> "50.00", 12.345 -> "12.345", -1.5 -> "-1.50"
pub fn format_amount(amount: Amount) -> String {
    let mut value = amount.normalize();
    if value.scale() < 2 {
        value.rescale(2);
    }
    value.to_string()
}

/// Parse a decimal string into an amount.
/// Example: "50.00" -> 50.00, "12.5" -> 12.5, "100" -> 100
pub fn parse_amount(input: &str) -> Result<Amount, ParseAmountError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ParseAmountError::Empty);
    }

    Decimal::from_str(input).map_err(|_| ParseAmountError::InvalidFormat(input.to_string()))
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseAmountError {
    #[error("empty amount")]
    Empty,

    #[error("invalid money format: {0}")]
    InvalidFormat(String),
}
