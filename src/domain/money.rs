use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

/// Money is represented as an exact decimal to avoid floating-point drift.
/// Commissions are fractions of a cent (0.05% of 1.00 is 0.0005), so amounts
/// keep their full scale and are only rounded for display.
pub type Amount = Decimal;

/// Maximum number of decimal places accepted from user input.
pub const INPUT_DECIMAL_PLACES: u32 = 2;

/// Format an amount with two decimal places.
/// Example: 100.05 -> "100.05", 12.5 -> "12.50", -1 -> "-1.00"
pub fn format_amount(amount: Amount) -> String {
    format_amount_dp(amount, 2)
}

/// Format a commission with four decimal places.
/// Example: 0.05 -> "0.0500"
pub fn format_commission(amount: Amount) -> String {
    format_amount_dp(amount, 4)
}

/// Format an amount rounded half away from zero to `places` decimal places,
/// padding with trailing zeros.
pub fn format_amount_dp(amount: Amount, places: u32) -> String {
    let mut rounded = amount.round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(places);
    rounded.to_string()
}

/// Parse a decimal string typed by a user into an amount.
/// Example: "50.00" -> 50.00, "12.5" -> 12.5, "100" -> 100
pub fn parse_amount(input: &str) -> Result<Amount, ParseAmountError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ParseAmountError::InvalidFormat);
    }

    let amount = Decimal::from_str(input).map_err(|_| ParseAmountError::InvalidFormat)?;
    if amount.scale() > INPUT_DECIMAL_PLACES {
        return Err(ParseAmountError::TooPrecise {
            max_places: INPUT_DECIMAL_PLACES,
        });
    }

    Ok(amount)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseAmountError {
    #[error("invalid money format")]
    InvalidFormat,

    #[error("amounts are limited to {max_places} decimal places")]
    TooPrecise { max_places: u32 },
}
