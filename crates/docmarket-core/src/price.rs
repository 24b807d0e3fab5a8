// Price parsing for document listings
//
// Prices are entered and stored as decimal strings in the native currency
// (e.g. "0.01" ETH per unit). They are never represented as floats.

use bigdecimal::{BigDecimal, Zero};
use std::str::FromStr;

use crate::error::ValidationError;

/// Maximum number of fractional digits a native-currency price can carry (wei precision).
pub const PRICE_DECIMALS: i64 = 18;

/// Parses a user-entered price-per-unit.
///
/// The price must be a plain positive decimal with at most 18 fractional digits.
pub fn parse_price(input: &str) -> Result<BigDecimal, ValidationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Required("price"));
    }

    // BigDecimal accepts exponent notation; listings only take plain decimals.
    if !trimmed.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return Err(ValidationError::InvalidPrice(
            input.to_string(),
            "only digits and a decimal point are allowed".to_string(),
        ));
    }

    let price = BigDecimal::from_str(trimmed)
        .map_err(|e| ValidationError::InvalidPrice(input.to_string(), e.to_string()))?;

    if price <= BigDecimal::zero() {
        return Err(ValidationError::NotPositive { field: "price" });
    }

    let (_, scale) = price.normalized().as_bigint_and_exponent();
    if scale > PRICE_DECIMALS {
        return Err(ValidationError::InvalidPrice(
            input.to_string(),
            format!("at most {} decimal places are supported", PRICE_DECIMALS),
        ));
    }

    Ok(price)
}

/// Informational total for a purchase: `price * quantity`.
pub fn total_price(price_per_unit: &BigDecimal, quantity: u64) -> BigDecimal {
    price_per_unit.clone() * BigDecimal::from(quantity)
}
