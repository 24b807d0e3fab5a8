//! Conversions between decimal strings and on-chain integer amounts.

use alloy::primitives::U256;
use bigdecimal::num_bigint::BigInt;
use bigdecimal::{BigDecimal, Zero};
use docmarket_core::price::PRICE_DECIMALS;
use docmarket_core::ValidationError;

/// Price in the native currency to wei.
pub fn price_to_wei(price: &BigDecimal) -> Result<U256, ValidationError> {
    if price < &BigDecimal::zero() {
        return Err(ValidationError::NotPositive { field: "price" });
    }
    let (digits, _) = price.with_scale(PRICE_DECIMALS).as_bigint_and_exponent();
    U256::from_str_radix(&digits.to_string(), 10)
        .map_err(|e| ValidationError::InvalidPrice(price.to_string(), e.to_string()))
}

/// Wei to a price in the native currency.
pub fn wei_to_price(wei: U256) -> BigDecimal {
    let digits = BigInt::parse_bytes(wei.to_string().as_bytes(), 10).unwrap_or_default();
    BigDecimal::new(digits, PRICE_DECIMALS)
}

/// Parses a decimal amount such as `"1.5"` into base units with `decimals` fractional digits.
pub fn parse_units(input: &str, decimals: u8) -> Result<U256, ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidAmount(input.to_string(), reason.to_string());
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Required("amount"));
    }

    let (whole, frac) = trimmed.split_once('.').unwrap_or((trimmed, ""));
    if whole.is_empty() && frac.is_empty() {
        return Err(invalid("no digits"));
    }
    if !whole.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()) {
        return Err(invalid("only digits and a decimal point are allowed"));
    }
    let frac = frac.trim_end_matches('0');
    if frac.len() > decimals as usize {
        return Err(invalid(&format!("at most {} decimal places are supported", decimals)));
    }

    let mut digits = String::with_capacity(whole.len() + decimals as usize);
    digits.push_str(whole);
    digits.push_str(frac);
    digits.extend(std::iter::repeat('0').take(decimals as usize - frac.len()));
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 10).map_err(|_| invalid("too large"))
}

/// Formats base units with `decimals` fractional digits, trimming trailing zeros.
pub fn format_units(value: U256, decimals: u8) -> String {
    let digits = value.to_string();
    let decimals = decimals as usize;
    if decimals == 0 {
        return digits;
    }
    let padded = if digits.len() <= decimals {
        format!("{}{}", "0".repeat(decimals + 1 - digits.len()), digits)
    } else {
        digits
    };
    let (whole, frac) = padded.split_at(padded.len() - decimals);
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        whole.to_string()
    } else {
        format!("{}.{}", whole, frac)
    }
}

/// Native currency amount (18 decimals) for display.
pub fn format_ether(wei: U256) -> String {
    format_units(wei, PRICE_DECIMALS as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const ONE_ETHER: u128 = 1_000_000_000_000_000_000;

    #[test]
    fn test_price_to_wei() {
        let price = BigDecimal::from_str("0.01").unwrap();
        assert_eq!(price_to_wei(&price).unwrap(), U256::from(ONE_ETHER / 100));
        assert_eq!(
            price_to_wei(&BigDecimal::from(3)).unwrap(),
            U256::from(3 * ONE_ETHER)
        );
    }

    #[test]
    fn test_price_to_wei_from_store_scale() {
        let stored = BigDecimal::from_str("0.010000000000000000").unwrap();
        assert_eq!(price_to_wei(&stored).unwrap(), U256::from(ONE_ETHER / 100));
    }

    #[test]
    fn test_wei_to_price() {
        let price = wei_to_price(U256::from(ONE_ETHER / 100));
        assert_eq!(price, BigDecimal::from_str("0.01").unwrap());
    }

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_units("1.5", 6).unwrap(), U256::from(1_500_000));
        assert_eq!(parse_units("100", 0).unwrap(), U256::from(100));
        assert_eq!(parse_units(".25", 2).unwrap(), U256::from(25));
        assert_eq!(parse_units("0.10", 1).unwrap(), U256::from(1));
        assert_eq!(parse_units("0", 18).unwrap(), U256::ZERO);
        assert!(parse_units("1.234", 2).is_err());
        assert!(parse_units("1e3", 18).is_err());
        assert!(parse_units("-1", 18).is_err());
        assert!(parse_units(".", 18).is_err());
        assert_eq!(parse_units(" ", 18), Err(ValidationError::Required("amount")));
    }

    #[test]
    fn test_format_units() {
        assert_eq!(format_units(U256::from(1_500_000), 6), "1.5");
        assert_eq!(format_units(U256::from(5), 6), "0.000005");
        assert_eq!(format_units(U256::ZERO, 18), "0");
        assert_eq!(format_units(U256::from(42), 0), "42");
        assert_eq!(format_ether(U256::from(2 * ONE_ETHER)), "2");
    }
}
