//! Account address handling.
//!
//! The metadata store matches sellers and buyers by plain string equality,
//! so every address is lower-cased before it is written or compared.

use crate::error::ValidationError;

/// Validates an `0x`-prefixed 20-byte hex address and returns it lower-cased.
pub fn normalize_address(address: &str) -> Result<String, ValidationError> {
    let trimmed = address.trim();
    let hex_part = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| ValidationError::InvalidAddress(address.to_string()))?;

    if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ValidationError::InvalidAddress(address.to_string()));
    }

    Ok(format!("0x{}", hex_part.to_ascii_lowercase()))
}

/// Case-insensitive address equality. Invalid addresses never match.
pub fn same_address(a: &str, b: &str) -> bool {
    match (normalize_address(a), normalize_address(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Truncates an address for display: "0x1234...abcd"
pub fn truncate_address(address: &str) -> String {
    if address.len() <= 12 {
        return address.to_string();
    }
    format!("{}...{}", &address[..6], &address[address.len() - 4..])
}
