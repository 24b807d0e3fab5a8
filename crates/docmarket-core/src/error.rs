//! Validation errors raised before anything touches the chain or the store.

/// A form or value failed client-side validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    Required(&'static str),

    #[error("Invalid address '{0}': expected 0x followed by 40 hex characters")]
    InvalidAddress(String),

    #[error("Invalid price '{0}': {1}")]
    InvalidPrice(String, String),

    #[error("Invalid amount '{0}': {1}")]
    InvalidAmount(String, String),

    #[error("Amount {amount} is too large (max: {max})")]
    AmountTooLarge { amount: u64, max: u64 },

    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },

    #[error("Requested quantity {requested} exceeds available amount {available}")]
    ExceedsAvailable { requested: u64, available: u64 },

    #[error("File '{name}' is too large: {size} bytes (max: {max} bytes)")]
    FileTooLarge { name: String, size: u64, max: u64 },
}
