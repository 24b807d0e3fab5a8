//! Form validation for the upload and buy actions.
//!
//! Validation only checks what the user typed. Nothing here consults chain
//! state: availability on-chain is enforced by the registry contract.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::price::parse_price;

/// Largest file accepted for upload (50 MiB, the bucket's object limit).
pub const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Largest unit count a document can be registered with. The metadata
/// store keeps amounts in a signed 64-bit column.
pub const MAX_AMOUNT: u64 = i64::MAX as u64;

/// Raw input of the upload form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadForm {
    pub title: String,
    pub description: String,
    /// Price per unit as typed, in the native currency.
    pub price: String,
    /// Number of units to register and list.
    pub amount: u64,
    pub file_name: String,
    pub file_size: u64,
}

/// An upload form that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidUpload {
    pub title: String,
    pub description: String,
    pub price: BigDecimal,
    pub amount: u64,
    pub file_name: String,
}

impl UploadForm {
    /// Checks required fields, price format, amount and file size.
    pub fn validate(&self) -> Result<ValidUpload, ValidationError> {
        let title = required(&self.title, "title")?;
        let description = required(&self.description, "description")?;
        let file_name = required(&self.file_name, "file")?;
        let price = parse_price(&self.price)?;

        if self.amount == 0 {
            return Err(ValidationError::NotPositive { field: "amount" });
        }

        if self.amount > MAX_AMOUNT {
            return Err(ValidationError::AmountTooLarge {
                amount: self.amount,
                max: MAX_AMOUNT,
            });
        }

        if self.file_size == 0 {
            return Err(ValidationError::Required("file"));
        }

        if self.file_size > MAX_FILE_SIZE {
            return Err(ValidationError::FileTooLarge {
                name: file_name,
                size: self.file_size,
                max: MAX_FILE_SIZE,
            });
        }

        Ok(ValidUpload {
            title,
            description,
            price,
            amount: self.amount,
            file_name,
        })
    }
}

/// Raw input of the buy form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyForm {
    pub doc_id: i64,
    pub quantity: u64,
    /// Remaining amount as mirrored in the metadata store.
    pub available: u64,
}

impl BuyForm {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.quantity == 0 {
            return Err(ValidationError::NotPositive { field: "quantity" });
        }
        if self.quantity > self.available {
            return Err(ValidationError::ExceedsAvailable {
                requested: self.quantity,
                available: self.available,
            });
        }
        Ok(())
    }
}

fn required(value: &str, field: &'static str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Required(field));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn guide_form() -> UploadForm {
        UploadForm {
            title: "Guide".to_string(),
            description: "A short guide".to_string(),
            price: "0.01".to_string(),
            amount: 1,
            file_name: "guide.pdf".to_string(),
            file_size: 10 * 1024,
        }
    }

    #[test]
    fn test_valid_upload() {
        let upload = guide_form().validate().unwrap();
        assert_eq!(upload.title, "Guide");
        assert_eq!(upload.price, BigDecimal::from_str("0.01").unwrap());
        assert_eq!(upload.amount, 1);
    }

    #[test]
    fn test_upload_trims_fields() {
        let mut form = guide_form();
        form.title = "  Guide  ".to_string();
        assert_eq!(form.validate().unwrap().title, "Guide");
    }

    #[test]
    fn test_upload_requires_title() {
        let mut form = guide_form();
        form.title = "   ".to_string();
        assert_eq!(form.validate(), Err(ValidationError::Required("title")));
    }

    #[test]
    fn test_upload_requires_description() {
        let mut form = guide_form();
        form.description = String::new();
        assert_eq!(form.validate(), Err(ValidationError::Required("description")));
    }

    #[test]
    fn test_upload_requires_file() {
        let mut form = guide_form();
        form.file_size = 0;
        assert_eq!(form.validate(), Err(ValidationError::Required("file")));
    }

    #[test]
    fn test_upload_rejects_zero_amount() {
        let mut form = guide_form();
        form.amount = 0;
        assert_eq!(
            form.validate(),
            Err(ValidationError::NotPositive { field: "amount" })
        );
    }

    #[test]
    fn test_upload_rejects_amount_beyond_store_range() {
        let mut form = guide_form();
        form.amount = u64::MAX;
        assert_eq!(
            form.validate(),
            Err(ValidationError::AmountTooLarge {
                amount: u64::MAX,
                max: MAX_AMOUNT,
            })
        );

        form.amount = MAX_AMOUNT;
        assert_eq!(form.validate().unwrap().amount, MAX_AMOUNT);
    }

    #[test]
    fn test_upload_rejects_oversized_file() {
        let mut form = guide_form();
        form.file_size = MAX_FILE_SIZE + 1;
        assert!(matches!(
            form.validate(),
            Err(ValidationError::FileTooLarge { .. })
        ));
    }

    #[test]
    fn test_buy_form() {
        let ok = BuyForm { doc_id: 1, quantity: 2, available: 2 };
        assert!(ok.validate().is_ok());

        let zero = BuyForm { doc_id: 1, quantity: 0, available: 2 };
        assert!(zero.validate().is_err());

        let too_many = BuyForm { doc_id: 1, quantity: 3, available: 2 };
        assert_eq!(
            too_many.validate(),
            Err(ValidationError::ExceedsAvailable { requested: 3, available: 2 })
        );
    }
}
