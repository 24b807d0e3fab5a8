//! Document model: the off-chain mirror of a registered document.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use docmarket_core::CartItem;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A document listing as stored in the `documents` table.
///
/// `price_per_token` and `amount` mirror on-chain state at upload time and
/// are not updated by purchases, so they can drift from the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Document {
    /// Client-assigned id (milliseconds since the epoch at upload), also the on-chain id.
    pub id: i64,
    pub title: String,
    pub description: String,
    /// Lower-cased seller address.
    pub seller: String,
    /// Price per unit in the native currency.
    pub price_per_token: BigDecimal,
    /// Remaining amount as mirrored at upload.
    pub amount: i64,
    /// Public URL of the uploaded file.
    pub file_url: String,
    /// SHA-256 of the uploaded file (hex). Informational only.
    pub file_hash: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Data required to insert a document row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDocument {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub seller: String,
    pub price_per_token: BigDecimal,
    pub amount: i64,
    pub file_url: String,
    pub file_hash: Option<String>,
}

impl NewDocument {
    /// Materializes the row as the store would return it.
    pub fn into_document(self, created_at: DateTime<Utc>) -> Document {
        Document {
            id: self.id,
            title: self.title,
            description: self.description,
            seller: self.seller,
            price_per_token: self.price_per_token,
            amount: self.amount,
            file_url: self.file_url,
            file_hash: self.file_hash,
            is_active: true,
            created_at,
        }
    }
}

impl Document {
    /// Remaining amount, clamped at zero.
    pub fn remaining(&self) -> u64 {
        self.amount.max(0) as u64
    }

    /// Case-insensitive substring match against title or description.
    pub fn matches_query(&self, query: &str) -> bool {
        let needle = query.trim().to_lowercase();
        self.title.to_lowercase().contains(&needle)
            || self.description.to_lowercase().contains(&needle)
    }

    /// Builds a cart line for this document.
    pub fn to_cart_item(&self, quantity: u64) -> CartItem {
        CartItem {
            doc_id: self.id,
            title: self.title.clone(),
            seller: self.seller.clone(),
            price_per_unit: self.price_per_token.to_string(),
            amount: self.remaining(),
            quantity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn sample() -> Document {
        NewDocument {
            id: 1_700_000_000_000,
            title: "Rust Ownership Guide".to_string(),
            description: "Borrowing, lifetimes and moves".to_string(),
            seller: "0x00000000000000000000000000000000000000aa".to_string(),
            price_per_token: BigDecimal::from_str("0.01").unwrap(),
            amount: 3,
            file_url: "file:///blobs/documents/1-2.pdf".to_string(),
            file_hash: None,
        }
        .into_document(Utc::now())
    }

    #[test]
    fn test_new_document_starts_active() {
        assert!(sample().is_active);
    }

    #[test]
    fn test_matches_query_is_case_insensitive() {
        let doc = sample();
        assert!(doc.matches_query("ownership"));
        assert!(doc.matches_query("LIFETIMES"));
        assert!(doc.matches_query(""));
        assert!(!doc.matches_query("python"));
    }

    #[test]
    fn test_remaining_clamps_negative() {
        let mut doc = sample();
        doc.amount = -2;
        assert_eq!(doc.remaining(), 0);
    }

    #[test]
    fn test_to_cart_item() {
        let item = sample().to_cart_item(2);
        assert_eq!(item.doc_id, 1_700_000_000_000);
        assert_eq!(item.price_per_unit, "0.01");
        assert_eq!(item.amount, 3);
        assert_eq!(item.quantity, 2);
    }
}
