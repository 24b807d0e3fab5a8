//! Purchase model for records written after a buy transaction is mined.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A purchase record from the `purchases` table.
///
/// `total_price` is informational: the store does not check it against
/// `quantity * price_per_token`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Purchase {
    /// Same id as the ledger entry that produced this purchase.
    pub id: Uuid,
    pub doc_id: i64,
    /// Lower-cased buyer address.
    pub buyer: String,
    pub quantity: i64,
    pub total_price: BigDecimal,
    pub tx_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Data required to insert a purchase record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPurchase {
    pub id: Uuid,
    pub doc_id: i64,
    pub buyer: String,
    pub quantity: i64,
    pub total_price: BigDecimal,
    pub tx_hash: String,
}

impl NewPurchase {
    pub fn into_purchase(self, created_at: DateTime<Utc>) -> Purchase {
        Purchase {
            id: self.id,
            doc_id: self.doc_id,
            buyer: self.buyer,
            quantity: self.quantity,
            total_price: self.total_price,
            tx_hash: self.tx_hash,
            created_at,
        }
    }
}

/// What a buyer asked for, recorded in the ledger before the buy transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseIntent {
    pub doc_id: i64,
    pub buyer: String,
    pub seller: String,
    pub quantity: u64,
    pub total_price: BigDecimal,
}

impl PurchaseIntent {
    /// The purchase row to mirror once the transaction is mined.
    pub fn to_new_purchase(&self, id: Uuid, tx_hash: &str) -> NewPurchase {
        NewPurchase {
            id,
            doc_id: self.doc_id,
            buyer: self.buyer.clone(),
            quantity: self.quantity as i64,
            total_price: self.total_price.clone(),
            tx_hash: tx_hash.to_string(),
        }
    }
}
