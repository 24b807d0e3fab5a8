//! Session-local shopping cart.
//!
//! The cart lives in memory for the duration of a session. Adding a document
//! that is already in the cart sums the quantities instead of creating a
//! second line. Nothing here checks live on-chain availability.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::price::{parse_price, total_price};

/// One line of the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub doc_id: i64,
    pub title: String,
    /// Lower-cased seller address.
    pub seller: String,
    /// Price per unit as a decimal string.
    pub price_per_unit: String,
    /// Remaining amount when the item was added.
    pub amount: u64,
    pub quantity: u64,
}

impl CartItem {
    /// Informational line total.
    pub fn line_total(&self) -> Result<BigDecimal, ValidationError> {
        let price = parse_price(&self.price_per_unit)?;
        Ok(total_price(&price, self.quantity))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    items: Vec<CartItem>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an item, merging with an existing line for the same document.
    ///
    /// Returns the resulting quantity for that document.
    pub fn add(&mut self, item: CartItem) -> u64 {
        if let Some(existing) = self.items.iter_mut().find(|i| i.doc_id == item.doc_id) {
            existing.quantity = existing.quantity.saturating_add(item.quantity);
            return existing.quantity;
        }
        let quantity = item.quantity;
        self.items.push(item);
        quantity
    }

    /// Removes the line for a document.
    pub fn remove(&mut self, doc_id: i64) -> Option<CartItem> {
        let index = self.items.iter().position(|i| i.doc_id == doc_id)?;
        Some(self.items.remove(index))
    }

    /// Sets the quantity for a document. A quantity of zero removes the line.
    ///
    /// Returns false if the document is not in the cart.
    pub fn set_quantity(&mut self, doc_id: i64, quantity: u64) -> bool {
        if quantity == 0 {
            return self.remove(doc_id).is_some();
        }
        match self.items.iter_mut().find(|i| i.doc_id == doc_id) {
            Some(item) => {
                item.quantity = quantity;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, doc_id: i64) -> Option<&CartItem> {
        self.items.iter().find(|i| i.doc_id == doc_id)
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Sum of line totals.
    pub fn total(&self) -> Result<BigDecimal, ValidationError> {
        let mut total = BigDecimal::from(0);
        for item in &self.items {
            total += item.line_total()?;
        }
        Ok(total)
    }
}
