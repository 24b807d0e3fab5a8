//! Rows of the metadata store.

pub mod document;
pub mod pending_write;
pub mod purchase;

pub use document::{Document, NewDocument};
pub use pending_write::{NewPendingWrite, PendingStatus, PendingWrite, PendingWriteKind};
pub use purchase::{NewPurchase, Purchase, PurchaseIntent};
