//! Metadata store: document listings, purchase records and the pending-write ledger.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    Document, NewDocument, NewPendingWrite, NewPurchase, PendingStatus, PendingWrite, Purchase,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Document and purchase rows.
///
/// Listing order is newest first (`created_at` descending, then `id`
/// descending). Ownership checks on mutations compare the lower-cased seller.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Active documents, newest first.
    async fn list_active_documents(&self) -> StoreResult<Vec<Document>>;

    /// Active documents whose title or description contains `query`
    /// (case-insensitive). An empty query is the same as the listing.
    async fn search_documents(&self, query: &str) -> StoreResult<Vec<Document>>;

    async fn get_document(&self, id: i64) -> StoreResult<Option<Document>>;

    /// Every document of a seller, active or not, newest first.
    async fn documents_by_seller(&self, seller: &str) -> StoreResult<Vec<Document>>;

    /// Fails with [`StoreError::Conflict`] if the id already exists.
    async fn insert_document(&self, doc: &NewDocument) -> StoreResult<Document>;

    /// Returns false when no document with that id belongs to `seller`.
    async fn set_document_active(&self, id: i64, seller: &str, active: bool) -> StoreResult<bool>;

    /// Returns false when no document with that id belongs to `seller`.
    async fn delete_document(&self, id: i64, seller: &str) -> StoreResult<bool>;

    /// Fails with [`StoreError::Conflict`] if the id already exists.
    async fn insert_purchase(&self, purchase: &NewPurchase) -> StoreResult<Purchase>;

    async fn purchases_by_buyer(&self, buyer: &str) -> StoreResult<Vec<Purchase>>;

    async fn purchases_for_document(&self, doc_id: i64) -> StoreResult<Vec<Purchase>>;
}

/// The pending-write ledger.
#[async_trait]
pub trait PendingLedger: Send + Sync {
    /// Records a new entry in `pending` status.
    async fn record(&self, entry: &NewPendingWrite) -> StoreResult<PendingWrite>;

    /// Stores the hash of a transaction the provider accepted.
    async fn mark_submitted(&self, id: Uuid, tx_hash: &str) -> StoreResult<()>;

    /// Moves an entry to `status`, replacing the tx hash when one is given.
    async fn advance(
        &self,
        id: Uuid,
        status: PendingStatus,
        tx_hash: Option<&str>,
    ) -> StoreResult<()>;

    async fn mark_failed(&self, id: Uuid, error: &str) -> StoreResult<()>;

    async fn get_pending(&self, id: Uuid) -> StoreResult<Option<PendingWrite>>;

    /// Entries that are neither mirrored nor failed, oldest first.
    async fn unsettled(&self) -> StoreResult<Vec<PendingWrite>>;
}

/// Escapes `%`, `_` and `\` for use inside an `ILIKE` pattern.
pub fn escape_like(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
