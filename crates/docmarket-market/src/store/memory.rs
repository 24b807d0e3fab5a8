//! In-memory store for tests and local runs without Postgres.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    Document, NewDocument, NewPendingWrite, NewPurchase, PendingStatus, PendingWrite, Purchase,
};

use super::{MetadataStore, PendingLedger, StoreResult};

#[derive(Debug, Default)]
struct Tables {
    documents: HashMap<i64, Document>,
    purchases: HashMap<Uuid, Purchase>,
    pending: HashMap<Uuid, PendingWrite>,
}

/// Keeps every table in a `HashMap` behind one lock.
///
/// [`MemoryStore::set_offline`] makes the document and purchase methods fail
/// with [`StoreError::Unavailable`] while the ledger keeps working.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("metadata store is offline".to_string()));
        }
        Ok(())
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }

    fn update_pending<F>(&self, id: Uuid, f: F) -> StoreResult<()>
    where
        F: FnOnce(&mut PendingWrite),
    {
        let mut tables = self.write()?;
        let entry = tables
            .pending
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("pending write {}", id)))?;
        f(entry);
        entry.updated_at = Utc::now();
        Ok(())
    }
}

fn newest_first(docs: &mut [Document]) {
    docs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn list_active_documents(&self) -> StoreResult<Vec<Document>> {
        self.check_online()?;
        let mut docs: Vec<Document> = self
            .read()?
            .documents
            .values()
            .filter(|d| d.is_active)
            .cloned()
            .collect();
        newest_first(&mut docs);
        Ok(docs)
    }

    async fn search_documents(&self, query: &str) -> StoreResult<Vec<Document>> {
        let docs = self.list_active_documents().await?;
        if query.trim().is_empty() {
            return Ok(docs);
        }
        Ok(docs.into_iter().filter(|d| d.matches_query(query)).collect())
    }

    async fn get_document(&self, id: i64) -> StoreResult<Option<Document>> {
        self.check_online()?;
        Ok(self.read()?.documents.get(&id).cloned())
    }

    async fn documents_by_seller(&self, seller: &str) -> StoreResult<Vec<Document>> {
        self.check_online()?;
        let seller = seller.to_lowercase();
        let mut docs: Vec<Document> = self
            .read()?
            .documents
            .values()
            .filter(|d| d.seller == seller)
            .cloned()
            .collect();
        newest_first(&mut docs);
        Ok(docs)
    }

    async fn insert_document(&self, doc: &NewDocument) -> StoreResult<Document> {
        self.check_online()?;
        let mut tables = self.write()?;
        if tables.documents.contains_key(&doc.id) {
            return Err(StoreError::Conflict(format!("document {}", doc.id)));
        }
        let mut row = doc.clone();
        row.seller = row.seller.to_lowercase();
        let document = row.into_document(Utc::now());
        tables.documents.insert(document.id, document.clone());
        Ok(document)
    }

    async fn set_document_active(&self, id: i64, seller: &str, active: bool) -> StoreResult<bool> {
        self.check_online()?;
        let seller = seller.to_lowercase();
        let mut tables = self.write()?;
        match tables.documents.get_mut(&id) {
            Some(doc) if doc.seller == seller => {
                doc.is_active = active;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_document(&self, id: i64, seller: &str) -> StoreResult<bool> {
        self.check_online()?;
        let seller = seller.to_lowercase();
        let mut tables = self.write()?;
        let owned = tables
            .documents
            .get(&id)
            .map(|d| d.seller == seller)
            .unwrap_or(false);
        if owned {
            tables.documents.remove(&id);
        }
        Ok(owned)
    }

    async fn insert_purchase(&self, purchase: &NewPurchase) -> StoreResult<Purchase> {
        self.check_online()?;
        let mut tables = self.write()?;
        if tables.purchases.contains_key(&purchase.id) {
            return Err(StoreError::Conflict(format!("purchase {}", purchase.id)));
        }
        let mut row = purchase.clone();
        row.buyer = row.buyer.to_lowercase();
        let record = row.into_purchase(Utc::now());
        tables.purchases.insert(record.id, record.clone());
        Ok(record)
    }

    async fn purchases_by_buyer(&self, buyer: &str) -> StoreResult<Vec<Purchase>> {
        self.check_online()?;
        let buyer = buyer.to_lowercase();
        let mut rows: Vec<Purchase> = self
            .read()?
            .purchases
            .values()
            .filter(|p| p.buyer == buyer)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn purchases_for_document(&self, doc_id: i64) -> StoreResult<Vec<Purchase>> {
        self.check_online()?;
        let mut rows: Vec<Purchase> = self
            .read()?
            .purchases
            .values()
            .filter(|p| p.doc_id == doc_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }
}

#[async_trait]
impl PendingLedger for MemoryStore {
    async fn record(&self, entry: &NewPendingWrite) -> StoreResult<PendingWrite> {
        let mut row = entry.clone();
        row.account = row.account.to_lowercase();
        let pending = row.into_pending_write(Uuid::new_v4(), Utc::now());
        self.write()?.pending.insert(pending.id, pending.clone());
        Ok(pending)
    }

    async fn mark_submitted(&self, id: Uuid, tx_hash: &str) -> StoreResult<()> {
        self.update_pending(id, |entry| entry.tx_hash = Some(tx_hash.to_string()))
    }

    async fn advance(
        &self,
        id: Uuid,
        status: PendingStatus,
        tx_hash: Option<&str>,
    ) -> StoreResult<()> {
        self.update_pending(id, |entry| {
            entry.status = status;
            entry.error = None;
            if let Some(hash) = tx_hash {
                entry.tx_hash = Some(hash.to_string());
            }
        })
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> StoreResult<()> {
        self.update_pending(id, |entry| {
            entry.status = PendingStatus::Failed;
            entry.error = Some(error.to_string());
        })
    }

    async fn get_pending(&self, id: Uuid) -> StoreResult<Option<PendingWrite>> {
        Ok(self.read()?.pending.get(&id).cloned())
    }

    async fn unsettled(&self) -> StoreResult<Vec<PendingWrite>> {
        let mut rows: Vec<PendingWrite> = self
            .read()?
            .pending
            .values()
            .filter(|p| !p.status.is_settled())
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }
}
