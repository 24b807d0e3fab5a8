//! Postgres implementation of the metadata store and ledger.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    Document, NewDocument, NewPendingWrite, NewPurchase, PendingStatus, PendingWrite, Purchase,
};

use super::{escape_like, MetadataStore, PendingLedger, StoreResult};

const DOCUMENT_COLUMNS: &str = "id, title, description, seller, price_per_token, amount, \
     file_url, file_hash, is_active, created_at";

const PURCHASE_COLUMNS: &str = "id, doc_id, buyer, quantity, total_price, tx_hash, created_at";

const PENDING_COLUMNS: &str =
    "id, kind, doc_id, account, payload, status, tx_hash, error, created_at, updated_at";

/// Metadata store backed by the `documents`, `purchases` and `pending_writes` tables.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Maps a unique-key violation to [`StoreError::Conflict`].
fn conflict_or(e: sqlx::Error, what: String) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict(what),
        _ => StoreError::Database(e),
    }
}

#[async_trait]
impl MetadataStore for PgStore {
    async fn list_active_documents(&self) -> StoreResult<Vec<Document>> {
        let sql = format!(
            "SELECT {} FROM documents WHERE is_active = TRUE ORDER BY created_at DESC, id DESC",
            DOCUMENT_COLUMNS
        );
        Ok(sqlx::query_as::<_, Document>(&sql)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn search_documents(&self, query: &str) -> StoreResult<Vec<Document>> {
        let query = query.trim();
        if query.is_empty() {
            return self.list_active_documents().await;
        }
        let pattern = format!("%{}%", escape_like(query));
        let sql = format!(
            r#"
            SELECT {} FROM documents
            WHERE is_active = TRUE
              AND (title ILIKE $1 ESCAPE '\' OR description ILIKE $1 ESCAPE '\')
            ORDER BY created_at DESC, id DESC
            "#,
            DOCUMENT_COLUMNS
        );
        Ok(sqlx::query_as::<_, Document>(&sql)
            .bind(pattern)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn get_document(&self, id: i64) -> StoreResult<Option<Document>> {
        let sql = format!("SELECT {} FROM documents WHERE id = $1", DOCUMENT_COLUMNS);
        Ok(sqlx::query_as::<_, Document>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn documents_by_seller(&self, seller: &str) -> StoreResult<Vec<Document>> {
        let sql = format!(
            "SELECT {} FROM documents WHERE seller = $1 ORDER BY created_at DESC, id DESC",
            DOCUMENT_COLUMNS
        );
        Ok(sqlx::query_as::<_, Document>(&sql)
            .bind(seller.to_lowercase())
            .fetch_all(&self.pool)
            .await?)
    }

    async fn insert_document(&self, doc: &NewDocument) -> StoreResult<Document> {
        let sql = format!(
            r#"
            INSERT INTO documents (id, title, description, seller, price_per_token, amount, file_url, file_hash, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE, NOW())
            RETURNING {}
            "#,
            DOCUMENT_COLUMNS
        );
        sqlx::query_as::<_, Document>(&sql)
            .bind(doc.id)
            .bind(&doc.title)
            .bind(&doc.description)
            .bind(doc.seller.to_lowercase())
            .bind(&doc.price_per_token)
            .bind(doc.amount)
            .bind(&doc.file_url)
            .bind(&doc.file_hash)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| conflict_or(e, format!("document {}", doc.id)))
    }

    async fn set_document_active(&self, id: i64, seller: &str, active: bool) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE documents SET is_active = $1 WHERE id = $2 AND seller = $3")
            .bind(active)
            .bind(id)
            .bind(seller.to_lowercase())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_document(&self, id: i64, seller: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = $1 AND seller = $2")
            .bind(id)
            .bind(seller.to_lowercase())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_purchase(&self, purchase: &NewPurchase) -> StoreResult<Purchase> {
        let sql = format!(
            r#"
            INSERT INTO purchases (id, doc_id, buyer, quantity, total_price, tx_hash, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            RETURNING {}
            "#,
            PURCHASE_COLUMNS
        );
        sqlx::query_as::<_, Purchase>(&sql)
            .bind(purchase.id)
            .bind(purchase.doc_id)
            .bind(purchase.buyer.to_lowercase())
            .bind(purchase.quantity)
            .bind(&purchase.total_price)
            .bind(&purchase.tx_hash)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| conflict_or(e, format!("purchase {}", purchase.id)))
    }

    async fn purchases_by_buyer(&self, buyer: &str) -> StoreResult<Vec<Purchase>> {
        let sql = format!(
            "SELECT {} FROM purchases WHERE buyer = $1 ORDER BY created_at DESC",
            PURCHASE_COLUMNS
        );
        Ok(sqlx::query_as::<_, Purchase>(&sql)
            .bind(buyer.to_lowercase())
            .fetch_all(&self.pool)
            .await?)
    }

    async fn purchases_for_document(&self, doc_id: i64) -> StoreResult<Vec<Purchase>> {
        let sql = format!(
            "SELECT {} FROM purchases WHERE doc_id = $1 ORDER BY created_at DESC",
            PURCHASE_COLUMNS
        );
        Ok(sqlx::query_as::<_, Purchase>(&sql)
            .bind(doc_id)
            .fetch_all(&self.pool)
            .await?)
    }
}

#[async_trait]
impl PendingLedger for PgStore {
    async fn record(&self, entry: &NewPendingWrite) -> StoreResult<PendingWrite> {
        let sql = format!(
            r#"
            INSERT INTO pending_writes (id, kind, doc_id, account, payload, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 'pending', NOW(), NOW())
            RETURNING {}
            "#,
            PENDING_COLUMNS
        );
        Ok(sqlx::query_as::<_, PendingWrite>(&sql)
            .bind(Uuid::new_v4())
            .bind(entry.kind)
            .bind(entry.doc_id)
            .bind(entry.account.to_lowercase())
            .bind(&entry.payload)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn mark_submitted(&self, id: Uuid, tx_hash: &str) -> StoreResult<()> {
        let result =
            sqlx::query("UPDATE pending_writes SET tx_hash = $1, updated_at = NOW() WHERE id = $2")
                .bind(tx_hash)
                .bind(id)
                .execute(&self.pool)
                .await?;
        expect_one(result.rows_affected(), id)
    }

    async fn advance(
        &self,
        id: Uuid,
        status: PendingStatus,
        tx_hash: Option<&str>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE pending_writes
            SET status = $1, tx_hash = COALESCE($2, tx_hash), error = NULL, updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(status)
        .bind(tx_hash)
        .bind(id)
        .execute(&self.pool)
        .await?;
        expect_one(result.rows_affected(), id)
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE pending_writes SET status = 'failed', error = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        expect_one(result.rows_affected(), id)
    }

    async fn get_pending(&self, id: Uuid) -> StoreResult<Option<PendingWrite>> {
        let sql = format!("SELECT {} FROM pending_writes WHERE id = $1", PENDING_COLUMNS);
        Ok(sqlx::query_as::<_, PendingWrite>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn unsettled(&self) -> StoreResult<Vec<PendingWrite>> {
        let sql = format!(
            r#"
            SELECT {} FROM pending_writes
            WHERE status NOT IN ('mirrored', 'failed')
            ORDER BY created_at ASC
            "#,
            PENDING_COLUMNS
        );
        Ok(sqlx::query_as::<_, PendingWrite>(&sql)
            .fetch_all(&self.pool)
            .await?)
    }
}

fn expect_one(rows: u64, id: Uuid) -> StoreResult<()> {
    if rows == 0 {
        return Err(StoreError::NotFound(format!("pending write {}", id)));
    }
    Ok(())
}
