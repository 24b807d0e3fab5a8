//! Pending-write ledger model.
//!
//! Every upload and purchase writes to the chain first and to the metadata
//! store second. The ledger row is recorded before the first chain call so a
//! crash or store failure between the two can be finished later.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

use crate::error::StoreError;

/// Which store row a ledger entry will mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "pending_write_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PendingWriteKind {
    /// Register + list, then a `documents` row.
    Upload,
    /// Buy, then a `purchases` row.
    Purchase,
}

/// Progress of a dual write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "pending_write_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PendingStatus {
    /// Recorded; a transaction may or may not have been submitted.
    Pending,
    /// Upload only: the register transaction is mined, the listing is not.
    Registered,
    /// Every chain step is mined; the store row is missing.
    ChainConfirmed,
    /// The store row exists.
    Mirrored,
    /// A chain step was rejected or reverted.
    Failed,
}

impl PendingStatus {
    /// Mirrored and failed entries need no further work.
    pub fn is_settled(self) -> bool {
        matches!(self, PendingStatus::Mirrored | PendingStatus::Failed)
    }
}

impl std::fmt::Display for PendingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PendingStatus::Pending => "pending",
            PendingStatus::Registered => "registered",
            PendingStatus::ChainConfirmed => "chain_confirmed",
            PendingStatus::Mirrored => "mirrored",
            PendingStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl std::fmt::Display for PendingWriteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PendingWriteKind::Upload => f.write_str("upload"),
            PendingWriteKind::Purchase => f.write_str("purchase"),
        }
    }
}

/// A row of the `pending_writes` table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PendingWrite {
    pub id: Uuid,
    pub kind: PendingWriteKind,
    pub doc_id: i64,
    /// Lower-cased account that initiated the write.
    pub account: String,
    /// JSON of the store row to mirror (`NewDocument` or `PurchaseIntent`).
    pub payload: serde_json::Value,
    pub status: PendingStatus,
    /// Hash of the most recently submitted transaction.
    pub tx_hash: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PendingWrite {
    /// Decodes the payload into the row type it was recorded from.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// True when nothing was ever submitted and the entry is older than `max_age`.
    pub fn is_abandoned(&self, now: DateTime<Utc>, max_age: std::time::Duration) -> bool {
        if self.status != PendingStatus::Pending || self.tx_hash.is_some() {
            return false;
        }
        let age = now.signed_duration_since(self.created_at);
        age.to_std().map(|age| age >= max_age).unwrap_or(false)
    }
}

/// Data required to record a new ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPendingWrite {
    pub kind: PendingWriteKind,
    pub doc_id: i64,
    pub account: String,
    pub payload: serde_json::Value,
}

impl NewPendingWrite {
    /// Builds an entry whose payload is `row` serialized as JSON.
    pub fn new<T: Serialize>(
        kind: PendingWriteKind,
        doc_id: i64,
        account: &str,
        row: &T,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            kind,
            doc_id,
            account: account.to_string(),
            payload: serde_json::to_value(row)?,
        })
    }

    pub fn into_pending_write(self, id: Uuid, now: DateTime<Utc>) -> PendingWrite {
        PendingWrite {
            id,
            kind: self.kind,
            doc_id: self.doc_id,
            account: self.account,
            payload: self.payload,
            status: PendingStatus::Pending,
            tx_hash: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}
