//! Finishes dual writes that stopped between the chain and the metadata store.
//!
//! Each pass walks the unsettled ledger entries and moves every one as far
//! as it can go:
//!
//! * `pending` with a tx hash: read the receipt. Mined advances, reverted
//!   fails, missing leaves the entry alone.
//! * `pending` without a tx hash: failed once older than `stale_after`.
//! * `registered`: confirm or resubmit the listing transaction.
//! * `chain_confirmed`: insert the store row, then `mirrored`.

use std::sync::Arc;
use std::time::Duration;

use alloy::sol_types::SolEvent;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::contract::abi::IDocumentRegistry;
use crate::contract::units::price_to_wei;
use crate::contract::{emitted, RegistryContract};
use crate::error::{ChainError, MarketError, Result, StoreError};
use crate::market::is_definite_failure;
use crate::models::{NewDocument, PendingStatus, PendingWrite, PendingWriteKind, PurchaseIntent};
use crate::store::{MetadataStore, PendingLedger};

/// Counts of what a pass did, one per entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub mirrored: usize,
    pub advanced: usize,
    pub failed: usize,
    pub untouched: usize,
}

impl ReconcileReport {
    pub fn total(&self) -> usize {
        self.mirrored + self.advanced + self.failed + self.untouched
    }

    pub fn changed_anything(&self) -> bool {
        self.mirrored + self.advanced + self.failed > 0
    }
}

/// What one step did to an entry.
enum Step {
    /// Moved to this status; keep going.
    Moved(PendingStatus),
    /// Nothing more can happen in this pass.
    Stop,
}

pub struct Reconciler {
    registry: RegistryContract,
    store: Arc<dyn MetadataStore>,
    ledger: Arc<dyn PendingLedger>,
    stale_after: Duration,
}

impl Reconciler {
    pub fn new(
        registry: RegistryContract,
        store: Arc<dyn MetadataStore>,
        ledger: Arc<dyn PendingLedger>,
        stale_after: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            ledger,
            stale_after,
        }
    }

    pub async fn run_once(&self) -> Result<ReconcileReport> {
        let entries = self.ledger.unsettled().await?;
        let now = Utc::now();
        let mut report = ReconcileReport::default();

        for entry in entries {
            let initial = entry.status;
            let status = match self.settle(entry, now).await {
                Ok(status) => status,
                Err(e) => {
                    tracing::warn!(error = %e, "reconciling pending write failed");
                    initial
                }
            };
            match status {
                PendingStatus::Mirrored => report.mirrored += 1,
                PendingStatus::Failed => report.failed += 1,
                s if s != initial => report.advanced += 1,
                _ => report.untouched += 1,
            }
        }

        if report.changed_anything() {
            tracing::info!(
                mirrored = report.mirrored,
                advanced = report.advanced,
                failed = report.failed,
                untouched = report.untouched,
                "reconcile pass finished"
            );
        }
        Ok(report)
    }

    /// Runs a pass every `interval` until the handle is aborted.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once().await {
                    tracing::warn!(error = %e, "reconcile pass failed");
                }
            }
        })
    }

    /// Drives one entry forward and returns the status it ended in.
    async fn settle(&self, mut entry: PendingWrite, now: DateTime<Utc>) -> Result<PendingStatus> {
        loop {
            let step = match entry.status {
                PendingStatus::Pending => self.check_submitted(&entry, now).await?,
                PendingStatus::Registered => self.finish_listing(&entry).await?,
                PendingStatus::ChainConfirmed => self.mirror(&entry).await?,
                PendingStatus::Mirrored | PendingStatus::Failed => Step::Stop,
            };
            match step {
                Step::Moved(status) => entry.status = status,
                Step::Stop => return Ok(entry.status),
            }
        }
    }

    async fn check_submitted(&self, entry: &PendingWrite, now: DateTime<Utc>) -> Result<Step> {
        let Some(tx_hash) = entry.tx_hash.as_deref() else {
            if entry.is_abandoned(now, self.stale_after) {
                self.ledger.mark_failed(entry.id, "never submitted").await?;
                tracing::error!(ledger_id = %entry.id, "pending write was never submitted");
                return Ok(Step::Moved(PendingStatus::Failed));
            }
            return Ok(Step::Stop);
        };

        let Some(receipt) = self.registry.caller().receipt(tx_hash).await? else {
            return Ok(Step::Stop);
        };
        if !receipt.status() {
            return self.fail(entry, &ChainError::Reverted {
                tx_hash: tx_hash.to_string(),
            }
            .into())
            .await;
        }

        let next = match entry.kind {
            PendingWriteKind::Upload => PendingStatus::Registered,
            PendingWriteKind::Purchase => PendingStatus::ChainConfirmed,
        };
        self.ledger.advance(entry.id, next, None).await?;
        Ok(Step::Moved(next))
    }

    async fn finish_listing(&self, entry: &PendingWrite) -> Result<Step> {
        if let Some(tx_hash) = entry.tx_hash.as_deref() {
            let Some(receipt) = self.registry.caller().receipt(tx_hash).await? else {
                return Ok(Step::Stop);
            };
            if !receipt.status() {
                return self
                    .fail(entry, &ChainError::Reverted { tx_hash: tx_hash.to_string() }.into())
                    .await;
            }
            if emitted(&receipt, IDocumentRegistry::Listed::SIGNATURE_HASH) {
                self.ledger
                    .advance(entry.id, PendingStatus::ChainConfirmed, None)
                    .await?;
                return Ok(Step::Moved(PendingStatus::ChainConfirmed));
            }
        }

        // Only the registration is mined: list again from the seller's account.
        match self.registry.caller().wallet().account() {
            Ok(account) if account == entry.account => {}
            _ => {
                tracing::debug!(ledger_id = %entry.id, seller = %entry.account, "listing needs the seller's wallet");
                return Ok(Step::Stop);
            }
        }
        let doc: NewDocument = entry.payload_as()?;
        let price_wei = price_to_wei(&doc.price_per_token)?;
        let pending = match self
            .registry
            .list_document(doc.id as u64, doc.amount.max(0) as u64, price_wei)
            .await
        {
            Ok(pending) => pending,
            Err(e) => return self.fail(entry, &e).await,
        };
        self.ledger.mark_submitted(entry.id, pending.tx_hash()).await?;

        match pending.get_receipt().await {
            Ok(receipt) => {
                let tx_hash = receipt.transaction_hash.to_string();
                self.ledger
                    .advance(entry.id, PendingStatus::ChainConfirmed, Some(&tx_hash))
                    .await?;
                tracing::info!(ledger_id = %entry.id, %tx_hash, "listing resubmitted");
                Ok(Step::Moved(PendingStatus::ChainConfirmed))
            }
            Err(e) => self.fail(entry, &e).await,
        }
    }

    async fn mirror(&self, entry: &PendingWrite) -> Result<Step> {
        let inserted = match entry.kind {
            PendingWriteKind::Upload => {
                let doc: NewDocument = entry.payload_as()?;
                self.store.insert_document(&doc).await.map(|_| ())
            }
            PendingWriteKind::Purchase => {
                let intent: PurchaseIntent = entry.payload_as()?;
                let tx_hash = entry.tx_hash.as_deref().unwrap_or_default();
                self.store
                    .insert_purchase(&intent.to_new_purchase(entry.id, tx_hash))
                    .await
                    .map(|_| ())
            }
        };
        match inserted {
            Ok(()) | Err(StoreError::Conflict(_)) => {}
            Err(e) => {
                tracing::warn!(ledger_id = %entry.id, error = %e, "mirror still failing");
                return Ok(Step::Stop);
            }
        }
        self.ledger
            .advance(entry.id, PendingStatus::Mirrored, None)
            .await?;
        tracing::info!(ledger_id = %entry.id, kind = %entry.kind, doc_id = entry.doc_id, "pending write mirrored");
        Ok(Step::Moved(PendingStatus::Mirrored))
    }

    /// Marks the entry failed when the error is final; otherwise leaves it.
    async fn fail(&self, entry: &PendingWrite, err: &MarketError) -> Result<Step> {
        if !is_definite_failure(err) {
            tracing::warn!(ledger_id = %entry.id, error = %err, "transaction outcome unknown");
            return Ok(Step::Stop);
        }
        self.ledger.mark_failed(entry.id, &err.to_string()).await?;
        tracing::error!(ledger_id = %entry.id, error = %err, "pending write failed");
        Ok(Step::Moved(PendingStatus::Failed))
    }
}
