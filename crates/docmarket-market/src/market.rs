//! Marketplace operations: the two-step writes (chain, then metadata store)
//! and the reads behind each screen.
//!
//! Every upload and purchase is recorded in the pending-write ledger before
//! the first chain call, and the ledger is advanced as each step completes.
//! When the store write fails after the chain write succeeded, the caller
//! gets [`MarketError::MirrorFailed`] and the entry is left for the
//! [`Reconciler`](crate::reconcile::Reconciler).

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use alloy::rpc::types::TransactionReceipt;
use bigdecimal::BigDecimal;
use chrono::Utc;
use docmarket_core::{
    blob_object_path, content_type_for, normalize_address, sha256_hex, total_price, BuyForm, Cart,
    CartItem, UploadForm, ValidationError, MAX_AMOUNT,
};
use uuid::Uuid;

use crate::actions::{Action, ActionTracker};
use crate::blob::{self, BlobStore};
use crate::config::MarketConfig;
use crate::contract::units::{parse_units, price_to_wei, wei_to_price};
use crate::contract::{
    ContractCaller, OnchainDocument, PendingTx, RegistryContract, TokenContract, TokenInfo,
};
use crate::db;
use crate::error::{ChainError, MarketError, Result, StoreError};
use crate::models::{
    Document, NewDocument, NewPendingWrite, PendingStatus, PendingWriteKind, Purchase,
    PurchaseIntent,
};
use crate::reconcile::Reconciler;
use crate::store::{MetadataStore, PendingLedger, PgStore};
use crate::wallet::WalletGateway;

/// Result of a completed upload.
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub document: Document,
    pub register_tx: String,
    pub list_tx: String,
    pub ledger_id: Uuid,
}

/// Result of a completed purchase.
#[derive(Debug, Clone)]
pub struct PurchaseReceipt {
    pub purchase: Purchase,
    pub tx_hash: String,
    pub ledger_id: Uuid,
}

/// A cart line whose transaction may have gone through without being
/// recorded. It leaves the cart; the reconciler finishes the ledger entry.
#[derive(Debug, Clone)]
pub struct UnsettledLine {
    pub item: CartItem,
    pub ledger_id: Uuid,
    pub error: String,
}

/// Outcome of buying every line of a cart.
#[derive(Debug, Default)]
pub struct CheckoutReport {
    pub purchased: Vec<PurchaseReceipt>,
    /// Lines that stayed in the cart, with the error shown to the user.
    pub failed: Vec<(CartItem, String)>,
    pub unsettled: Vec<UnsettledLine>,
}

/// A purchase recorded in the ledger and ready to submit.
struct PurchasePlan {
    ledger_id: Uuid,
    intent: PurchaseIntent,
    seller: Address,
    value: U256,
}

/// True when the error means the chain step will never complete.
///
/// Transport failures and confirmation timeouts are left pending: the
/// transaction may still be mined.
pub(crate) fn is_definite_failure(err: &MarketError) -> bool {
    !matches!(
        err,
        MarketError::Chain(ChainError::Transport(_))
            | MarketError::Chain(ChainError::ConfirmationTimeout { .. })
    )
}

pub(crate) fn parse_address(value: &str) -> Result<Address> {
    let normalized = normalize_address(value)?;
    normalized
        .parse()
        .map_err(|_| ValidationError::InvalidAddress(value.to_string()).into())
}

pub struct Marketplace {
    wallet: Arc<WalletGateway>,
    registry: RegistryContract,
    token: TokenContract,
    store: Arc<dyn MetadataStore>,
    ledger: Arc<dyn PendingLedger>,
    blobs: Arc<dyn BlobStore>,
    actions: ActionTracker,
}

impl std::fmt::Debug for Marketplace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Marketplace")
            .field("registry", &self.registry.address())
            .field("token", &self.token.address())
            .finish()
    }
}

impl Marketplace {
    pub fn new(
        wallet: Arc<WalletGateway>,
        registry: RegistryContract,
        token: TokenContract,
        store: Arc<dyn MetadataStore>,
        ledger: Arc<dyn PendingLedger>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            wallet,
            registry,
            token,
            store,
            ledger,
            blobs,
            actions: ActionTracker::new(),
        }
    }

    /// Connects to Postgres, runs migrations and wires up the configured
    /// provider and blob backend.
    pub async fn from_config(config: &MarketConfig) -> Result<Self> {
        let pool = db::create_pool(&config.database_url).await?;
        db::run_migrations(&pool).await.map_err(StoreError::from)?;
        let store = Arc::new(PgStore::new(pool));

        let wallet = Arc::new(WalletGateway::from_config(config)?);
        Ok(Self::with_wallet(
            wallet,
            config,
            store.clone(),
            store,
            blob::from_backend(&config.blob),
        ))
    }

    /// Builds the contract wrappers for `wallet` from the configured addresses.
    pub fn with_wallet(
        wallet: Arc<WalletGateway>,
        config: &MarketConfig,
        store: Arc<dyn MetadataStore>,
        ledger: Arc<dyn PendingLedger>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        let caller = |address| {
            ContractCaller::new(
                wallet.clone(),
                address,
                config.poll_interval,
                config.confirm_timeout,
            )
        };
        let registry = RegistryContract::new(caller(config.registry_address));
        let token = TokenContract::new(caller(config.token_address));
        Self::new(wallet, registry, token, store, ledger, blobs)
    }

    pub fn wallet(&self) -> &Arc<WalletGateway> {
        &self.wallet
    }

    pub fn actions(&self) -> &ActionTracker {
        &self.actions
    }

    pub fn registry(&self) -> &RegistryContract {
        &self.registry
    }

    pub fn token(&self) -> &TokenContract {
        &self.token
    }

    pub fn ledger(&self) -> &Arc<dyn PendingLedger> {
        &self.ledger
    }

    /// A reconciler sharing this marketplace's contracts and stores.
    pub fn reconciler(&self, stale_after: Duration) -> Reconciler {
        Reconciler::new(
            self.registry.clone(),
            self.store.clone(),
            self.ledger.clone(),
            stale_after,
        )
    }

    async fn run<T, F>(&self, action: Action, work: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let guard = self.actions.begin(action)?;
        let outcome = work.await;
        guard.finish(&outcome);
        outcome
    }

    fn signer_address(&self) -> Result<Address> {
        Ok(self.wallet.signer()?.address)
    }

    // ----- listings -----

    /// Active documents, newest first.
    pub async fn listing(&self) -> Result<Vec<Document>> {
        Ok(self.store.list_active_documents().await?)
    }

    pub async fn search(&self, query: &str) -> Result<Vec<Document>> {
        Ok(self.store.search_documents(query).await?)
    }

    pub async fn document(&self, id: i64) -> Result<Document> {
        self.store
            .get_document(id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("document {}", id)))
    }

    /// Every document of the connected seller, active or not.
    pub async fn my_documents(&self) -> Result<Vec<Document>> {
        let account = self.wallet.account()?;
        Ok(self.store.documents_by_seller(&account).await?)
    }

    /// Hides a document from the listing. Returns the refreshed seller list.
    pub async fn deactivate(&self, id: i64) -> Result<Vec<Document>> {
        self.run(Action::Deactivate, self.set_active(id, false)).await
    }

    pub async fn activate(&self, id: i64) -> Result<Vec<Document>> {
        self.run(Action::Activate, self.set_active(id, true)).await
    }

    async fn set_active(&self, id: i64, active: bool) -> Result<Vec<Document>> {
        let account = self.wallet.account()?;
        if !self.store.set_document_active(id, &account, active).await? {
            return Err(MarketError::NotFound(format!(
                "document {} owned by {}",
                id, account
            )));
        }
        tracing::info!(doc_id = id, active, "document visibility changed");
        Ok(self.store.documents_by_seller(&account).await?)
    }

    /// Deletes the store row only; on-chain tokens are unaffected.
    pub async fn delete(&self, id: i64) -> Result<Vec<Document>> {
        self.run(Action::Delete, async {
            let account = self.wallet.account()?;
            if !self.store.delete_document(id, &account).await? {
                return Err(MarketError::NotFound(format!(
                    "document {} owned by {}",
                    id, account
                )));
            }
            tracing::info!(doc_id = id, "document deleted");
            Ok(self.store.documents_by_seller(&account).await?)
        })
        .await
    }

    pub async fn my_purchases(&self) -> Result<Vec<Purchase>> {
        let account = self.wallet.account()?;
        Ok(self.store.purchases_by_buyer(&account).await?)
    }

    /// Purchases of one of the connected seller's documents.
    pub async fn sales(&self, doc_id: i64) -> Result<Vec<Purchase>> {
        let account = self.wallet.account()?;
        let doc = self.document(doc_id).await?;
        if doc.seller != account {
            return Err(MarketError::NotFound(format!(
                "document {} owned by {}",
                doc_id, account
            )));
        }
        Ok(self.store.purchases_for_document(doc_id).await?)
    }

    // ----- upload -----

    /// Uploads the file, registers and lists it on-chain, then mirrors the row.
    pub async fn upload_document(&self, form: UploadForm, bytes: Vec<u8>) -> Result<UploadReceipt> {
        self.run(Action::Upload, self.upload_inner(form, bytes)).await
    }

    async fn upload_inner(&self, mut form: UploadForm, bytes: Vec<u8>) -> Result<UploadReceipt> {
        form.file_size = bytes.len() as u64;
        let valid = form.validate()?;
        let seller = self.wallet.account()?;
        self.signer_address()?;
        let price_wei = price_to_wei(&valid.price)?;

        let doc_id = Utc::now().timestamp_millis();
        let object_path = blob_object_path(doc_id, Utc::now().timestamp_millis(), &valid.file_name);
        let file_hash = sha256_hex(&bytes);
        let file_url = self
            .blobs
            .upload(&object_path, bytes, content_type_for(&valid.file_name))
            .await?;
        tracing::debug!(doc_id, %file_url, "file uploaded");

        let new_doc = NewDocument {
            id: doc_id,
            title: valid.title,
            description: valid.description,
            seller: seller.clone(),
            price_per_token: valid.price,
            amount: i64::try_from(valid.amount).map_err(|_| ValidationError::AmountTooLarge {
                amount: valid.amount,
                max: MAX_AMOUNT,
            })?,
            file_url,
            file_hash: Some(file_hash),
        };
        let entry = self
            .ledger
            .record(&NewPendingWrite::new(
                PendingWriteKind::Upload,
                doc_id,
                &seller,
                &new_doc,
            )?)
            .await?;

        let register = self
            .registry
            .register_document(
                doc_id as u64,
                valid.amount,
                &new_doc.title,
                &new_doc.file_url,
                &new_doc.description,
            )
            .await;
        let register_receipt = self.confirm(entry.id, register).await?;
        self.ledger
            .advance(entry.id, PendingStatus::Registered, None)
            .await?;

        let list = self
            .registry
            .list_document(doc_id as u64, valid.amount, price_wei)
            .await;
        let list_receipt = self.confirm(entry.id, list).await?;
        let register_tx = register_receipt.transaction_hash.to_string();
        let list_tx = list_receipt.transaction_hash.to_string();
        self.ledger
            .advance(entry.id, PendingStatus::ChainConfirmed, Some(&list_tx))
            .await?;

        let document = self.mirror_document(entry.id, &new_doc, &list_tx).await?;
        tracing::info!(
            doc_id,
            seller = %seller,
            %register_tx,
            %list_tx,
            "document uploaded"
        );

        Ok(UploadReceipt {
            document,
            register_tx,
            list_tx,
            ledger_id: entry.id,
        })
    }

    /// Records the submitted hash and waits for the receipt, marking the
    /// ledger entry failed when the step can no longer succeed.
    ///
    /// Once the provider has accepted the transaction only a reverted
    /// receipt closes the entry. Any other error while waiting leaves it
    /// pending for the reconciler.
    async fn confirm(
        &self,
        ledger_id: Uuid,
        submitted: Result<PendingTx>,
    ) -> Result<TransactionReceipt> {
        let pending = match submitted {
            Ok(pending) => pending,
            Err(e) => return Err(self.fail(ledger_id, e).await),
        };
        self.ledger
            .mark_submitted(ledger_id, pending.tx_hash())
            .await?;
        match pending.get_receipt().await {
            Ok(receipt) => Ok(receipt),
            Err(e @ MarketError::Chain(ChainError::Reverted { .. })) => {
                Err(self.fail(ledger_id, e).await)
            }
            Err(e) => {
                tracing::warn!(%ledger_id, error = %e, "transaction outcome unknown, left pending");
                Err(e)
            }
        }
    }

    async fn fail(&self, ledger_id: Uuid, err: MarketError) -> MarketError {
        if is_definite_failure(&err) {
            tracing::error!(%ledger_id, error = %err, "pending write failed");
            if let Err(ledger_err) = self.ledger.mark_failed(ledger_id, &err.to_string()).await {
                tracing::warn!(%ledger_id, error = %ledger_err, "could not mark pending write failed");
            }
        } else {
            tracing::warn!(%ledger_id, error = %err, "transaction outcome unknown, left pending");
        }
        err
    }

    async fn mirror_document(
        &self,
        ledger_id: Uuid,
        new_doc: &NewDocument,
        tx_hash: &str,
    ) -> Result<Document> {
        let document = match self.store.insert_document(new_doc).await {
            Ok(document) => document,
            Err(StoreError::Conflict(_)) => self.document(new_doc.id).await?,
            Err(e) => {
                tracing::warn!(%ledger_id, %tx_hash, error = %e, "document mirror failed");
                return Err(MarketError::MirrorFailed {
                    ledger_id,
                    tx_hash: tx_hash.to_string(),
                    reason: e.to_string(),
                });
            }
        };
        self.ledger
            .advance(ledger_id, PendingStatus::Mirrored, None)
            .await?;
        Ok(document)
    }

    // ----- purchase -----

    /// Buys `quantity` units of a listed document from its seller.
    pub async fn buy(&self, doc_id: i64, quantity: u64) -> Result<PurchaseReceipt> {
        self.run(Action::Buy, self.buy_inner(doc_id, quantity)).await
    }

    async fn buy_inner(&self, doc_id: i64, quantity: u64) -> Result<PurchaseReceipt> {
        let plan = self.plan_purchase(doc_id, quantity).await?;
        self.complete_purchase(&plan).await
    }

    /// Validates the purchase and records it in the ledger. Nothing has
    /// been sent to the chain when this fails.
    async fn plan_purchase(&self, doc_id: i64, quantity: u64) -> Result<PurchasePlan> {
        let buyer = self.wallet.account()?;
        self.signer_address()?;
        let doc = self.document(doc_id).await?;
        if !doc.is_active {
            return Err(MarketError::Unavailable(doc.title));
        }
        BuyForm {
            doc_id,
            quantity,
            available: doc.remaining(),
        }
        .validate()?;

        let seller = parse_address(&doc.seller)?;
        let value = price_to_wei(&doc.price_per_token)?.saturating_mul(U256::from(quantity));
        let intent = PurchaseIntent {
            doc_id,
            buyer: buyer.clone(),
            seller: doc.seller.clone(),
            quantity,
            total_price: total_price(&doc.price_per_token, quantity),
        };
        let entry = self
            .ledger
            .record(&NewPendingWrite::new(
                PendingWriteKind::Purchase,
                doc_id,
                &buyer,
                &intent,
            )?)
            .await?;

        Ok(PurchasePlan {
            ledger_id: entry.id,
            intent,
            seller,
            value,
        })
    }

    async fn complete_purchase(&self, plan: &PurchasePlan) -> Result<PurchaseReceipt> {
        let intent = &plan.intent;
        let submitted = self
            .registry
            .buy_document(intent.doc_id as u64, plan.seller, intent.quantity, plan.value)
            .await;
        let receipt = self.confirm(plan.ledger_id, submitted).await?;
        let tx_hash = receipt.transaction_hash.to_string();
        self.ledger
            .advance(plan.ledger_id, PendingStatus::ChainConfirmed, None)
            .await?;

        let purchase = self.mirror_purchase(plan.ledger_id, intent, &tx_hash).await?;
        tracing::info!(
            doc_id = intent.doc_id,
            buyer = %intent.buyer,
            quantity = intent.quantity,
            %tx_hash,
            "document purchased"
        );

        Ok(PurchaseReceipt {
            purchase,
            tx_hash,
            ledger_id: plan.ledger_id,
        })
    }

    /// True when the ledger shows the purchase can no longer reach the chain.
    async fn purchase_closed(&self, ledger_id: Uuid) -> bool {
        match self.ledger.get_pending(ledger_id).await {
            Ok(Some(entry)) => entry.status == PendingStatus::Failed,
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(%ledger_id, error = %e, "could not read pending write");
                false
            }
        }
    }

    async fn mirror_purchase(
        &self,
        ledger_id: Uuid,
        intent: &PurchaseIntent,
        tx_hash: &str,
    ) -> Result<Purchase> {
        let new_purchase = intent.to_new_purchase(ledger_id, tx_hash);
        let purchase = match self.store.insert_purchase(&new_purchase).await {
            Ok(purchase) => purchase,
            Err(StoreError::Conflict(_)) => new_purchase.into_purchase(Utc::now()),
            Err(e) => {
                tracing::warn!(%ledger_id, %tx_hash, error = %e, "purchase mirror failed");
                return Err(MarketError::MirrorFailed {
                    ledger_id,
                    tx_hash: tx_hash.to_string(),
                    reason: e.to_string(),
                });
            }
        };
        self.ledger
            .advance(ledger_id, PendingStatus::Mirrored, None)
            .await?;
        Ok(purchase)
    }

    /// Buys every cart line in order.
    ///
    /// Bought lines leave the cart. Lines that failed before reaching the
    /// chain, or whose transaction was rejected or reverted, stay and are
    /// reported with their error. A line whose transaction may have been
    /// mined leaves the cart too and is reported as unsettled, so running
    /// checkout again never pays for it twice.
    pub async fn checkout(&self, cart: &mut Cart) -> Result<CheckoutReport> {
        let guard = self.actions.begin(Action::Checkout)?;
        let mut report = CheckoutReport::default();
        for item in cart.items().to_vec() {
            let plan = match self.plan_purchase(item.doc_id, item.quantity).await {
                Ok(plan) => plan,
                Err(e) => {
                    tracing::warn!(doc_id = item.doc_id, error = %e, "checkout line failed");
                    report.failed.push((item, e.to_string()));
                    continue;
                }
            };
            match self.complete_purchase(&plan).await {
                Ok(receipt) => {
                    cart.remove(item.doc_id);
                    report.purchased.push(receipt);
                }
                Err(e) if self.purchase_closed(plan.ledger_id).await => {
                    tracing::warn!(doc_id = item.doc_id, error = %e, "checkout line failed");
                    report.failed.push((item, e.to_string()));
                }
                Err(e) => {
                    tracing::warn!(
                        doc_id = item.doc_id,
                        ledger_id = %plan.ledger_id,
                        error = %e,
                        "checkout line unsettled"
                    );
                    cart.remove(item.doc_id);
                    report.unsettled.push(UnsettledLine {
                        item,
                        ledger_id: plan.ledger_id,
                        error: e.to_string(),
                    });
                }
            }
        }
        let outcome = Ok(report);
        guard.finish(&outcome);
        outcome
    }

    // ----- on-chain reads -----

    pub async fn onchain_document(&self, id: u64) -> Result<OnchainDocument> {
        self.registry.document_info(id).await
    }

    /// Listing price per unit in the native currency.
    pub async fn onchain_price(&self, id: u64, seller: &str) -> Result<BigDecimal> {
        let wei = self.registry.price(id, parse_address(seller)?).await?;
        Ok(wei_to_price(wei))
    }

    /// Units of document `id` held by `account` (the connected account when `None`).
    pub async fn holdings(&self, id: u64, account: Option<&str>) -> Result<U256> {
        let account = match account {
            Some(a) => parse_address(a)?,
            None => self.signer_address()?,
        };
        self.registry.balance_of(account, id).await
    }

    pub async fn set_approval_for_all(&self, operator: &str, approved: bool) -> Result<TransactionReceipt> {
        self.run(Action::SetApproval, async {
            let operator = parse_address(operator)?;
            let receipt = self.registry.set_approval_for_all(operator, approved).await?;
            tracing::info!(%operator, approved, tx_hash = %receipt.transaction_hash, "operator approval set");
            Ok(receipt)
        })
        .await
    }

    pub async fn native_balance(&self) -> Result<U256> {
        self.wallet.balance(None).await
    }

    // ----- airdrop -----

    /// Claims the airdrop for the connected account. A second claim reverts.
    pub async fn request_airdrop(&self) -> Result<TransactionReceipt> {
        self.run(Action::Airdrop, async {
            self.signer_address()?;
            let receipt = self.registry.request_airdrop().await?;
            tracing::info!(tx_hash = %receipt.transaction_hash, "airdrop received");
            Ok(receipt)
        })
        .await
    }

    pub async fn airdrop_status(&self, account: Option<&str>) -> Result<bool> {
        let account = match account {
            Some(a) => parse_address(a)?,
            None => self.signer_address()?,
        };
        self.registry.airdrop_status(account).await
    }

    pub async fn airdrop_amount(&self) -> Result<U256> {
        self.registry.airdrop_amount().await
    }

    /// Owner only. `amount` is in whole tokens, scaled by the token's decimals.
    pub async fn set_airdrop_amount(&self, amount: &str) -> Result<TransactionReceipt> {
        self.run(Action::SetAirdropAmount, async {
            let decimals = self.token.decimals().await?;
            let amount = parse_units(amount, decimals)?;
            let receipt = self.registry.set_airdrop_amount(amount).await?;
            tracing::info!(%amount, tx_hash = %receipt.transaction_hash, "airdrop amount updated");
            Ok(receipt)
        })
        .await
    }

    // ----- token -----

    pub async fn token_info(&self) -> Result<TokenInfo> {
        self.token.info().await
    }

    pub async fn token_balance(&self, account: Option<&str>) -> Result<U256> {
        let account = match account {
            Some(a) => parse_address(a)?,
            None => self.signer_address()?,
        };
        self.token.balance_of(account).await
    }

    pub async fn token_allowance(&self, owner: &str, spender: &str) -> Result<U256> {
        self.token
            .allowance(parse_address(owner)?, parse_address(spender)?)
            .await
    }

    pub async fn approve(&self, spender: &str, amount: &str) -> Result<TransactionReceipt> {
        self.run(Action::Approve, async {
            let spender = parse_address(spender)?;
            let value = parse_units(amount, self.token.decimals().await?)?;
            let receipt = self.token.approve(spender, value).await?;
            tracing::info!(%spender, %value, tx_hash = %receipt.transaction_hash, "allowance approved");
            Ok(receipt)
        })
        .await
    }

    pub async fn transfer(&self, to: &str, amount: &str) -> Result<TransactionReceipt> {
        self.run(Action::Transfer, async {
            let to = parse_address(to)?;
            let value = parse_units(amount, self.token.decimals().await?)?;
            let receipt = self.token.transfer(to, value).await?;
            tracing::info!(%to, %value, tx_hash = %receipt.transaction_hash, "tokens transferred");
            Ok(receipt)
        })
        .await
    }

    pub async fn transfer_from(&self, from: &str, to: &str, amount: &str) -> Result<TransactionReceipt> {
        self.run(Action::Transfer, async {
            let from = parse_address(from)?;
            let to = parse_address(to)?;
            let value = parse_units(amount, self.token.decimals().await?)?;
            let receipt = self.token.transfer_from(from, to, value).await?;
            tracing::info!(%from, %to, %value, tx_hash = %receipt.transaction_hash, "tokens transferred");
            Ok(receipt)
        })
        .await
    }
}
