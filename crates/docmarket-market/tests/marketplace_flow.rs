//! End-to-end marketplace flows against the in-process chain.
//!
//! Each test wires a `Marketplace` to a `SimulatedChain` provider, an
//! in-memory metadata store and a blob directory in a tempdir, then drives
//! it the way the CLI does.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use docmarket_core::{Cart, UploadForm, MAX_AMOUNT, SEPOLIA_CHAIN_ID, SEPOLIA_CHAIN_ID_HEX};
use docmarket_market::blob;
use docmarket_market::models::{
    Document, NewDocument, NewPendingWrite, NewPurchase, PendingStatus, PendingWriteKind, Purchase,
};
use docmarket_market::store::{MetadataStore, PendingLedger, StoreResult};
use docmarket_market::wallet::{Eip1193Provider, WalletEvent};
use docmarket_market::{
    Action, BlobBackend, ChainError, MarketConfig, MarketError, Marketplace, MemoryStore,
    SimulatedChain, StoreError, WalletError, WalletGateway,
};
use std::str::FromStr;
use tempfile::TempDir;
use uuid::Uuid;

const PUBLIC_BASE: &str = "https://files.docmarket.test";

fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

fn seller() -> Address {
    addr(0xaa)
}

fn buyer() -> Address {
    addr(0xbb)
}

fn ether(n: u64) -> U256 {
    U256::from(n) * U256::from(10u64).pow(U256::from(18u64))
}

fn lower(address: Address) -> String {
    address.to_string().to_lowercase()
}

struct Harness {
    sim: Arc<SimulatedChain>,
    store: Arc<MemoryStore>,
    market: Marketplace,
    _blob_dir: TempDir,
}

fn test_config(blob_dir: &TempDir) -> MarketConfig {
    MarketConfig {
        registry_address: addr(0x10),
        token_address: addr(0x20),
        provider_url: None,
        database_url: String::new(),
        blob: BlobBackend::Local {
            dir: blob_dir.path().to_path_buf(),
            public_base_url: PUBLIC_BASE.to_string(),
        },
        expected_chain: SEPOLIA_CHAIN_ID_HEX.to_string(),
        poll_interval: Duration::from_millis(5),
        confirm_timeout: Some(Duration::from_millis(300)),
        stale_after: Duration::from_secs(900),
    }
}

/// Marketplace with the seller connected.
async fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    harness_with(store.clone(), store).await
}

/// Same as [`harness`], with `metadata` serving documents and purchases
/// while `store` keeps the ledger.
async fn harness_with(metadata: Arc<dyn MetadataStore>, store: Arc<MemoryStore>) -> Harness {
    let blob_dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(&blob_dir);
    let sim = Arc::new(SimulatedChain::new(
        config.registry_address,
        config.token_address,
        seller(),
    ));
    let provider: Arc<dyn Eip1193Provider> = sim.clone();
    let wallet = Arc::new(WalletGateway::new(Some(provider), SEPOLIA_CHAIN_ID_HEX));
    let market = Marketplace::with_wallet(
        wallet,
        &config,
        metadata,
        store.clone(),
        blob::from_backend(&config.blob),
    );
    market.wallet().connect().await.expect("seller connects");

    Harness {
        sim,
        store,
        market,
        _blob_dir: blob_dir,
    }
}

/// Memory store whose purchase inserts fail while `down` is set.
struct PurchaseOutage {
    inner: Arc<MemoryStore>,
    down: AtomicBool,
}

impl PurchaseOutage {
    fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            down: AtomicBool::new(false),
        }
    }

    fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl MetadataStore for PurchaseOutage {
    async fn list_active_documents(&self) -> StoreResult<Vec<Document>> {
        self.inner.list_active_documents().await
    }

    async fn search_documents(&self, query: &str) -> StoreResult<Vec<Document>> {
        self.inner.search_documents(query).await
    }

    async fn get_document(&self, id: i64) -> StoreResult<Option<Document>> {
        self.inner.get_document(id).await
    }

    async fn documents_by_seller(&self, seller: &str) -> StoreResult<Vec<Document>> {
        self.inner.documents_by_seller(seller).await
    }

    async fn insert_document(&self, doc: &NewDocument) -> StoreResult<Document> {
        self.inner.insert_document(doc).await
    }

    async fn set_document_active(&self, id: i64, seller: &str, active: bool) -> StoreResult<bool> {
        self.inner.set_document_active(id, seller, active).await
    }

    async fn delete_document(&self, id: i64, seller: &str) -> StoreResult<bool> {
        self.inner.delete_document(id, seller).await
    }

    async fn insert_purchase(&self, purchase: &NewPurchase) -> StoreResult<Purchase> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("purchases table locked".to_string()));
        }
        self.inner.insert_purchase(purchase).await
    }

    async fn purchases_by_buyer(&self, buyer: &str) -> StoreResult<Vec<Purchase>> {
        self.inner.purchases_by_buyer(buyer).await
    }

    async fn purchases_for_document(&self, doc_id: i64) -> StoreResult<Vec<Purchase>> {
        self.inner.purchases_for_document(doc_id).await
    }
}

fn guide_form() -> UploadForm {
    UploadForm {
        title: "Guide".to_string(),
        description: "A field guide".to_string(),
        price: "0.01".to_string(),
        amount: 1,
        file_name: "guide.pdf".to_string(),
        file_size: 0,
    }
}

fn form(title: &str, price: &str, amount: u64) -> UploadForm {
    UploadForm {
        title: title.to_string(),
        description: format!("About {}", title),
        price: price.to_string(),
        amount,
        file_name: format!("{}.txt", title.to_lowercase()),
        file_size: 0,
    }
}

/// Uploads and waits a tick so the next upload gets a different id.
async fn upload(h: &Harness, form: UploadForm) -> i64 {
    let receipt = h
        .market
        .upload_document(form, b"document body".to_vec())
        .await
        .expect("upload succeeds");
    tokio::time::sleep(Duration::from_millis(3)).await;
    receipt.document.id
}

async fn switch_to_buyer(h: &Harness) {
    h.sim.set_accounts(vec![buyer()]);
    h.sim.fund(buyer(), ether(1));
    h.market.wallet().connect().await.expect("buyer connects");
}

#[tokio::test]
async fn test_upload_registers_lists_and_mirrors() {
    let h = harness().await;
    let bytes = vec![7u8; 10 * 1024];

    let receipt = h
        .market
        .upload_document(guide_form(), bytes.clone())
        .await
        .unwrap();
    let doc = &receipt.document;

    assert_eq!(doc.title, "Guide");
    assert_eq!(doc.seller, lower(seller()));
    assert_eq!(doc.amount, 1);
    assert_eq!(doc.price_per_token, BigDecimal::from_str("0.01").unwrap());
    assert!(doc.is_active);
    assert_ne!(receipt.register_tx, receipt.list_tx);

    // The stored row is what the listing shows.
    let listing = h.market.listing().await.unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].id, doc.id);

    // The file URL points at a readable object with the uploaded bytes.
    let path = doc
        .file_url
        .strip_prefix(&format!("{}/", PUBLIC_BASE))
        .expect("url under public base");
    assert!(path.starts_with(&format!("documents/{}-", doc.id)));
    assert!(path.ends_with(".pdf"));
    let blobs = blob::from_backend(&test_config(&h._blob_dir).blob);
    assert_eq!(blobs.download(path).await.unwrap(), bytes);
    assert_eq!(
        doc.file_hash.as_deref(),
        Some(docmarket_core::sha256_hex(&bytes).as_str())
    );

    // On-chain: the seller holds the single unit and has it listed at 0.01 ether.
    let id = doc.id as u64;
    assert_eq!(h.sim.holding(seller(), id), U256::from(1));
    assert_eq!(
        h.sim.listing(id, seller()),
        Some((U256::from(1), U256::from(10_000_000_000_000_000u64)))
    );
    let onchain = h.market.onchain_document(id).await.unwrap();
    assert_eq!(onchain.title, "Guide");
    assert_eq!(
        h.market.onchain_price(id, &doc.seller).await.unwrap(),
        BigDecimal::from_str("0.01").unwrap()
    );

    let entry = h
        .market
        .ledger()
        .get_pending(receipt.ledger_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.status, PendingStatus::Mirrored);
    assert!(h.market.ledger().unsettled().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_upload_validation_happens_before_any_write() {
    let h = harness().await;

    let mut no_title = guide_form();
    no_title.title = "  ".to_string();
    let err = h
        .market
        .upload_document(no_title, vec![1])
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Validation(_)));

    let err = h
        .market
        .upload_document(guide_form(), Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Validation(_)));

    // Amounts past the store's signed column are refused, not truncated.
    let mut huge = guide_form();
    huge.amount = MAX_AMOUNT + 1;
    let err = h
        .market
        .upload_document(huge, vec![1])
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Validation(_)));

    assert_eq!(h.sim.transaction_count(), 0);
    assert!(h.market.listing().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_buy_pays_seller_and_records_purchase() {
    let h = harness().await;
    let doc_id = upload(&h, form("Atlas", "0.25", 4)).await;

    switch_to_buyer(&h).await;
    let receipt = h.market.buy(doc_id, 3).await.unwrap();

    assert_eq!(receipt.purchase.doc_id, doc_id);
    assert_eq!(receipt.purchase.buyer, lower(buyer()));
    assert_eq!(receipt.purchase.quantity, 3);
    assert_eq!(receipt.purchase.total_price, BigDecimal::from_str("0.75").unwrap());
    assert_eq!(receipt.purchase.tx_hash, receipt.tx_hash);

    let paid = U256::from(750_000_000_000_000_000u64);
    assert_eq!(h.sim.native_balance(seller()), paid);
    assert_eq!(h.sim.native_balance(buyer()), ether(1) - paid);
    assert_eq!(h.sim.holding(buyer(), doc_id as u64), U256::from(3));
    assert_eq!(
        h.market.holdings(doc_id as u64, None).await.unwrap(),
        U256::from(3)
    );

    let mine = h.market.my_purchases().await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].id, receipt.ledger_id);

    // Only the seller sees the sales of a document.
    assert!(matches!(
        h.market.sales(doc_id).await,
        Err(MarketError::NotFound(_))
    ));
    h.sim.set_accounts(vec![seller()]);
    h.market.wallet().connect().await.unwrap();
    assert_eq!(h.market.sales(doc_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_buy_rejections() {
    let h = harness().await;
    let doc_id = upload(&h, form("Atlas", "0.25", 2)).await;
    switch_to_buyer(&h).await;

    let err = h.market.buy(doc_id, 0).await.unwrap_err();
    assert!(matches!(err, MarketError::Validation(_)));

    let err = h.market.buy(doc_id, 3).await.unwrap_err();
    assert!(matches!(err, MarketError::Validation(_)));

    let err = h.market.buy(424242, 1).await.unwrap_err();
    assert!(matches!(err, MarketError::NotFound(_)));

    // A declined signature fails the ledger entry and writes no purchase.
    h.sim.reject_transactions(true);
    let err = h.market.buy(doc_id, 1).await.unwrap_err();
    assert!(matches!(err, MarketError::Chain(ref e) if e.is_user_rejection()));
    assert!(h.market.my_purchases().await.unwrap().is_empty());
    assert!(h.market.ledger().unsettled().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_deactivated_documents_leave_listing_and_search() {
    let h = harness().await;
    let first = upload(&h, form("Alpha", "0.1", 1)).await;
    let second = upload(&h, form("Beta", "0.2", 1)).await;

    let listing = h.market.listing().await.unwrap();
    assert_eq!(
        listing.iter().map(|d| d.id).collect::<Vec<_>>(),
        vec![second, first]
    );

    let mine = h.market.deactivate(first).await.unwrap();
    assert_eq!(mine.len(), 2);
    assert!(!mine.iter().find(|d| d.id == first).unwrap().is_active);

    let listing = h.market.listing().await.unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].id, second);
    assert!(h.market.search("alpha").await.unwrap().is_empty());

    // Inactive documents cannot be bought.
    switch_to_buyer(&h).await;
    assert!(matches!(
        h.market.buy(first, 1).await,
        Err(MarketError::Unavailable(_))
    ));

    // Only the seller may reactivate or delete.
    assert!(matches!(
        h.market.activate(first).await,
        Err(MarketError::NotFound(_))
    ));
    h.sim.set_accounts(vec![seller()]);
    h.market.wallet().connect().await.unwrap();
    h.market.activate(first).await.unwrap();
    assert_eq!(h.market.listing().await.unwrap().len(), 2);

    let remaining = h.market.delete(second).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert!(matches!(
        h.market.document(second).await,
        Err(MarketError::NotFound(_))
    ));
    // Deleting the row leaves the on-chain units alone.
    assert_eq!(h.sim.holding(seller(), second as u64), U256::from(1));
}

#[tokio::test]
async fn test_empty_search_matches_listing() {
    let h = harness().await;
    upload(&h, form("Rust Handbook", "0.1", 1)).await;
    upload(&h, form("Cookbook", "0.2", 1)).await;

    let listing = h.market.listing().await.unwrap();
    assert_eq!(h.market.search("").await.unwrap(), listing);
    assert_eq!(h.market.search("   ").await.unwrap(), listing);

    let hits = h.market.search("HANDBOOK").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].title, "Rust Handbook");

    // Matches in the description count too.
    assert_eq!(h.market.search("about cook").await.unwrap().len(), 1);
    assert!(h.market.search("100%").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_store_accepts_purchase_with_mismatched_total() {
    let h = harness().await;
    let doc_id = upload(&h, form("Atlas", "0.25", 2)).await;

    let purchase = h
        .store
        .insert_purchase(&NewPurchase {
            id: Uuid::new_v4(),
            doc_id,
            buyer: lower(buyer()),
            quantity: 2,
            total_price: BigDecimal::from_str("0.1").unwrap(),
            tx_hash: "0x01".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(purchase.total_price, BigDecimal::from_str("0.1").unwrap());
    assert_eq!(h.store.purchases_for_document(doc_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_second_airdrop_reverts_with_contract_message() {
    let h = harness().await;
    assert!(!h.market.airdrop_status(None).await.unwrap());

    h.market.request_airdrop().await.unwrap();
    assert!(h.market.airdrop_status(None).await.unwrap());
    assert_eq!(h.market.token_balance(None).await.unwrap(), ether(100));

    let err = h.market.request_airdrop().await.unwrap_err();
    assert_eq!(err.to_string(), "execution reverted: Already received airdrop");
    assert_eq!(h.market.token_balance(None).await.unwrap(), ether(100));
}

#[tokio::test]
async fn test_airdrop_amount_is_owner_only() {
    let h = harness().await;
    assert_eq!(h.market.airdrop_amount().await.unwrap(), ether(100));

    h.market.set_airdrop_amount("25").await.unwrap();
    assert_eq!(h.market.airdrop_amount().await.unwrap(), ether(25));

    switch_to_buyer(&h).await;
    let err = h.market.set_airdrop_amount("1000").await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "execution reverted: Ownable: caller is not the owner"
    );

    h.market.request_airdrop().await.unwrap();
    assert_eq!(h.market.token_balance(None).await.unwrap(), ether(25));
}

#[tokio::test]
async fn test_connect_without_accounts_or_provider() {
    let h = harness().await;

    h.sim.set_accounts(Vec::new());
    let err = h.market.wallet().connect().await.unwrap_err();
    assert!(matches!(err, MarketError::Wallet(WalletError::NoAccount)));

    h.sim.set_accounts(vec![seller()]);
    h.sim.reject_connections(true);
    let err = h.market.wallet().connect().await.unwrap_err();
    assert!(matches!(err, MarketError::Wallet(WalletError::NoAccount)));

    let no_provider = WalletGateway::new(None, SEPOLIA_CHAIN_ID_HEX);
    let err = no_provider.connect().await.unwrap_err();
    assert!(matches!(err, MarketError::Wallet(WalletError::NoProvider)));
}

#[tokio::test]
async fn test_writes_require_a_connected_wallet() {
    let h = harness().await;
    h.market.wallet().disconnect();

    let err = h
        .market
        .upload_document(guide_form(), vec![1, 2, 3])
        .await
        .unwrap_err();
    assert!(matches!(err, MarketError::Wallet(WalletError::NotConnected)));
    assert!(matches!(
        h.market.request_airdrop().await,
        Err(MarketError::Wallet(WalletError::NotConnected))
    ));
    assert_eq!(h.sim.transaction_count(), 0);

    // Reads that need no account still work.
    assert!(h.market.listing().await.unwrap().is_empty());
    assert_eq!(h.market.token_info().await.unwrap().symbol, "DMT");
}

#[tokio::test]
async fn test_mirror_failure_is_reconciled() {
    let h = harness().await;
    h.store.set_offline(true);

    let err = h
        .market
        .upload_document(guide_form(), b"pdf bytes".to_vec())
        .await
        .unwrap_err();
    let (ledger_id, tx_hash) = match err {
        MarketError::MirrorFailed {
            ledger_id, tx_hash, ..
        } => (ledger_id, tx_hash),
        other => panic!("expected MirrorFailed, got {:?}", other),
    };

    // The chain side is done.
    let entry = h.market.ledger().get_pending(ledger_id).await.unwrap().unwrap();
    assert_eq!(entry.status, PendingStatus::ChainConfirmed);
    assert_eq!(entry.tx_hash.as_deref(), Some(tx_hash.as_str()));
    assert_eq!(h.sim.holding(seller(), entry.doc_id as u64), U256::from(1));

    // Still offline: the reconciler leaves the entry for later.
    let reconciler = h.market.reconciler(Duration::from_secs(900));
    let report = reconciler.run_once().await.unwrap();
    assert_eq!(report.untouched, 1);
    assert!(!report.changed_anything());

    h.store.set_offline(false);
    let report = reconciler.run_once().await.unwrap();
    assert_eq!(report.mirrored, 1);

    let listing = h.market.listing().await.unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].id, entry.doc_id);
    assert_eq!(listing[0].title, "Guide");

    let entry = h.market.ledger().get_pending(ledger_id).await.unwrap().unwrap();
    assert_eq!(entry.status, PendingStatus::Mirrored);
    assert_eq!(reconciler.run_once().await.unwrap().total(), 0);
}

#[tokio::test]
async fn test_reconciler_finishes_purchase_once_mined() {
    let h = harness().await;
    let doc_id = upload(&h, form("Atlas", "0.25", 2)).await;
    switch_to_buyer(&h).await;

    // Submitted but not mined before the confirmation timeout.
    h.sim.hold_receipts(true);
    let err = h.market.buy(doc_id, 1).await.unwrap_err();
    assert!(matches!(
        err,
        MarketError::Chain(ChainError::ConfirmationTimeout { .. })
    ));
    assert!(h.market.my_purchases().await.unwrap().is_empty());

    let reconciler = h.market.reconciler(Duration::from_secs(900));
    let report = reconciler.run_once().await.unwrap();
    assert_eq!(report.untouched, 1);

    h.sim.hold_receipts(false);
    assert_eq!(h.sim.release_receipts(), 1);
    let report = reconciler.run_once().await.unwrap();
    assert_eq!(report.mirrored, 1);

    let purchases = h.market.my_purchases().await.unwrap();
    assert_eq!(purchases.len(), 1);
    assert_eq!(purchases[0].quantity, 1);
    assert_eq!(purchases[0].total_price, BigDecimal::from_str("0.25").unwrap());
    assert_eq!(h.sim.holding(buyer(), doc_id as u64), U256::from(1));
}

#[tokio::test]
async fn test_rejected_submission_is_closed_immediately() {
    let h = harness().await;
    let doc_id = upload(&h, form("Atlas", "0.25", 2)).await;

    // An unfunded account: the provider refuses the transaction.
    let broke = addr(0xcc);
    h.sim.set_accounts(vec![broke]);
    h.market
        .wallet()
        .apply_event(WalletEvent::AccountsChanged(vec![lower(broke)]));
    assert_eq!(h.market.wallet().account().unwrap(), lower(broke));

    let err = h.market.buy(doc_id, 1).await.unwrap_err();
    assert!(matches!(
        err,
        MarketError::Chain(ChainError::Rpc { code: -32000, .. })
    ));

    let report = h
        .market
        .reconciler(Duration::ZERO)
        .run_once()
        .await
        .unwrap();
    assert_eq!(report.total(), 0);
}

#[tokio::test]
async fn test_busy_action_is_refused() {
    let h = harness().await;
    let doc_id = upload(&h, form("Atlas", "0.25", 2)).await;

    let guard = h.market.actions().begin(Action::Buy).unwrap();
    let err = h.market.buy(doc_id, 1).await.unwrap_err();
    assert!(matches!(err, MarketError::Busy(Action::Buy)));
    assert_eq!(err.to_string(), "buy is already in progress");

    // Other actions are not blocked.
    h.market.deactivate(doc_id).await.unwrap();
    drop(guard);
    h.market.activate(doc_id).await.unwrap();
}

#[tokio::test]
async fn test_checkout_keeps_failed_lines() {
    let h = harness().await;
    let cheap = upload(&h, form("Cheap", "0.1", 5)).await;
    let gone = upload(&h, form("Gone", "0.1", 5)).await;
    let scarce = upload(&h, form("Scarce", "0.1", 1)).await;

    let mut cart = Cart::new();
    for doc in h.market.listing().await.unwrap() {
        let quantity = if doc.id == scarce { 2 } else { 1 };
        cart.add(doc.to_cart_item(quantity));
    }
    h.market.delete(gone).await.unwrap();

    switch_to_buyer(&h).await;
    let report = h.market.checkout(&mut cart).await.unwrap();

    assert_eq!(report.purchased.len(), 1);
    assert_eq!(report.purchased[0].purchase.doc_id, cheap);
    let failed: Vec<i64> = report.failed.iter().map(|(item, _)| item.doc_id).collect();
    assert_eq!(failed.len(), 2);
    assert!(failed.contains(&gone));
    assert!(failed.contains(&scarce));

    assert_eq!(cart.len(), 2);
    assert!(cart.get(cheap).is_none());
    assert_eq!(cart.get(scarce).unwrap().quantity, 2);
}

#[tokio::test]
async fn test_token_approve_and_transfer_from() {
    let h = harness().await;
    h.market.request_airdrop().await.unwrap();

    let info = h.market.token_info().await.unwrap();
    assert_eq!(info.decimals, 18);
    assert_eq!(info.format(ether(100)), "100 DMT");

    let spender = lower(buyer());
    let owner = lower(seller());
    h.market.approve(&spender, "10").await.unwrap();
    assert_eq!(
        h.market.token_allowance(&owner, &spender).await.unwrap(),
        ether(10)
    );

    h.market.transfer(&lower(addr(0xcc)), "1.5").await.unwrap();
    assert_eq!(
        h.sim.token_balance(addr(0xcc)),
        U256::from(1_500_000_000_000_000_000u64)
    );

    switch_to_buyer(&h).await;
    h.market
        .transfer_from(&owner, &spender, "4")
        .await
        .unwrap();
    assert_eq!(h.sim.token_balance(buyer()), ether(4));
    assert_eq!(
        h.market.token_allowance(&owner, &spender).await.unwrap(),
        ether(6)
    );

    let err = h
        .market
        .transfer_from(&owner, &spender, "7")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "execution reverted: ERC20: insufficient allowance");
}

#[tokio::test]
async fn test_switch_to_expected_chain_adds_unknown_chain() {
    let h = harness().await;
    h.sim.set_chain_id(1);
    h.sim.forget_chain(SEPOLIA_CHAIN_ID);
    h.market
        .wallet()
        .apply_event(WalletEvent::ChainChanged("0x1".to_string()));

    let session = h.market.wallet().session().unwrap();
    assert_eq!(session.chain_id, "0x1");
    assert!(h.market.wallet().chain_warning(&session.chain_id).is_some());

    let mut events = h.market.wallet().subscribe();
    h.market.wallet().switch_to_expected_chain().await.unwrap();

    assert_eq!(h.sim.chain_id(), SEPOLIA_CHAIN_ID);
    let session = h.market.wallet().session().unwrap();
    assert_eq!(session.chain_id, SEPOLIA_CHAIN_ID_HEX);
    assert!(h.market.wallet().chain_warning(&session.chain_id).is_none());
    assert_eq!(
        events.recv().await.unwrap(),
        WalletEvent::ChainChanged(SEPOLIA_CHAIN_ID_HEX.to_string())
    );
}

#[tokio::test]
async fn test_operator_approval() {
    let h = harness().await;
    let operator = lower(addr(0xdd));
    h.market.set_approval_for_all(&operator, true).await.unwrap();
    assert!(h
        .market
        .registry()
        .is_approved_for_all(seller(), addr(0xdd))
        .await
        .unwrap());

    h.market.set_approval_for_all(&operator, false).await.unwrap();
    assert!(!h
        .market
        .registry()
        .is_approved_for_all(seller(), addr(0xdd))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_checkout_drops_line_whose_confirmation_timed_out() {
    let h = harness().await;
    let doc_id = upload(&h, form("Atlas", "0.25", 2)).await;
    let mut cart = Cart::new();
    cart.add(h.market.listing().await.unwrap()[0].to_cart_item(1));
    switch_to_buyer(&h).await;

    h.sim.hold_receipts(true);
    let report = h.market.checkout(&mut cart).await.unwrap();
    assert!(report.purchased.is_empty());
    assert!(report.failed.is_empty());
    assert_eq!(report.unsettled.len(), 1);
    assert_eq!(report.unsettled[0].item.doc_id, doc_id);
    assert!(cart.is_empty());

    let entry = h
        .market
        .ledger()
        .get_pending(report.unsettled[0].ledger_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.status, PendingStatus::Pending);
    assert!(entry.tx_hash.is_some());

    // The transaction lands later; a second checkout does not pay again.
    h.sim.hold_receipts(false);
    assert_eq!(h.sim.release_receipts(), 1);
    let sent = h.sim.transaction_count();
    let report = h.market.checkout(&mut cart).await.unwrap();
    assert!(report.purchased.is_empty());
    assert_eq!(h.sim.transaction_count(), sent);

    let report = h
        .market
        .reconciler(Duration::from_secs(900))
        .run_once()
        .await
        .unwrap();
    assert_eq!(report.mirrored, 1);
    assert_eq!(h.sim.holding(buyer(), doc_id as u64), U256::from(1));
    assert_eq!(h.market.my_purchases().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_checkout_drops_line_whose_mirror_failed() {
    let memory = Arc::new(MemoryStore::new());
    let outage = Arc::new(PurchaseOutage::new(memory.clone()));
    let h = harness_with(outage.clone(), memory).await;
    let doc_id = upload(&h, form("Atlas", "0.25", 2)).await;
    let mut cart = Cart::new();
    cart.add(h.market.listing().await.unwrap()[0].to_cart_item(1));
    switch_to_buyer(&h).await;

    outage.set_down(true);
    let report = h.market.checkout(&mut cart).await.unwrap();
    assert!(report.purchased.is_empty());
    assert!(report.failed.is_empty());
    assert_eq!(report.unsettled.len(), 1);
    assert!(report.unsettled[0].error.contains("docmarket reconcile"));
    assert!(cart.is_empty());
    assert_eq!(h.sim.holding(buyer(), doc_id as u64), U256::from(1));

    let entry = h
        .market
        .ledger()
        .get_pending(report.unsettled[0].ledger_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.status, PendingStatus::ChainConfirmed);

    outage.set_down(false);
    let report = h
        .market
        .reconciler(Duration::from_secs(900))
        .run_once()
        .await
        .unwrap();
    assert_eq!(report.mirrored, 1);
    assert_eq!(h.market.my_purchases().await.unwrap().len(), 1);
    assert_eq!(h.sim.holding(buyer(), doc_id as u64), U256::from(1));
}

/// Registers `doc` on chain from the connected seller without listing it,
/// and records an upload entry that stopped at `registered`.
async fn registered_upload(h: &Harness, doc: &NewDocument) -> Uuid {
    h.market
        .registry()
        .register_document(
            doc.id as u64,
            doc.amount as u64,
            &doc.title,
            &doc.file_url,
            &doc.description,
        )
        .await
        .unwrap()
        .get_receipt()
        .await
        .unwrap();
    let entry = h
        .market
        .ledger()
        .record(&NewPendingWrite::new(PendingWriteKind::Upload, doc.id, &doc.seller, doc).unwrap())
        .await
        .unwrap();
    h.market
        .ledger()
        .advance(entry.id, PendingStatus::Registered, None)
        .await
        .unwrap();
    entry.id
}

fn unlisted_doc(id: i64) -> NewDocument {
    NewDocument {
        id,
        title: "Almanac".to_string(),
        description: "Tide tables".to_string(),
        seller: lower(seller()),
        price_per_token: BigDecimal::from_str("0.5").unwrap(),
        amount: 3,
        file_url: format!("{}/almanac.txt", PUBLIC_BASE),
        file_hash: None,
    }
}

#[tokio::test]
async fn test_reconciler_resubmits_listing_for_registered_upload() {
    let h = harness().await;
    let doc = unlisted_doc(7001);
    let ledger_id = registered_upload(&h, &doc).await;
    assert!(h.sim.listing(7001, seller()).is_none());

    let report = h
        .market
        .reconciler(Duration::from_secs(900))
        .run_once()
        .await
        .unwrap();
    assert_eq!(report.mirrored, 1);

    let (amount, price) = h.sim.listing(7001, seller()).unwrap();
    assert_eq!(amount, U256::from(3));
    assert_eq!(price, ether(1) / U256::from(2));

    let entry = h.market.ledger().get_pending(ledger_id).await.unwrap().unwrap();
    assert_eq!(entry.status, PendingStatus::Mirrored);
    assert!(entry.tx_hash.is_some());
    let listing = h.market.listing().await.unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].title, "Almanac");
}

#[tokio::test]
async fn test_reconciler_waits_for_seller_to_list() {
    let h = harness().await;
    let doc = unlisted_doc(7002);
    let ledger_id = registered_upload(&h, &doc).await;

    switch_to_buyer(&h).await;
    let sent = h.sim.transaction_count();
    let report = h
        .market
        .reconciler(Duration::from_secs(900))
        .run_once()
        .await
        .unwrap();
    assert_eq!(report.untouched, 1);
    assert_eq!(h.sim.transaction_count(), sent);

    let entry = h.market.ledger().get_pending(ledger_id).await.unwrap().unwrap();
    assert_eq!(entry.status, PendingStatus::Registered);
    assert!(h.sim.listing(7002, seller()).is_none());
}

#[tokio::test]
async fn test_reconciler_fails_entry_never_submitted() {
    let h = harness().await;
    let entry = h
        .market
        .ledger()
        .record(
            &NewPendingWrite::new(
                PendingWriteKind::Purchase,
                42,
                &lower(seller()),
                &serde_json::json!({}),
            )
            .unwrap(),
        )
        .await
        .unwrap();

    // Young entries may still be submitted.
    let report = h
        .market
        .reconciler(Duration::from_secs(900))
        .run_once()
        .await
        .unwrap();
    assert_eq!(report.untouched, 1);

    let report = h
        .market
        .reconciler(Duration::ZERO)
        .run_once()
        .await
        .unwrap();
    assert_eq!(report.failed, 1);

    let entry = h.market.ledger().get_pending(entry.id).await.unwrap().unwrap();
    assert_eq!(entry.status, PendingStatus::Failed);
    assert_eq!(entry.error.as_deref(), Some("never submitted"));
}

#[tokio::test]
async fn test_reconciler_fails_reverted_transaction() {
    let h = harness().await;
    switch_to_buyer(&h).await;
    let entry = h
        .market
        .ledger()
        .record(
            &NewPendingWrite::new(
                PendingWriteKind::Purchase,
                404,
                &lower(buyer()),
                &serde_json::json!({}),
            )
            .unwrap(),
        )
        .await
        .unwrap();

    // Nothing is listed under id 404, so the buy is mined as a revert.
    h.sim.mine_reverts(true);
    let pending = h
        .market
        .registry()
        .buy_document(404, seller(), 1, U256::ZERO)
        .await
        .unwrap();
    h.market
        .ledger()
        .mark_submitted(entry.id, pending.tx_hash())
        .await
        .unwrap();

    let report = h
        .market
        .reconciler(Duration::from_secs(900))
        .run_once()
        .await
        .unwrap();
    assert_eq!(report.failed, 1);

    let entry = h.market.ledger().get_pending(entry.id).await.unwrap().unwrap();
    assert_eq!(entry.status, PendingStatus::Failed);
    assert!(entry.error.unwrap().contains("reverted"));
}
