//! DocMarket marketplace client.
//!
//! Connects a wallet provider, the document registry and token contracts,
//! a Postgres metadata store and a blob bucket. Uploads and purchases are
//! two-step writes (chain first, then the store) tracked in a pending-write
//! ledger so an interrupted write can be finished later.

pub mod actions;
pub mod blob;
pub mod config;
pub mod contract;
pub mod db;
pub mod error;
pub mod market;
pub mod models;
pub mod reconcile;
pub mod sim;
pub mod store;
pub mod wallet;

pub use actions::{Action, ActionState};
pub use config::{BlobBackend, MarketConfig};
pub use error::{BlobError, ChainError, ConfigError, MarketError, Result, StoreError, WalletError};
pub use market::{CheckoutReport, Marketplace, PurchaseReceipt, UnsettledLine, UploadReceipt};
pub use reconcile::{ReconcileReport, Reconciler};
pub use sim::SimulatedChain;
pub use store::{MemoryStore, PgStore};
pub use wallet::WalletGateway;
