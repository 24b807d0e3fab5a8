//! Error types for the DocMarket client.
//!
//! Provider and contract failures keep the provider's message verbatim so
//! the view layer can show it to the user unchanged.

use std::time::Duration;

use docmarket_core::ValidationError;
use uuid::Uuid;

use crate::actions::Action;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MarketError>;

/// EIP-1193 error code for a request the user rejected in the wallet.
pub const USER_REJECTED_CODE: i64 = 4001;

/// EIP-1193 error code for switching to a chain the wallet does not know.
pub const UNRECOGNIZED_CHAIN_CODE: i64 = 4902;

/// Wallet/session failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalletError {
    #[error("No wallet provider found. Set DOCMARKET_PROVIDER_URL to a wallet RPC endpoint")]
    NoProvider,

    #[error("No account available: the wallet returned no accounts or the request was rejected")]
    NoAccount,

    #[error("Wallet is not connected. Run `docmarket wallet connect` first")]
    NotConnected,
}

/// Provider, transaction and ABI failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    /// JSON-RPC error object returned by the provider.
    #[error("{message}")]
    Rpc { code: i64, message: String },

    /// A mined transaction whose receipt reports failure.
    #[error("Transaction {tx_hash} reverted")]
    Reverted { tx_hash: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed provider response: {0}")]
    Malformed(String),

    #[error("ABI error: {0}")]
    Abi(String),

    #[error("Timed out after {waited:?} waiting for transaction {tx_hash}")]
    ConfirmationTimeout { waited: Duration, tx_hash: String },
}

impl ChainError {
    /// True when the user declined the request in the wallet.
    pub fn is_user_rejection(&self) -> bool {
        matches!(self, Self::Rpc { code, .. } if *code == USER_REJECTED_CODE)
    }

    /// True when execution reverted, either at submission or after mining.
    pub fn is_revert(&self) -> bool {
        match self {
            Self::Reverted { .. } => true,
            Self::Rpc { message, .. } => message.contains("reverted"),
            _ => false,
        }
    }
}

/// Metadata store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Already exists: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Blob bucket failures.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Blob request failed: {0}")]
    Http(String),

    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Blob already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid blob path: {0}")]
    InvalidPath(String),
}

/// Configuration failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Top-level error for marketplace operations.
#[derive(Debug, thiserror::Error)]
pub enum MarketError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0} is not available for purchase")]
    Unavailable(String),

    #[error("{0} is already in progress")]
    Busy(Action),

    /// The chain write succeeded but the metadata mirror did not.
    #[error(
        "Transaction {tx_hash} confirmed but the metadata store update failed: {reason}. \
         The write is recorded as {ledger_id}; run `docmarket reconcile` to retry"
    )]
    MirrorFailed {
        ledger_id: Uuid,
        tx_hash: String,
        reason: String,
    },
}

impl From<sqlx::Error> for MarketError {
    fn from(e: sqlx::Error) -> Self {
        MarketError::Store(StoreError::Database(e))
    }
}
