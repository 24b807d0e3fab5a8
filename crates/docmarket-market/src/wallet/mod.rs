//! Wallet/session gateway over an EIP-1193 style provider.
//!
//! The provider owns accounts, keys and network selection. This module only
//! asks it for accounts and the chain id, and mirrors what it reports into
//! an observable [`WalletSession`].

pub mod gateway;
pub mod http;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ChainError;

pub use gateway::{ListenerHandle, Signer, WalletGateway};
pub use http::HttpProvider;

/// A JSON-RPC request surface in the shape of EIP-1193 `request()`.
#[async_trait]
pub trait Eip1193Provider: Send + Sync {
    /// Sends one request. JSON-RPC error objects come back as [`ChainError::Rpc`].
    async fn request(&self, method: &str, params: Value) -> Result<Value, ChainError>;
}

/// What the gateway currently knows about the connected wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSession {
    /// Lower-cased `0x` address. Never empty.
    pub account: String,
    /// Chain id as reported by the provider (`0x`-hex).
    pub chain_id: String,
    /// Native balance in wei, when it has been fetched.
    pub balance: Option<U256>,
}

impl WalletSession {
    pub fn address(&self) -> Result<Address, ChainError> {
        self.account
            .parse()
            .map_err(|e| ChainError::Malformed(format!("account {}: {}", self.account, e)))
    }
}

/// Provider notifications, either pushed by a listener or applied directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    AccountsChanged(Vec<String>),
    ChainChanged(String),
    Disconnected,
}

/// Reads a `0x`-hex quantity returned by the provider.
pub fn parse_quantity(value: &Value) -> Result<U256, ChainError> {
    let s = value
        .as_str()
        .ok_or_else(|| ChainError::Malformed(format!("expected hex quantity, got {}", value)))?;
    let digits = s
        .strip_prefix("0x")
        .ok_or_else(|| ChainError::Malformed(format!("expected 0x prefix, got {}", s)))?;
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 16).map_err(|e| ChainError::Malformed(format!("{}: {}", s, e)))
}

/// Reads an account list, dropping empty strings and lower-casing the rest.
pub fn parse_accounts(value: &Value) -> Result<Vec<String>, ChainError> {
    let list = value
        .as_array()
        .ok_or_else(|| ChainError::Malformed(format!("expected account list, got {}", value)))?;
    Ok(list
        .iter()
        .filter_map(|v| v.as_str())
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect())
}
