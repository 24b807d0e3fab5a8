//! JSON-RPC over HTTP to a wallet endpoint that signs with its own keys.

use std::borrow::Cow;

use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::transports::{RpcError, TransportErrorKind};
use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ChainError, ConfigError};

use super::Eip1193Provider;

const PROVIDER_URL_VAR: &str = "DOCMARKET_PROVIDER_URL";

/// Provider reached over HTTP, such as a local signer (Frame, a node with
/// unlocked accounts, or a wallet bridge).
///
/// Requests go through alloy's HTTP transport. Wallet methods that alloy
/// has no typed call for (`eth_requestAccounts`, `wallet_*`) are sent as
/// raw requests.
#[derive(Clone)]
pub struct HttpProvider {
    inner: DynProvider,
    url: String,
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider").field("url", &self.url).finish()
    }
}

impl HttpProvider {
    pub fn new(url: &str) -> Result<Self, ConfigError> {
        let parsed = url.parse().map_err(|e| ConfigError::Invalid {
            key: PROVIDER_URL_VAR,
            message: format!("{}: {}", url, e),
        })?;
        let inner = ProviderBuilder::new().connect_http(parsed).erased();
        Ok(Self {
            inner,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Maps a transport failure onto the provider error surface. JSON-RPC error
/// objects keep their code and message.
fn into_chain_error(err: RpcError<TransportErrorKind>) -> ChainError {
    match err {
        RpcError::ErrorResp(payload) => ChainError::Rpc {
            code: payload.code,
            message: payload.message.to_string(),
        },
        RpcError::DeserError { err, text } => ChainError::Malformed(format!("{}: {}", err, text)),
        other => ChainError::Transport(other.to_string()),
    }
}

#[async_trait]
impl Eip1193Provider for HttpProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        tracing::debug!(method, url = %self.url, "rpc request");
        self.inner
            .raw_request::<Value, Value>(Cow::Owned(method.to_string()), params)
            .await
            .map_err(into_chain_error)
    }
}
