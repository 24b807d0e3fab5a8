//! Centralized configuration (environment variables + defaults).
//!
//! Contract addresses are required and have no fallback. A missing provider
//! URL is allowed: the wallet gateway then reports `NoProvider` on connect.

use alloy::primitives::Address;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use docmarket_core::{normalize_address, SEPOLIA_CHAIN_ID_HEX};

use crate::error::ConfigError;

pub const REGISTRY_ADDRESS_VAR: &str = "DOCMARKET_REGISTRY_ADDRESS";
pub const TOKEN_ADDRESS_VAR: &str = "DOCMARKET_TOKEN_ADDRESS";
pub const PROVIDER_URL_VAR: &str = "DOCMARKET_PROVIDER_URL";
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";

const DEFAULT_BUCKET: &str = "documents";
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_STALE_AFTER_SECS: u64 = 900;

/// Where uploaded files go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobBackend {
    /// Files written under a local directory and served from `public_base_url`.
    Local {
        dir: PathBuf,
        public_base_url: String,
    },
    /// A Supabase storage bucket.
    Supabase {
        url: String,
        key: String,
        bucket: String,
    },
}

#[derive(Debug, Clone)]
pub struct MarketConfig {
    pub registry_address: Address,
    pub token_address: Address,
    pub provider_url: Option<String>,
    pub database_url: String,
    pub blob: BlobBackend,
    /// Chain id the view compares against; mismatches only produce a warning.
    pub expected_chain: String,
    /// Delay between receipt polls while waiting for a transaction.
    pub poll_interval: Duration,
    /// `None` waits for confirmation indefinitely.
    pub confirm_timeout: Option<Duration>,
    /// Age after which an unsubmitted ledger entry is considered abandoned.
    pub stale_after: Duration,
}

impl MarketConfig {
    /// Loads `.env` (if present) and reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let registry_address = parse_address(
            REGISTRY_ADDRESS_VAR,
            &get(REGISTRY_ADDRESS_VAR).ok_or(ConfigError::Missing(REGISTRY_ADDRESS_VAR))?,
        )?;
        let token_address = parse_address(
            TOKEN_ADDRESS_VAR,
            &get(TOKEN_ADDRESS_VAR).ok_or(ConfigError::Missing(TOKEN_ADDRESS_VAR))?,
        )?;

        let provider_url = get(PROVIDER_URL_VAR);
        if let Some(ref url) = provider_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::Invalid {
                    key: PROVIDER_URL_VAR,
                    message: "must start with http:// or https://".to_string(),
                });
            }
        }

        let database_url = get(DATABASE_URL_VAR).ok_or(ConfigError::Missing(DATABASE_URL_VAR))?;

        let blob = match (get("DOCMARKET_BLOB_DIR"), get("SUPABASE_URL")) {
            (Some(dir), _) => {
                let public_base_url = get("DOCMARKET_BLOB_PUBLIC_URL")
                    .unwrap_or_else(|| format!("file://{}", dir.trim_end_matches('/')));
                BlobBackend::Local {
                    dir: PathBuf::from(dir),
                    public_base_url,
                }
            }
            (None, Some(url)) => BlobBackend::Supabase {
                url: url.trim_end_matches('/').to_string(),
                key: get("SUPABASE_KEY").ok_or(ConfigError::Missing("SUPABASE_KEY"))?,
                bucket: get("DOCMARKET_BUCKET").unwrap_or_else(|| DEFAULT_BUCKET.to_string()),
            },
            (None, None) => return Err(ConfigError::Missing("DOCMARKET_BLOB_DIR or SUPABASE_URL")),
        };

        let expected_chain =
            get("DOCMARKET_EXPECTED_CHAIN").unwrap_or_else(|| SEPOLIA_CHAIN_ID_HEX.to_string());
        if docmarket_core::chain::parse_chain_id(&expected_chain).is_none() {
            return Err(ConfigError::Invalid {
                key: "DOCMARKET_EXPECTED_CHAIN",
                message: format!("'{}' is not a chain id", expected_chain),
            });
        }

        let poll_interval_ms =
            parse_u64(&get, "DOCMARKET_POLL_INTERVAL_MS")?.unwrap_or(DEFAULT_POLL_INTERVAL_MS);
        if poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "DOCMARKET_POLL_INTERVAL_MS",
                message: "must be greater than zero".to_string(),
            });
        }
        let poll_interval = Duration::from_millis(poll_interval_ms);
        let confirm_timeout =
            parse_u64(&get, "DOCMARKET_CONFIRM_TIMEOUT_SECS")?.map(Duration::from_secs);
        let stale_after = Duration::from_secs(
            parse_u64(&get, "DOCMARKET_STALE_AFTER_SECS")?.unwrap_or(DEFAULT_STALE_AFTER_SECS),
        );

        Ok(Self {
            registry_address,
            token_address,
            provider_url,
            database_url,
            blob,
            expected_chain,
            poll_interval,
            confirm_timeout,
            stale_after,
        })
    }
}

fn parse_address(key: &'static str, value: &str) -> Result<Address, ConfigError> {
    let normalized = normalize_address(value).map_err(|e| ConfigError::Invalid {
        key,
        message: e.to_string(),
    })?;
    Address::from_str(&normalized).map_err(|e| ConfigError::Invalid {
        key,
        message: e.to_string(),
    })
}

fn parse_u64<G>(get: &G, key: &'static str) -> Result<Option<u64>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|v| {
            v.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
                key,
                message: e.to_string(),
            })
        })
        .transpose()
}
