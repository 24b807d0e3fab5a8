//! Session state and provider access for the connected wallet.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use alloy::primitives::{Address, U256};
use docmarket_core::chain::{chain_name, parse_chain_id};
use docmarket_core::{chain_matches, SEPOLIA_CHAIN_ID_HEX};
use serde_json::{json, Value};
use tokio::sync::{broadcast, watch};
use tokio::task::AbortHandle;

use crate::config::MarketConfig;
use crate::error::{ChainError, Result, WalletError, UNRECOGNIZED_CHAIN_CODE};

use super::{parse_accounts, parse_quantity, Eip1193Provider, HttpProvider, WalletEvent, WalletSession};

const EVENT_CAPACITY: usize = 32;

/// Shortest interval a listener polls at. `tokio::time::interval` panics on zero.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// The account that signs transactions, together with the provider that holds its key.
#[derive(Clone)]
pub struct Signer {
    pub address: Address,
    pub provider: Arc<dyn Eip1193Provider>,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").field("address", &self.address).finish()
    }
}

/// Stops a provider listener when dropped or unsubscribed.
#[derive(Debug)]
pub struct ListenerHandle {
    abort: AbortHandle,
}

impl ListenerHandle {
    pub fn unsubscribe(self) {
        self.abort.abort();
    }

    pub fn is_active(&self) -> bool {
        !self.abort.is_finished()
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.abort.abort();
    }
}

/// Owns the single provider handle and the observable wallet session.
pub struct WalletGateway {
    provider: Option<Arc<dyn Eip1193Provider>>,
    expected_chain: String,
    session: watch::Sender<Option<WalletSession>>,
    events: broadcast::Sender<WalletEvent>,
    listener: Mutex<Option<AbortHandle>>,
}

impl std::fmt::Debug for WalletGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletGateway")
            .field("has_provider", &self.provider.is_some())
            .field("expected_chain", &self.expected_chain)
            .field("session", &*self.session.borrow())
            .finish()
    }
}

impl WalletGateway {
    pub fn new(provider: Option<Arc<dyn Eip1193Provider>>, expected_chain: impl Into<String>) -> Self {
        let (session, _) = watch::channel(None);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            provider,
            expected_chain: expected_chain.into(),
            session,
            events,
            listener: Mutex::new(None),
        }
    }

    /// Uses an [`HttpProvider`] when a provider URL is configured.
    pub fn from_config(config: &MarketConfig) -> Result<Self> {
        let provider = match &config.provider_url {
            Some(url) => Some(Arc::new(HttpProvider::new(url)?) as Arc<dyn Eip1193Provider>),
            None => None,
        };
        Ok(Self::new(provider, config.expected_chain.clone()))
    }

    pub fn provider(&self) -> std::result::Result<Arc<dyn Eip1193Provider>, WalletError> {
        self.provider.clone().ok_or(WalletError::NoProvider)
    }

    pub fn expected_chain(&self) -> &str {
        &self.expected_chain
    }

    /// Asks the provider for accounts and starts a session with the first one.
    ///
    /// A rejected request or an empty account list is [`WalletError::NoAccount`].
    pub async fn connect(&self) -> Result<WalletSession> {
        let provider = self.provider()?;
        let accounts = match provider.request("eth_requestAccounts", json!([])).await {
            Ok(value) => parse_accounts(&value)?,
            Err(e) if e.is_user_rejection() => {
                tracing::info!("wallet connection rejected");
                return Err(WalletError::NoAccount.into());
            }
            Err(e) => return Err(e.into()),
        };
        let account = accounts.into_iter().next().ok_or(WalletError::NoAccount)?;
        self.start_session(account).await
    }

    /// Resumes a previously connected account without prompting.
    ///
    /// Returns `None` when the provider no longer exposes that account.
    pub async fn restore(&self, account: &str) -> Result<Option<WalletSession>> {
        let provider = self.provider()?;
        let accounts = parse_accounts(&provider.request("eth_accounts", json!([])).await?)?;
        let wanted = account.to_lowercase();
        if !accounts.contains(&wanted) {
            return Ok(None);
        }
        self.start_session(wanted).await.map(Some)
    }

    async fn start_session(&self, account: String) -> Result<WalletSession> {
        let chain_id = self.current_chain().await?;
        if let Some(warning) = self.chain_warning(&chain_id) {
            tracing::warn!(%chain_id, "{}", warning);
        }
        let session = WalletSession {
            account,
            chain_id,
            balance: None,
        };
        self.session.send_replace(Some(session.clone()));
        tracing::info!(account = %session.account, chain = %session.chain_id, "wallet connected");
        Ok(session)
    }

    /// Forgets the session locally. The provider keeps its own permissions.
    pub fn disconnect(&self) {
        self.session.send_replace(None);
        let _ = self.events.send(WalletEvent::Disconnected);
    }

    pub fn session(&self) -> Option<WalletSession> {
        self.session.borrow().clone()
    }

    pub fn watch_session(&self) -> watch::Receiver<Option<WalletSession>> {
        self.session.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.events.subscribe()
    }

    /// The connected account, lower-cased.
    pub fn account(&self) -> std::result::Result<String, WalletError> {
        self.session
            .borrow()
            .as_ref()
            .map(|s| s.account.clone())
            .ok_or(WalletError::NotConnected)
    }

    pub fn signer(&self) -> Result<Signer> {
        let provider = self.provider()?;
        let session = self.session().ok_or(WalletError::NotConnected)?;
        Ok(Signer {
            address: session.address()?,
            provider,
        })
    }

    pub async fn current_chain(&self) -> Result<String> {
        let value = self.provider()?.request("eth_chainId", json!([])).await?;
        let chain = value
            .as_str()
            .ok_or_else(|| ChainError::Malformed(format!("expected chain id, got {}", value)))?;
        Ok(chain.to_lowercase())
    }

    /// Banner text when `chain_id` is not the expected chain. Advisory only.
    pub fn chain_warning(&self, chain_id: &str) -> Option<String> {
        if chain_matches(chain_id, &self.expected_chain) {
            return None;
        }
        let actual = parse_chain_id(chain_id)
            .map(chain_name)
            .unwrap_or("Unknown network");
        let expected = parse_chain_id(&self.expected_chain)
            .map(chain_name)
            .unwrap_or("Unknown network");
        Some(format!(
            "Connected to {} ({}), expected {} ({}). Transactions may fail.",
            actual, chain_id, expected, self.expected_chain
        ))
    }

    /// Native balance of `account`, or of the connected account when `None`.
    pub async fn balance(&self, account: Option<&str>) -> Result<U256> {
        let account = match account {
            Some(a) => a.to_lowercase(),
            None => self.account()?,
        };
        let value = self
            .provider()?
            .request("eth_getBalance", json!([account, "latest"]))
            .await?;
        let balance = parse_quantity(&value)?;
        self.session.send_modify(|session| {
            if let Some(s) = session.as_mut().filter(|s| s.account == account) {
                s.balance = Some(balance);
            }
        });
        Ok(balance)
    }

    /// Asks the wallet to switch to the expected chain, adding it first if unknown.
    pub async fn switch_to_expected_chain(&self) -> Result<()> {
        let provider = self.provider()?;
        let params = json!([{ "chainId": self.expected_chain }]);
        match provider.request("wallet_switchEthereumChain", params.clone()).await {
            Ok(_) => {}
            Err(ChainError::Rpc { code, .. }) if code == UNRECOGNIZED_CHAIN_CODE => {
                tracing::info!(chain = %self.expected_chain, "chain unknown to wallet, adding it");
                provider
                    .request("wallet_addEthereumChain", json!([self.add_chain_params()]))
                    .await?;
                provider.request("wallet_switchEthereumChain", params).await?;
            }
            Err(e) => return Err(e.into()),
        }
        let chain_id = self.current_chain().await?;
        self.apply_event(WalletEvent::ChainChanged(chain_id));
        Ok(())
    }

    fn add_chain_params(&self) -> Value {
        if chain_matches(&self.expected_chain, SEPOLIA_CHAIN_ID_HEX) {
            json!({
                "chainId": SEPOLIA_CHAIN_ID_HEX,
                "chainName": "Sepolia",
                "nativeCurrency": { "name": "Sepolia Ether", "symbol": "ETH", "decimals": 18 },
                "rpcUrls": ["https://rpc.sepolia.org"],
                "blockExplorerUrls": ["https://sepolia.etherscan.io"],
            })
        } else {
            json!({ "chainId": self.expected_chain })
        }
    }

    /// Updates the session from a provider event and re-broadcasts it.
    pub fn apply_event(&self, event: WalletEvent) {
        match &event {
            WalletEvent::AccountsChanged(accounts) => {
                let next = accounts
                    .iter()
                    .map(|a| a.trim().to_lowercase())
                    .find(|a| !a.is_empty());
                self.session.send_modify(|session| match next {
                    None => *session = None,
                    Some(account) => {
                        if let Some(s) = session.as_mut() {
                            if s.account != account {
                                s.account = account;
                                s.balance = None;
                            }
                        }
                    }
                });
            }
            WalletEvent::ChainChanged(chain_id) => {
                if let Some(warning) = self.chain_warning(chain_id) {
                    tracing::warn!(%chain_id, "{}", warning);
                }
                let chain_id = chain_id.to_lowercase();
                self.session.send_modify(|session| {
                    if let Some(s) = session.as_mut() {
                        s.chain_id = chain_id;
                        s.balance = None;
                    }
                });
            }
            WalletEvent::Disconnected => {
                self.session.send_replace(None);
            }
        }
        let _ = self.events.send(event);
    }

    /// Polls the provider for account and chain changes.
    ///
    /// Starting a listener stops the previous one. The returned handle stops
    /// this listener when dropped.
    pub fn listen(self: &Arc<Self>, poll_interval: Duration) -> Result<ListenerHandle> {
        let provider = self.provider()?;
        let gateway = Arc::downgrade(self);
        let poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
        let task = tokio::spawn(poll_provider(gateway, provider, poll_interval));
        let abort = task.abort_handle();

        let mut current = self
            .listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = current.replace(abort.clone()) {
            previous.abort();
        }
        Ok(ListenerHandle { abort })
    }
}

async fn poll_provider(
    gateway: Weak<WalletGateway>,
    provider: Arc<dyn Eip1193Provider>,
    poll_interval: Duration,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    loop {
        ticker.tick().await;
        let Some(gateway) = gateway.upgrade() else {
            return;
        };
        let Some(session) = gateway.session() else {
            continue;
        };

        match provider.request("eth_accounts", json!([])).await.and_then(|v| parse_accounts(&v)) {
            Ok(accounts) => {
                if accounts.first() != Some(&session.account) {
                    gateway.apply_event(WalletEvent::AccountsChanged(accounts));
                }
            }
            Err(e) => tracing::debug!(error = %e, "account poll failed"),
        }

        match gateway.current_chain().await {
            Ok(chain_id) => {
                let unchanged = gateway
                    .session()
                    .map(|s| s.chain_id == chain_id)
                    .unwrap_or(true);
                if !unchanged {
                    gateway.apply_event(WalletEvent::ChainChanged(chain_id));
                }
            }
            Err(e) => tracing::debug!(error = %e, "chain poll failed"),
        }
    }
}
