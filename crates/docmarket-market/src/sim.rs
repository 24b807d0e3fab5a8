//! In-process chain that answers provider requests for the registry and token.
//!
//! Implements enough of the wallet and node surface for the marketplace to
//! run without a network: account requests, chain switching, balances,
//! `eth_call`, `eth_sendTransaction` and receipts. Reverts come back the way
//! wallets report them, as an RPC error with code 3 and an
//! `execution reverted: <reason>` message.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use alloy::primitives::{keccak256, Address, Bloom, Bytes, TxKind, B256, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::sol_types::{SolEvent, SolInterface, SolValue};
use async_trait::async_trait;
use docmarket_core::chain::{chain_id_hex, parse_chain_id};
use docmarket_core::SEPOLIA_CHAIN_ID;
use serde_json::{json, Value};

use crate::contract::abi::IDocumentRegistry::{self, IDocumentRegistryCalls};
use crate::contract::abi::IERC20::{self, IERC20Calls};
use crate::error::{ChainError, UNRECOGNIZED_CHAIN_CODE, USER_REJECTED_CODE};
use crate::wallet::Eip1193Provider;

const REVERT_CODE: i64 = 3;
const INSUFFICIENT_FUNDS_CODE: i64 = -32000;
const UNAUTHORIZED_CODE: i64 = 4100;
const METHOD_NOT_FOUND_CODE: i64 = -32601;
const INVALID_PARAMS_CODE: i64 = -32602;

fn rpc_error(code: i64, message: impl Into<String>) -> ChainError {
    ChainError::Rpc {
        code,
        message: message.into(),
    }
}

fn revert(reason: &str) -> ChainError {
    rpc_error(REVERT_CODE, format!("execution reverted: {}", reason))
}

fn invalid_params(message: impl Into<String>) -> ChainError {
    rpc_error(INVALID_PARAMS_CODE, message)
}

#[derive(Debug, Clone)]
struct DocumentRecord {
    title: String,
    file_url: String,
    description: String,
    creator: Address,
    total_supply: U256,
}

#[derive(Debug, Clone, Copy)]
struct Listing {
    amount: U256,
    price: U256,
}

#[derive(Debug)]
struct SimLog {
    address: Address,
    topics: Vec<B256>,
    data: Vec<u8>,
}

#[derive(Debug)]
struct TokenState {
    name: String,
    symbol: String,
    decimals: u8,
    total_supply: U256,
    balances: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address), U256>,
}

impl TokenState {
    fn balance(&self, account: Address) -> U256 {
        self.balances.get(&account).copied().unwrap_or_default()
    }

    fn mint(&mut self, to: Address, amount: U256) {
        *self.balances.entry(to).or_default() += amount;
        self.total_supply += amount;
    }

    fn move_balance(&mut self, from: Address, to: Address, amount: U256) -> Result<(), String> {
        let available = self.balance(from);
        if available < amount {
            return Err("ERC20: transfer amount exceeds balance".to_string());
        }
        self.balances.insert(from, available - amount);
        *self.balances.entry(to).or_default() += amount;
        Ok(())
    }
}

#[derive(Debug)]
struct State {
    accounts: Vec<Address>,
    reject_connections: bool,
    reject_transactions: bool,
    chain_id: u64,
    known_chains: HashSet<u64>,
    native: HashMap<Address, U256>,
    owner: Address,
    documents: HashMap<U256, DocumentRecord>,
    holdings: HashMap<(Address, U256), U256>,
    listings: HashMap<(U256, Address), Listing>,
    operator_approvals: HashSet<(Address, Address)>,
    airdropped: HashSet<Address>,
    airdrop_amount: U256,
    token: TokenState,
    nonce: u64,
    block: u64,
    mine_reverts: bool,
    hold_receipts: bool,
    receipts: HashMap<String, Value>,
    held: Vec<(String, Value)>,
}

impl State {
    fn native_balance(&self, account: Address) -> U256 {
        self.native.get(&account).copied().unwrap_or_default()
    }

    fn holding(&self, account: Address, id: U256) -> U256 {
        self.holdings.get(&(account, id)).copied().unwrap_or_default()
    }
}

/// A registry contract and an ERC-20 token living in memory, plus the
/// wallet that owns the accounts.
#[derive(Debug)]
pub struct SimulatedChain {
    registry: Address,
    token: Address,
    state: Mutex<State>,
}

impl SimulatedChain {
    /// Starts on Sepolia with `owner` as the only wallet account and registry owner.
    pub fn new(registry: Address, token: Address, owner: Address) -> Self {
        let state = State {
            accounts: vec![owner],
            reject_connections: false,
            reject_transactions: false,
            chain_id: SEPOLIA_CHAIN_ID,
            known_chains: [1, SEPOLIA_CHAIN_ID].into_iter().collect(),
            native: HashMap::new(),
            owner,
            documents: HashMap::new(),
            holdings: HashMap::new(),
            listings: HashMap::new(),
            operator_approvals: HashSet::new(),
            airdropped: HashSet::new(),
            airdrop_amount: U256::from(100u64) * U256::from(10u64).pow(U256::from(18u64)),
            token: TokenState {
                name: "DocMarket Token".to_string(),
                symbol: "DMT".to_string(),
                decimals: 18,
                total_supply: U256::ZERO,
                balances: HashMap::new(),
                allowances: HashMap::new(),
            },
            nonce: 0,
            block: 1,
            mine_reverts: false,
            hold_receipts: false,
            receipts: HashMap::new(),
            held: Vec::new(),
        };
        Self {
            registry,
            token,
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn registry_address(&self) -> Address {
        self.registry
    }

    pub fn token_address(&self) -> Address {
        self.token
    }

    /// Accounts the wallet exposes, first one active. Empty means locked.
    pub fn set_accounts(&self, accounts: Vec<Address>) {
        self.state().accounts = accounts;
    }

    /// Makes `eth_requestAccounts` fail as if the user declined.
    pub fn reject_connections(&self, reject: bool) {
        self.state().reject_connections = reject;
    }

    /// Makes `eth_sendTransaction` fail as if the user declined to sign.
    pub fn reject_transactions(&self, reject: bool) {
        self.state().reject_transactions = reject;
    }

    pub fn set_chain_id(&self, chain_id: u64) {
        let mut state = self.state();
        state.known_chains.insert(chain_id);
        state.chain_id = chain_id;
    }

    pub fn forget_chain(&self, chain_id: u64) {
        self.state().known_chains.remove(&chain_id);
    }

    pub fn chain_id(&self) -> u64 {
        self.state().chain_id
    }

    pub fn fund(&self, account: Address, wei: U256) {
        *self.state().native.entry(account).or_default() += wei;
    }

    pub fn mint_tokens(&self, account: Address, amount: U256) {
        self.state().token.mint(account, amount);
    }

    /// Mine failing transactions with status 0 instead of rejecting them at submission.
    pub fn mine_reverts(&self, enabled: bool) {
        self.state().mine_reverts = enabled;
    }

    /// Keep new receipts back until [`SimulatedChain::release_receipts`].
    pub fn hold_receipts(&self, hold: bool) {
        self.state().hold_receipts = hold;
    }

    /// Publishes held receipts and returns how many were released.
    pub fn release_receipts(&self) -> usize {
        let mut state = self.state();
        let held = std::mem::take(&mut state.held);
        let count = held.len();
        state.receipts.extend(held);
        count
    }

    pub fn native_balance(&self, account: Address) -> U256 {
        self.state().native_balance(account)
    }

    pub fn holding(&self, account: Address, id: u64) -> U256 {
        self.state().holding(account, U256::from(id))
    }

    /// `(amount, price)` listed by `seller` for document `id`.
    pub fn listing(&self, id: u64, seller: Address) -> Option<(U256, U256)> {
        self.state()
            .listings
            .get(&(U256::from(id), seller))
            .map(|l| (l.amount, l.price))
    }

    pub fn token_balance(&self, account: Address) -> U256 {
        self.state().token.balance(account)
    }

    pub fn transaction_count(&self) -> u64 {
        self.state().nonce
    }

    fn eth_call(&self, state: &State, params: &Value) -> Result<Value, ChainError> {
        let tx = transaction("eth_call", params)?;
        let to = destination(&tx)?;
        let data = tx.input.input().cloned().unwrap_or_default();

        let output = if to == self.registry {
            self.registry_view(state, &data)?
        } else if to == self.token {
            self.token_view(state, &data)?
        } else {
            Vec::new()
        };
        Ok(json!(Bytes::from(output)))
    }

    fn registry_view(&self, state: &State, data: &[u8]) -> Result<Vec<u8>, ChainError> {
        let call = IDocumentRegistryCalls::abi_decode(data).map_err(|_| revert("invalid calldata"))?;
        let out = match call {
            IDocumentRegistryCalls::getDocumentInfo(c) => {
                let doc = state
                    .documents
                    .get(&c.id)
                    .ok_or_else(|| revert("Document does not exist"))?;
                (
                    doc.title.clone(),
                    doc.file_url.clone(),
                    doc.description.clone(),
                    doc.creator,
                    doc.total_supply,
                )
                    .abi_encode_params()
            }
            IDocumentRegistryCalls::getPrice(c) => {
                let price = state
                    .listings
                    .get(&(c.id, c.seller))
                    .map(|l| l.price)
                    .unwrap_or_default();
                (price,).abi_encode_params()
            }
            IDocumentRegistryCalls::balanceOf(c) => (state.holding(c.account, c.id),).abi_encode_params(),
            IDocumentRegistryCalls::isApprovedForAll(c) => {
                (state.operator_approvals.contains(&(c.account, c.operator)),).abi_encode_params()
            }
            IDocumentRegistryCalls::checkAirdropStatus(c) => {
                (state.airdropped.contains(&c.account),).abi_encode_params()
            }
            IDocumentRegistryCalls::getAirdropAmount(_) => (state.airdrop_amount,).abi_encode_params(),
            IDocumentRegistryCalls::owner(_) => (state.owner,).abi_encode_params(),
            // State-changing functions return nothing when called.
            _ => Vec::new(),
        };
        Ok(out)
    }

    fn token_view(&self, state: &State, data: &[u8]) -> Result<Vec<u8>, ChainError> {
        let call = IERC20Calls::abi_decode(data).map_err(|_| revert("invalid calldata"))?;
        let token = &state.token;
        let out = match call {
            IERC20Calls::name(_) => (token.name.clone(),).abi_encode_params(),
            IERC20Calls::symbol(_) => (token.symbol.clone(),).abi_encode_params(),
            IERC20Calls::decimals(_) => <(alloy::sol_types::sol_data::Uint<8>,) as alloy::sol_types::SolType>::abi_encode_params(&(token.decimals,)),
            IERC20Calls::totalSupply(_) => (token.total_supply,).abi_encode_params(),
            IERC20Calls::balanceOf(c) => (token.balance(c.account),).abi_encode_params(),
            IERC20Calls::allowance(c) => {
                let allowance = token
                    .allowances
                    .get(&(c.owner, c.spender))
                    .copied()
                    .unwrap_or_default();
                (allowance,).abi_encode_params()
            }
            // Dry-run of a write: report success without touching state.
            IERC20Calls::approve(_) | IERC20Calls::transfer(_) | IERC20Calls::transferFrom(_) => {
                (true,).abi_encode_params()
            }
        };
        Ok(out)
    }

    fn send_transaction(&self, state: &mut State, params: &Value) -> Result<Value, ChainError> {
        let tx = transaction("eth_sendTransaction", params)?;
        let from = tx
            .from
            .ok_or_else(|| invalid_params("transaction without from"))?;
        if !state.accounts.contains(&from) {
            return Err(rpc_error(
                UNAUTHORIZED_CODE,
                "The requested account and/or method has not been authorized by the user.",
            ));
        }
        if state.reject_transactions {
            return Err(rpc_error(
                USER_REJECTED_CODE,
                "MetaMask Tx Signature: User denied transaction signature.",
            ));
        }

        let to = destination(&tx)?;
        let value = tx.value.unwrap_or_default();
        let data = tx.input.input().cloned().unwrap_or_default();
        if value > state.native_balance(from) {
            return Err(rpc_error(
                INSUFFICIENT_FUNDS_CODE,
                "insufficient funds for gas * price + value",
            ));
        }

        let outcome = if to == self.registry {
            self.execute_registry(state, from, value, &data)
        } else if to == self.token {
            if value.is_zero() {
                execute_token(state, self.token, from, &data)
            } else {
                Err("non-payable function was called with value".to_string())
            }
        } else {
            let balance = state.native_balance(from);
            state.native.insert(from, balance - value);
            *state.native.entry(to).or_default() += value;
            Ok(Vec::new())
        };

        let (success, logs) = match outcome {
            Ok(logs) => (true, logs),
            Err(reason) if state.mine_reverts => {
                tracing::debug!(%reason, "mining reverted transaction");
                (false, Vec::new())
            }
            Err(reason) => return Err(revert(&reason)),
        };

        state.nonce += 1;
        state.block += 1;
        let mut preimage = from.to_vec();
        preimage.extend_from_slice(&state.nonce.to_be_bytes());
        let tx_hash = keccak256(&preimage).to_string();

        let receipt = receipt_json(
            &tx_hash,
            state.block,
            Mined {
                from,
                to,
                success,
            },
            &logs,
        );
        if state.hold_receipts {
            state.held.push((tx_hash.clone(), receipt));
        } else {
            state.receipts.insert(tx_hash.clone(), receipt);
        }
        Ok(json!(tx_hash))
    }

    fn execute_registry(
        &self,
        state: &mut State,
        from: Address,
        value: U256,
        data: &[u8],
    ) -> Result<Vec<SimLog>, String> {
        let call = IDocumentRegistryCalls::abi_decode(data).map_err(|_| "invalid calldata".to_string())?;
        if !value.is_zero() && !matches!(call, IDocumentRegistryCalls::buyDocument(_)) {
            return Err("non-payable function was called with value".to_string());
        }

        match call {
            IDocumentRegistryCalls::registerDocument(c) => {
                if state.documents.contains_key(&c.id) {
                    return Err("Document already registered".to_string());
                }
                if c.amount.is_zero() {
                    return Err("Amount must be greater than zero".to_string());
                }
                state.documents.insert(
                    c.id,
                    DocumentRecord {
                        title: c.title,
                        file_url: c.fileUrl,
                        description: c.description,
                        creator: from,
                        total_supply: c.amount,
                    },
                );
                *state.holdings.entry((from, c.id)).or_default() += c.amount;
                Ok(Vec::new())
            }
            IDocumentRegistryCalls::listDocument(c) => {
                if !state.documents.contains_key(&c.id) {
                    return Err("Document does not exist".to_string());
                }
                if c.price.is_zero() {
                    return Err("Price must be greater than zero".to_string());
                }
                if c.amount > state.holding(from, c.id) {
                    return Err("Insufficient balance to list".to_string());
                }
                state.listings.insert(
                    (c.id, from),
                    Listing {
                        amount: c.amount,
                        price: c.price,
                    },
                );
                Ok(vec![SimLog {
                    address: self.registry,
                    topics: vec![
                        IDocumentRegistry::Listed::SIGNATURE_HASH,
                        B256::from(c.id.to_be_bytes::<32>()),
                        from.into_word(),
                    ],
                    data: (c.amount, c.price).abi_encode_params(),
                }])
            }
            IDocumentRegistryCalls::buyDocument(c) => {
                let listing = state
                    .listings
                    .get(&(c.id, c.seller))
                    .copied()
                    .ok_or_else(|| "Document not listed by seller".to_string())?;
                if c.amount.is_zero() {
                    return Err("Amount must be greater than zero".to_string());
                }
                if c.amount > listing.amount {
                    return Err("Not enough tokens listed".to_string());
                }
                let total = listing
                    .price
                    .checked_mul(c.amount)
                    .ok_or_else(|| "Price overflow".to_string())?;
                if value < total {
                    return Err("Insufficient payment".to_string());
                }
                let seller_holding = state.holding(c.seller, c.id);
                if seller_holding < c.amount {
                    return Err("Seller balance too low".to_string());
                }

                state.listings.insert(
                    (c.id, c.seller),
                    Listing {
                        amount: listing.amount - c.amount,
                        price: listing.price,
                    },
                );
                state.holdings.insert((c.seller, c.id), seller_holding - c.amount);
                *state.holdings.entry((from, c.id)).or_default() += c.amount;
                let buyer_balance = state.native_balance(from);
                state.native.insert(from, buyer_balance - value);
                *state.native.entry(c.seller).or_default() += value;

                Ok(vec![SimLog {
                    address: self.registry,
                    topics: vec![
                        IDocumentRegistry::Purchased::SIGNATURE_HASH,
                        B256::from(c.id.to_be_bytes::<32>()),
                        from.into_word(),
                        c.seller.into_word(),
                    ],
                    data: (c.amount, total).abi_encode_params(),
                }])
            }
            IDocumentRegistryCalls::setApprovalForAll(c) => {
                if c.approved {
                    state.operator_approvals.insert((from, c.operator));
                } else {
                    state.operator_approvals.remove(&(from, c.operator));
                }
                Ok(Vec::new())
            }
            IDocumentRegistryCalls::requestAirdrop(_) => {
                if !state.airdropped.insert(from) {
                    return Err("Already received airdrop".to_string());
                }
                let amount = state.airdrop_amount;
                state.token.mint(from, amount);
                Ok(Vec::new())
            }
            IDocumentRegistryCalls::setAirdropAmount(c) => {
                if from != state.owner {
                    return Err("Ownable: caller is not the owner".to_string());
                }
                state.airdrop_amount = c.amount;
                Ok(Vec::new())
            }
            _ => Ok(Vec::new()),
        }
    }
}

fn execute_token(
    state: &mut State,
    token_address: Address,
    from: Address,
    data: &[u8],
) -> Result<Vec<SimLog>, String> {
    let call = IERC20Calls::abi_decode(data).map_err(|_| "invalid calldata".to_string())?;
    let token = &mut state.token;
    match call {
        IERC20Calls::approve(c) => {
            token.allowances.insert((from, c.spender), c.value);
            Ok(vec![SimLog {
                address: token_address,
                topics: vec![
                    IERC20::Approval::SIGNATURE_HASH,
                    from.into_word(),
                    c.spender.into_word(),
                ],
                data: (c.value,).abi_encode_params(),
            }])
        }
        IERC20Calls::transfer(c) => {
            token.move_balance(from, c.to, c.value)?;
            Ok(vec![transfer_log(token_address, from, c.to, c.value)])
        }
        IERC20Calls::transferFrom(c) => {
            let allowance = token
                .allowances
                .get(&(c.from, from))
                .copied()
                .unwrap_or_default();
            if allowance < c.value {
                return Err("ERC20: insufficient allowance".to_string());
            }
            token.move_balance(c.from, c.to, c.value)?;
            token.allowances.insert((c.from, from), allowance - c.value);
            Ok(vec![transfer_log(token_address, c.from, c.to, c.value)])
        }
        _ => Ok(Vec::new()),
    }
}

fn transfer_log(token: Address, from: Address, to: Address, value: U256) -> SimLog {
    SimLog {
        address: token,
        topics: vec![IERC20::Transfer::SIGNATURE_HASH, from.into_word(), to.into_word()],
        data: (value,).abi_encode_params(),
    }
}

/// Who sent a mined transaction and how it ended.
struct Mined {
    from: Address,
    to: Address,
    success: bool,
}

/// Builds a receipt in the shape nodes return from `eth_getTransactionReceipt`.
fn receipt_json(tx_hash: &str, block: u64, mined: Mined, logs: &[SimLog]) -> Value {
    let block_hash = keccak256(block.to_be_bytes()).to_string();
    let block_number = json!(U256::from(block));
    let logs: Vec<Value> = logs
        .iter()
        .enumerate()
        .map(|(index, log)| {
            json!({
                "address": log.address,
                "topics": log.topics,
                "data": Bytes::from(log.data.clone()),
                "blockHash": block_hash,
                "blockNumber": block_number,
                "transactionHash": tx_hash,
                "transactionIndex": "0x0",
                "logIndex": json!(U256::from(index)),
                "removed": false,
            })
        })
        .collect();
    json!({
        "type": "0x2",
        "status": if mined.success { "0x1" } else { "0x0" },
        "cumulativeGasUsed": "0x5208",
        "logsBloom": Bloom::ZERO,
        "logs": logs,
        "transactionHash": tx_hash,
        "transactionIndex": "0x0",
        "blockHash": block_hash,
        "blockNumber": block_number,
        "gasUsed": "0x5208",
        "effectiveGasPrice": "0x1",
        "from": mined.from,
        "to": mined.to,
        "contractAddress": null,
    })
}

fn transaction(method: &str, params: &Value) -> Result<TransactionRequest, ChainError> {
    let tx = params
        .get(0)
        .cloned()
        .ok_or_else(|| invalid_params(format!("{} expects a transaction object", method)))?;
    serde_json::from_value(tx).map_err(|e| invalid_params(format!("invalid transaction: {}", e)))
}

fn destination(tx: &TransactionRequest) -> Result<Address, ChainError> {
    match tx.to {
        Some(TxKind::Call(to)) => Ok(to),
        _ => Err(invalid_params("transaction without to")),
    }
}

fn parse_address(s: &str) -> Result<Address, ChainError> {
    s.parse()
        .map_err(|_| invalid_params(format!("invalid address {}", s)))
}

fn accounts_json(accounts: &[Address]) -> Value {
    json!(accounts
        .iter()
        .map(|a| a.to_string().to_lowercase())
        .collect::<Vec<_>>())
}

#[async_trait]
impl Eip1193Provider for SimulatedChain {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let mut state = self.state();
        match method {
            "eth_requestAccounts" => {
                if state.reject_connections {
                    return Err(rpc_error(USER_REJECTED_CODE, "User rejected the request."));
                }
                Ok(accounts_json(&state.accounts))
            }
            "eth_accounts" => Ok(accounts_json(&state.accounts)),
            "eth_chainId" => Ok(json!(chain_id_hex(state.chain_id))),
            "eth_blockNumber" => Ok(json!(U256::from(state.block))),
            "eth_getBalance" => {
                let account = params
                    .get(0)
                    .and_then(Value::as_str)
                    .ok_or_else(|| invalid_params("eth_getBalance expects an address"))?;
                let balance = state.native_balance(parse_address(account)?);
                Ok(json!(balance))
            }
            "eth_call" => self.eth_call(&state, &params),
            "eth_sendTransaction" => self.send_transaction(&mut state, &params),
            "eth_getTransactionReceipt" => {
                let hash = params
                    .get(0)
                    .and_then(Value::as_str)
                    .ok_or_else(|| invalid_params("eth_getTransactionReceipt expects a hash"))?;
                Ok(state.receipts.get(hash).cloned().unwrap_or(Value::Null))
            }
            "wallet_switchEthereumChain" => {
                let requested = params
                    .get(0)
                    .and_then(|p| p.get("chainId"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| invalid_params("expected [{ chainId }]"))?;
                let chain_id = parse_chain_id(requested)
                    .ok_or_else(|| invalid_params(format!("invalid chain id {}", requested)))?;
                if !state.known_chains.contains(&chain_id) {
                    return Err(rpc_error(
                        UNRECOGNIZED_CHAIN_CODE,
                        format!(
                            "Unrecognized chain ID \"{}\". Try adding the chain using wallet_addEthereumChain first.",
                            requested
                        ),
                    ));
                }
                state.chain_id = chain_id;
                Ok(Value::Null)
            }
            "wallet_addEthereumChain" => {
                let requested = params
                    .get(0)
                    .and_then(|p| p.get("chainId"))
                    .and_then(Value::as_str)
                    .and_then(parse_chain_id)
                    .ok_or_else(|| invalid_params("expected [{ chainId, ... }]"))?;
                state.known_chains.insert(requested);
                Ok(Value::Null)
            }
            other => Err(rpc_error(
                METHOD_NOT_FOUND_CODE,
                format!("The method \"{}\" does not exist / is not available.", other),
            )),
        }
    }
}
