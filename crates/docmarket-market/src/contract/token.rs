//! Typed wrapper around a generic ERC-20 token.

use alloy::primitives::{Address, U256};
use alloy::rpc::types::TransactionReceipt;
use serde::Serialize;

use crate::error::Result;

use super::abi::IERC20;
use super::caller::ContractCaller;
use super::units::format_units;

/// Token metadata used to format amounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenInfo {
    pub address: Address,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

impl TokenInfo {
    pub fn format(&self, amount: U256) -> String {
        format!("{} {}", format_units(amount, self.decimals), self.symbol)
    }
}

#[derive(Debug, Clone)]
pub struct TokenContract {
    caller: ContractCaller,
}

impl TokenContract {
    pub fn new(caller: ContractCaller) -> Self {
        Self { caller }
    }

    pub fn address(&self) -> Address {
        self.caller.address()
    }

    pub async fn name(&self) -> Result<String> {
        self.caller.call(&IERC20::nameCall {}).await
    }

    pub async fn symbol(&self) -> Result<String> {
        self.caller.call(&IERC20::symbolCall {}).await
    }

    pub async fn decimals(&self) -> Result<u8> {
        self.caller.call(&IERC20::decimalsCall {}).await
    }

    pub async fn info(&self) -> Result<TokenInfo> {
        Ok(TokenInfo {
            address: self.address(),
            name: self.name().await?,
            symbol: self.symbol().await?,
            decimals: self.decimals().await?,
        })
    }

    pub async fn total_supply(&self) -> Result<U256> {
        self.caller.call(&IERC20::totalSupplyCall {}).await
    }

    pub async fn balance_of(&self, account: Address) -> Result<U256> {
        self.caller.call(&IERC20::balanceOfCall { account }).await
    }

    pub async fn allowance(&self, owner: Address, spender: Address) -> Result<U256> {
        self.caller
            .call(&IERC20::allowanceCall { owner, spender })
            .await
    }

    pub async fn approve(&self, spender: Address, value: U256) -> Result<TransactionReceipt> {
        self.caller
            .send_and_confirm(&IERC20::approveCall { spender, value }, U256::ZERO)
            .await
    }

    pub async fn transfer(&self, to: Address, value: U256) -> Result<TransactionReceipt> {
        self.caller
            .send_and_confirm(&IERC20::transferCall { to, value }, U256::ZERO)
            .await
    }

    pub async fn transfer_from(&self, from: Address, to: Address, value: U256) -> Result<TransactionReceipt> {
        self.caller
            .send_and_confirm(&IERC20::transferFromCall { from, to, value }, U256::ZERO)
            .await
    }
}
