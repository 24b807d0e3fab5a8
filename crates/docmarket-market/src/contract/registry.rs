//! Typed wrapper around the document registry contract.

use alloy::primitives::{Address, U256};
use alloy::rpc::types::TransactionReceipt;
use serde::Serialize;

use crate::error::Result;

use super::abi::IDocumentRegistry;
use super::caller::{ContractCaller, PendingTx};

/// On-chain view of a registered document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OnchainDocument {
    pub id: u64,
    pub title: String,
    pub file_url: String,
    pub description: String,
    pub creator: Address,
    pub total_supply: U256,
}

#[derive(Debug, Clone)]
pub struct RegistryContract {
    caller: ContractCaller,
}

impl RegistryContract {
    pub fn new(caller: ContractCaller) -> Self {
        Self { caller }
    }

    pub fn caller(&self) -> &ContractCaller {
        &self.caller
    }

    pub fn address(&self) -> Address {
        self.caller.address()
    }

    /// Mints `amount` units of document `id` to the connected account.
    pub async fn register_document(
        &self,
        id: u64,
        amount: u64,
        title: &str,
        file_url: &str,
        description: &str,
    ) -> Result<PendingTx> {
        let call = IDocumentRegistry::registerDocumentCall {
            id: U256::from(id),
            amount: U256::from(amount),
            title: title.to_string(),
            fileUrl: file_url.to_string(),
            description: description.to_string(),
        };
        self.caller.send(&call, U256::ZERO).await
    }

    /// Offers `amount` units at `price_wei` each. Emits `Listed`.
    pub async fn list_document(&self, id: u64, amount: u64, price_wei: U256) -> Result<PendingTx> {
        let call = IDocumentRegistry::listDocumentCall {
            id: U256::from(id),
            amount: U256::from(amount),
            price: price_wei,
        };
        self.caller.send(&call, U256::ZERO).await
    }

    /// Pays `value_wei` for `amount` units listed by `seller`. Emits `Purchased`.
    pub async fn buy_document(
        &self,
        id: u64,
        seller: Address,
        amount: u64,
        value_wei: U256,
    ) -> Result<PendingTx> {
        let call = IDocumentRegistry::buyDocumentCall {
            id: U256::from(id),
            seller,
            amount: U256::from(amount),
        };
        self.caller.send(&call, value_wei).await
    }

    pub async fn document_info(&self, id: u64) -> Result<OnchainDocument> {
        let info = self
            .caller
            .call(&IDocumentRegistry::getDocumentInfoCall { id: U256::from(id) })
            .await?;
        Ok(OnchainDocument {
            id,
            title: info.title,
            file_url: info.fileUrl,
            description: info.description,
            creator: info.creator,
            total_supply: info.totalSupply,
        })
    }

    /// Listing price per unit in wei.
    pub async fn price(&self, id: u64, seller: Address) -> Result<U256> {
        self.caller
            .call(&IDocumentRegistry::getPriceCall {
                id: U256::from(id),
                seller,
            })
            .await
    }

    pub async fn balance_of(&self, account: Address, id: u64) -> Result<U256> {
        self.caller
            .call(&IDocumentRegistry::balanceOfCall {
                account,
                id: U256::from(id),
            })
            .await
    }

    pub async fn set_approval_for_all(&self, operator: Address, approved: bool) -> Result<TransactionReceipt> {
        self.caller
            .send_and_confirm(
                &IDocumentRegistry::setApprovalForAllCall { operator, approved },
                U256::ZERO,
            )
            .await
    }

    pub async fn is_approved_for_all(&self, account: Address, operator: Address) -> Result<bool> {
        self.caller
            .call(&IDocumentRegistry::isApprovedForAllCall { account, operator })
            .await
    }

    /// Reverts if the caller already received the airdrop.
    pub async fn request_airdrop(&self) -> Result<TransactionReceipt> {
        self.caller
            .send_and_confirm(&IDocumentRegistry::requestAirdropCall {}, U256::ZERO)
            .await
    }

    pub async fn airdrop_status(&self, account: Address) -> Result<bool> {
        self.caller
            .call(&IDocumentRegistry::checkAirdropStatusCall { account })
            .await
    }

    pub async fn airdrop_amount(&self) -> Result<U256> {
        self.caller
            .call(&IDocumentRegistry::getAirdropAmountCall {})
            .await
    }

    /// Owner only.
    pub async fn set_airdrop_amount(&self, amount: U256) -> Result<TransactionReceipt> {
        self.caller
            .send_and_confirm(&IDocumentRegistry::setAirdropAmountCall { amount }, U256::ZERO)
            .await
    }

    pub async fn owner(&self) -> Result<Address> {
        self.caller.call(&IDocumentRegistry::ownerCall {}).await
    }
}
