//! Call and transaction plumbing shared by the contract wrappers.
//!
//! Reads are `eth_call` round-trips. Writes go through `eth_sendTransaction`
//! (the provider signs) and then poll `eth_getTransactionReceipt` until the
//! transaction is mined.

use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::rpc::types::{TransactionInput, TransactionReceipt, TransactionRequest};
use alloy::sol_types::SolCall;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::error::{ChainError, Result};
use crate::wallet::{Eip1193Provider, WalletGateway};

/// True when any log of `receipt` has `signature` as its first topic.
pub fn emitted(receipt: &TransactionReceipt, signature: B256) -> bool {
    receipt
        .inner
        .logs()
        .iter()
        .any(|log| log.topics().first() == Some(&signature))
}

fn decode<T: DeserializeOwned>(method: &str, value: Value) -> std::result::Result<T, ChainError> {
    serde_json::from_value(value).map_err(|e| ChainError::Malformed(format!("{}: {}", method, e)))
}

fn encode<T: serde::Serialize>(tx: &T) -> std::result::Result<Value, ChainError> {
    serde_json::to_value(tx).map_err(|e| ChainError::Malformed(e.to_string()))
}

/// Fetches a receipt once. `None` means the transaction is not mined yet.
pub async fn fetch_receipt(
    provider: &dyn Eip1193Provider,
    tx_hash: &str,
) -> std::result::Result<Option<TransactionReceipt>, ChainError> {
    let value = provider
        .request("eth_getTransactionReceipt", json!([tx_hash]))
        .await?;
    decode("eth_getTransactionReceipt", value)
}

/// A transaction the provider accepted but that may not be mined yet.
pub struct PendingTx {
    tx_hash: String,
    provider: Arc<dyn Eip1193Provider>,
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for PendingTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTx").field("tx_hash", &self.tx_hash).finish()
    }
}

impl PendingTx {
    pub fn tx_hash(&self) -> &str {
        &self.tx_hash
    }

    /// Waits until the transaction is mined.
    ///
    /// A receipt with failed status is [`ChainError::Reverted`].
    pub async fn get_receipt(self) -> Result<TransactionReceipt> {
        let started = Instant::now();
        loop {
            if let Some(receipt) = fetch_receipt(self.provider.as_ref(), &self.tx_hash).await? {
                if !receipt.status() {
                    tracing::warn!(tx_hash = %self.tx_hash, "transaction reverted");
                    return Err(ChainError::Reverted {
                        tx_hash: self.tx_hash,
                    }
                    .into());
                }
                tracing::debug!(
                    tx_hash = %self.tx_hash,
                    block = ?receipt.block_number,
                    "transaction mined"
                );
                return Ok(receipt);
            }
            if let Some(timeout) = self.timeout {
                if started.elapsed() >= timeout {
                    return Err(ChainError::ConfirmationTimeout {
                        waited: timeout,
                        tx_hash: self.tx_hash,
                    }
                    .into());
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Sends calls to one contract address through the wallet's provider.
#[derive(Clone)]
pub struct ContractCaller {
    wallet: Arc<WalletGateway>,
    address: Address,
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for ContractCaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContractCaller")
            .field("address", &self.address)
            .finish()
    }
}

impl ContractCaller {
    pub fn new(
        wallet: Arc<WalletGateway>,
        address: Address,
        poll_interval: Duration,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            wallet,
            address,
            poll_interval,
            timeout,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn wallet(&self) -> &Arc<WalletGateway> {
        &self.wallet
    }

    fn request_for<C: SolCall>(&self, call: &C) -> TransactionRequest {
        TransactionRequest::default()
            .to(self.address)
            .input(TransactionInput::both(call.abi_encode().into()))
    }

    /// Runs a read-only call against the latest block.
    pub async fn call<C: SolCall>(&self, call: &C) -> Result<C::Return> {
        let provider = self.wallet.provider()?;
        let mut tx = self.request_for(call);
        if let Some(from) = self
            .wallet
            .account()
            .ok()
            .and_then(|account| account.parse::<Address>().ok())
        {
            tx = tx.from(from);
        }
        let value = provider
            .request("eth_call", json!([encode(&tx)?, "latest"]))
            .await?;
        let data: Bytes = decode("eth_call", value)?;
        C::abi_decode_returns(&data).map_err(|e| ChainError::Abi(e.to_string()).into())
    }

    /// Submits a transaction from the connected account.
    pub async fn send<C: SolCall>(&self, call: &C, value: U256) -> Result<PendingTx> {
        let signer = self.wallet.signer()?;
        let mut tx = self.request_for(call).from(signer.address);
        if !value.is_zero() {
            tx = tx.value(value);
        }

        let result = signer
            .provider
            .request("eth_sendTransaction", json!([encode(&tx)?]))
            .await?;
        let tx_hash = decode::<B256>("eth_sendTransaction", result)?.to_string();
        tracing::debug!(%tx_hash, to = %self.address, "transaction submitted");

        Ok(PendingTx {
            tx_hash,
            provider: signer.provider,
            poll_interval: self.poll_interval,
            timeout: self.timeout,
        })
    }

    /// Submits and waits for the receipt.
    pub async fn send_and_confirm<C: SolCall>(
        &self,
        call: &C,
        value: U256,
    ) -> Result<TransactionReceipt> {
        self.send(call, value).await?.get_receipt().await
    }

    /// Reads a receipt once without waiting.
    pub async fn receipt(&self, tx_hash: &str) -> Result<Option<TransactionReceipt>> {
        let provider = self.wallet.provider()?;
        Ok(fetch_receipt(provider.as_ref(), tx_hash).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_receipt(status: &str, topic: B256) -> Value {
        let hash = B256::repeat_byte(0x01).to_string();
        let block = B256::repeat_byte(0x02).to_string();
        json!({
            "type": "0x2",
            "status": status,
            "cumulativeGasUsed": "0x5208",
            "logsBloom": format!("0x{}", "0".repeat(512)),
            "logs": [{
                "address": "0x00000000000000000000000000000000000000aa",
                "topics": [topic.to_string()],
                "data": "0x0102",
                "blockHash": block,
                "blockNumber": "0x10",
                "transactionHash": hash,
                "transactionIndex": "0x0",
                "logIndex": "0x0",
                "removed": false
            }],
            "transactionHash": hash,
            "transactionIndex": "0x0",
            "blockHash": block,
            "blockNumber": "0x10",
            "gasUsed": "0x5208",
            "effectiveGasPrice": "0x1",
            "from": "0x00000000000000000000000000000000000000bb",
            "to": "0x00000000000000000000000000000000000000aa",
            "contractAddress": null
        })
    }

    #[test]
    fn test_node_receipt_decodes() {
        let topic = B256::repeat_byte(0x11);
        let receipt: TransactionReceipt =
            decode("eth_getTransactionReceipt", node_receipt("0x1", topic)).unwrap();
        assert!(receipt.status());
        assert_eq!(receipt.block_number, Some(16));
        assert_eq!(receipt.transaction_hash, B256::repeat_byte(0x01));
        assert!(emitted(&receipt, topic));
        assert!(!emitted(&receipt, B256::ZERO));
        assert_eq!(receipt.inner.logs()[0].data().data.as_ref(), &[1u8, 2]);
    }

    #[test]
    fn test_failed_receipt_status() {
        let receipt: TransactionReceipt =
            decode("eth_getTransactionReceipt", node_receipt("0x0", B256::ZERO)).unwrap();
        assert!(!receipt.status());
    }

    #[test]
    fn test_receipt_missing_fields_is_malformed() {
        let err = decode::<Option<TransactionReceipt>>(
            "eth_getTransactionReceipt",
            json!({"status": "0x1"}),
        )
        .unwrap_err();
        assert!(matches!(err, ChainError::Malformed(_)));

        let pending: Option<TransactionReceipt> =
            decode("eth_getTransactionReceipt", Value::Null).unwrap();
        assert!(pending.is_none());
    }

    #[test]
    fn test_request_encodes_input_and_value() {
        let tx = TransactionRequest::default()
            .to(Address::repeat_byte(0x10))
            .from(Address::repeat_byte(0xaa))
            .value(U256::from(255))
            .input(TransactionInput::both(vec![0xde, 0xad].into()));
        let value = encode(&tx).unwrap();
        assert_eq!(value["value"], "0xff");
        assert_eq!(value["input"], "0xdead");
        assert_eq!(value["data"], "0xdead");
    }
}
