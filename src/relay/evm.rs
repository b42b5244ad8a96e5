//! EVM JSON-RPC LedgerClient
//!
//! Talks to a Geth/Anvil-compatible node over HTTP JSON-RPC:
//! - `eth_blockNumber` for the chain head
//! - `eth_getLogs` filtered by contract address and event topic
//! - `eth_chainId`, `eth_gasPrice` and `eth_getTransactionCount` to build a
//!   legacy transaction signed locally by the relayer key
//! - `eth_sendRawTransaction` to broadcast it
//! - `eth_getTransactionReceipt` for inclusion

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::abi;
use super::error::LedgerError;
use super::ledger_client::{ContractCall, LedgerClient, RawLog, Receipt, ReceiptStatus};
use super::signer::Signer;
use super::types::TxHash;

/// HTTP request timeout for a single RPC call
pub const RPC_TIMEOUT: Duration = Duration::from_secs(30);

pub struct EvmClient {
    name: String,
    url: String,
    contract: Address,
    client: reqwest::Client,
    chain_id: OnceCell<u64>,
}

#[derive(Serialize)]
struct JsonRpcRequest<T> {
    jsonrpc: &'static str,
    method: &'static str,
    params: T,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LogFilter {
    from_block: String,
    to_block: String,
    address: Address,
    topics: Vec<B256>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct EthLog {
    transaction_hash: Option<TxHash>,
    block_number: Option<String>,
    log_index: Option<String>,
    topics: Vec<B256>,
    data: String,
    #[serde(default)]
    removed: bool,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct EthReceipt {
    transaction_hash: TxHash,
    block_number: Option<String>,
    status: Option<String>,
}

impl EvmClient {
    /// Create a client for the contract at `contract` behind `url`
    pub fn new(name: &str, url: &str, contract: Address) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .map_err(|e| {
                LedgerError::RpcConnection(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            name: name.to_string(),
            url: url.to_string(),
            contract,
            client,
            chain_id: OnceCell::new(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Bridge contract whose logs this client filters on
    pub fn contract(&self) -> Address {
        self.contract
    }

    /// Chain id, read once per client
    async fn chain_id(&self) -> Result<u64, LedgerError> {
        self.chain_id
            .get_or_try_init(|| async {
                let result: String = self.rpc_call("eth_chainId", ()).await?;
                parse_quantity(&result)
            })
            .await
            .copied()
    }

    /// JSON-RPC call whose `result` may legitimately be `null`
    async fn rpc_call_optional<T, R>(
        &self,
        method: &'static str,
        params: T,
    ) -> Result<Option<R>, LedgerError>
    where
        T: Serialize + Send,
        R: DeserializeOwned,
    {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: 1,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LedgerError::RpcConnection(format!("HTTP request failed: {}", e)))?;

        let rpc_response: JsonRpcResponse<R> = response
            .json()
            .await
            .map_err(|e| LedgerError::Parse(format!("Failed to parse {} response: {}", method, e)))?;

        if let Some(error) = rpc_response.error {
            return Err(LedgerError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        Ok(rpc_response.result)
    }

    async fn rpc_call<T, R>(&self, method: &'static str, params: T) -> Result<R, LedgerError>
    where
        T: Serialize + Send,
        R: DeserializeOwned,
    {
        self.rpc_call_optional(method, params)
            .await?
            .ok_or_else(|| LedgerError::Parse(format!("No result in {} response", method)))
    }

    /// Decode a log batch. One unreadable deposit fails the whole batch so the
    /// cursor holds instead of moving past it.
    fn decode_logs(endpoint: &str, logs: Vec<EthLog>) -> Result<Vec<RawLog>, LedgerError> {
        let mut decoded = Vec::with_capacity(logs.len());
        for log in logs {
            let tx_hash = log.transaction_hash;
            match Self::decode_log(log) {
                Ok(Some(raw)) => decoded.push(raw),
                Ok(None) => {}
                Err(e) => {
                    warn!(endpoint, tx = ?tx_hash, error = %e, "Undecodable deposit log");
                    return Err(e);
                }
            }
        }
        Ok(decoded)
    }

    fn decode_receipt(receipt: EthReceipt) -> Result<Option<Receipt>, LedgerError> {
        // Some nodes return a receipt skeleton before inclusion
        let Some(block_number) = receipt.block_number else {
            return Ok(None);
        };

        // Pre-Byzantium receipts carry a state root instead of a status; treat
        // them as unreadable rather than guess an outcome
        let status = match receipt.status.as_deref().map(parse_quantity).transpose()? {
            Some(1) => ReceiptStatus::Success,
            Some(0) => ReceiptStatus::Failure,
            other => {
                return Err(LedgerError::Parse(format!(
                    "Receipt for {} has no usable status: {:?}",
                    receipt.transaction_hash, other
                )));
            }
        };

        Ok(Some(Receipt {
            tx_hash: receipt.transaction_hash,
            status,
            block_number: parse_quantity(&block_number)?,
        }))
    }

    fn decode_log(log: EthLog) -> Result<Option<RawLog>, LedgerError> {
        if log.removed {
            return Ok(None);
        }

        // Pending logs carry no block or tx yet
        let (Some(tx_hash), Some(block_number)) = (log.transaction_hash, log.block_number) else {
            return Ok(None);
        };

        let payload = abi::decode_deposit(&log.topics, &decode_hex(&log.data)?)?;

        Ok(Some(RawLog {
            tx_hash,
            block_number: parse_quantity(&block_number)?,
            log_index: log
                .log_index
                .as_deref()
                .map(parse_quantity)
                .transpose()?
                .unwrap_or(0),
            payload,
        }))
    }
}

#[async_trait]
impl LedgerClient for EvmClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn current_block_height(&self) -> Result<u64, LedgerError> {
        let result: String = self.rpc_call("eth_blockNumber", ()).await?;
        parse_quantity(&result)
    }

    async fn fetch_logs(
        &self,
        event_name: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, LedgerError> {
        let signature = abi::event_signature(event_name)
            .ok_or_else(|| LedgerError::UnknownEvent(event_name.to_string()))?;

        let filter = LogFilter {
            from_block: format!("0x{:x}", from_block),
            to_block: format!("0x{:x}", to_block),
            address: self.contract,
            topics: vec![abi::event_topic(signature)],
        };

        let logs: Vec<EthLog> = self.rpc_call("eth_getLogs", [filter]).await?;
        debug!(
            endpoint = %self.name,
            from_block,
            to_block,
            count = logs.len(),
            "Fetched logs"
        );

        Self::decode_logs(&self.name, logs)
    }

    async fn pending_nonce(&self, account: Address) -> Result<u64, LedgerError> {
        let result: String = self
            .rpc_call("eth_getTransactionCount", (account, "pending"))
            .await?;
        parse_quantity(&result)
    }

    async fn submit_transaction(
        &self,
        call: &ContractCall,
        signer: &Signer,
    ) -> Result<TxHash, LedgerError> {
        let chain_id = self.chain_id().await?;
        let gas_price: String = self.rpc_call("eth_gasPrice", ()).await?;
        let signed = signer
            .sign_call(call, chain_id, parse_wei(&gas_price)?)
            .await?;
        let raw = format!("0x{}", hex::encode(&signed.raw));

        match self.rpc_call::<_, TxHash>("eth_sendRawTransaction", [raw]).await {
            Ok(tx) => Ok(tx),
            // Same bytes already in the mempool, e.g. resent after a lost answer
            Err(LedgerError::Rpc { message, .. }) if is_already_known(&message) => {
                debug!(endpoint = %self.name, tx = %signed.hash, "Transaction already known");
                Ok(signed.hash)
            }
            Err(LedgerError::RpcConnection(reason)) | Err(LedgerError::Parse(reason)) => {
                Err(LedgerError::SubmissionUnconfirmed {
                    tx: signed.hash,
                    reason,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn get_receipt(&self, tx: TxHash) -> Result<Option<Receipt>, LedgerError> {
        let receipt: Option<EthReceipt> = self
            .rpc_call_optional("eth_getTransactionReceipt", [tx])
            .await?;

        match receipt {
            Some(receipt) => Self::decode_receipt(receipt),
            None => Ok(None),
        }
    }
}

/// Parse a `0x`-prefixed hex quantity
pub fn parse_quantity(value: &str) -> Result<u64, LedgerError> {
    u64::from_str_radix(value.trim_start_matches("0x"), 16)
        .map_err(|e| LedgerError::Parse(format!("Invalid quantity {:?}: {}", value, e)))
}

/// Parse a `0x`-prefixed wei amount
fn parse_wei(value: &str) -> Result<u128, LedgerError> {
    u128::from_str_radix(value.trim_start_matches("0x"), 16)
        .map_err(|e| LedgerError::Parse(format!("Invalid wei amount {:?}: {}", value, e)))
}

fn is_already_known(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("already known") || message.contains("known transaction")
}

fn decode_hex(value: &str) -> Result<Vec<u8>, LedgerError> {
    hex::decode(value.trim_start_matches("0x"))
        .map_err(|e| LedgerError::Parse(format!("Invalid hex data: {}", e)))
}

/// Parse a contract or account address from configuration
pub fn parse_address(value: &str) -> Result<Address, LedgerError> {
    Address::from_str(value.trim())
        .map_err(|e| LedgerError::Parse(format!("Invalid address {:?}: {}", value, e)))
}
