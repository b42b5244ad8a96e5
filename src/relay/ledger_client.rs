use alloy_primitives::Address;
use async_trait::async_trait;
use std::time::Duration;

use super::error::LedgerError;
use super::signer::Signer;
use super::types::{DepositPayload, TxHash};

/// Interval between receipt lookups in the default `await_receipt`
pub const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Narrow capability interface to one chain
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Endpoint label for logging (e.g. "source", "destination")
    fn name(&self) -> &str;

    /// Latest block height known to the node
    async fn current_block_height(&self) -> Result<u64, LedgerError>;

    /// Decoded logs of `event_name` in the inclusive range `[from_block, to_block]`
    async fn fetch_logs(
        &self,
        event_name: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, LedgerError>;

    /// Next nonce for `account`, counting transactions still in the mempool
    async fn pending_nonce(&self, account: Address) -> Result<u64, LedgerError>;

    /// Submit `call` signed by `signer`, returning the pending transaction hash
    async fn submit_transaction(
        &self,
        call: &ContractCall,
        signer: &Signer,
    ) -> Result<TxHash, LedgerError>;

    /// Receipt of `tx` if it has been included, `None` otherwise
    async fn get_receipt(&self, tx: TxHash) -> Result<Option<Receipt>, LedgerError>;

    /// Wait for inclusion of `tx`, bounded by `timeout`
    async fn await_receipt(&self, tx: TxHash, timeout: Duration) -> Result<Receipt, LedgerError> {
        let poll = async {
            loop {
                if let Some(receipt) = self.get_receipt(tx).await? {
                    return Ok::<_, LedgerError>(receipt);
                }
                tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
            }
        };

        match tokio::time::timeout(timeout, poll).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::ReceiptTimeout(tx)),
        }
    }
}

/// A decoded event log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub log_index: u64,
    pub payload: DepositPayload,
}

/// A contract invocation to submit on a chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub to: Address,
    pub data: Vec<u8>,
    pub gas_limit: u64,
    pub nonce: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub status: ReceiptStatus,
    pub block_number: u64,
}

impl Receipt {
    pub fn is_success(&self) -> bool {
        self.status == ReceiptStatus::Success
    }
}
