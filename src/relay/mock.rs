//! In-memory ledger for tests and local dry runs
//!
//! `MockLedger` behaves like a chain node: it has a height, a list of deposit
//! logs, and records submitted calls. Failure modes are switched on per test.

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::alert::{Alert, AlertSink};
use super::error::LedgerError;
use super::ledger_client::{ContractCall, LedgerClient, RawLog, Receipt, ReceiptStatus};
use super::signer::Signer;
use super::types::{DepositPayload, TxHash};

/// Deterministic transaction hash for test fixtures
pub fn tx_hash(n: u64) -> TxHash {
    TxHash::left_padding_from(&n.to_be_bytes())
}

/// How the mock resolves submitted transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptMode {
    Success,
    Revert,
    /// Never included
    Pending,
}

#[derive(Debug)]
struct MockState {
    height: u64,
    logs: Vec<RawLog>,
    fail_height: bool,
    fail_fetch: bool,
    fail_fetch_from: Option<u64>,
    undecodable_logs: bool,
    submit_error: Option<String>,
    submit_unconfirmed: bool,
    fail_receipt: bool,
    receipt_mode: ReceiptMode,
    nonce: u64,
    receipts: HashMap<TxHash, Receipt>,
    submissions: Vec<(TxHash, ContractCall)>,
    fetch_ranges: Vec<(u64, u64)>,
    next_tx: u64,
}

pub struct MockLedger {
    name: String,
    state: Mutex<MockState>,
    submit_count: AtomicUsize,
    fetch_count: AtomicUsize,
}

impl MockLedger {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(MockState {
                height: 0,
                logs: Vec::new(),
                fail_height: false,
                fail_fetch: false,
                fail_fetch_from: None,
                undecodable_logs: false,
                submit_error: None,
                submit_unconfirmed: false,
                fail_receipt: false,
                receipt_mode: ReceiptMode::Success,
                nonce: 0,
                receipts: HashMap::new(),
                submissions: Vec::new(),
                fetch_ranges: Vec::new(),
                next_tx: 0x1000,
            }),
            submit_count: AtomicUsize::new(0),
            fetch_count: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_height(&self, height: u64) {
        self.state().height = height;
    }

    /// Add a `TokensDeposited` log and return its source tx hash
    pub fn add_deposit(&self, n: u64, block_number: u64, recipient: Address, amount: u64) -> TxHash {
        let tx = tx_hash(n);
        self.state().logs.push(RawLog {
            tx_hash: tx,
            block_number,
            log_index: 0,
            payload: DepositPayload {
                sender: Address::repeat_byte(0x5e),
                recipient,
                amount: U256::from(amount),
            },
        });
        tx
    }

    /// Drop logs from blocks above `height` (a reorg that removed them)
    pub fn reorg_to(&self, height: u64) {
        let mut state = self.state();
        state.logs.retain(|log| log.block_number <= height);
        state.height = height;
    }

    pub fn set_fail_height(&self, fail: bool) {
        self.state().fail_height = fail;
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.state().fail_fetch = fail;
    }

    /// Only fetches whose range starts at `block` fail
    pub fn set_fail_fetch_from(&self, block: Option<u64>) {
        self.state().fail_fetch_from = block;
    }

    /// Log fetches return a deposit the client cannot decode
    pub fn set_undecodable_logs(&self, undecodable: bool) {
        self.state().undecodable_logs = undecodable;
    }

    /// The node refuses every submission with `error`
    pub fn set_submit_error(&self, error: Option<&str>) {
        self.state().submit_error = error.map(str::to_string);
    }

    /// Submissions are accepted but the answer is lost on the way back
    pub fn set_submit_unconfirmed(&self, lost: bool) {
        self.state().submit_unconfirmed = lost;
    }

    /// Receipt lookups fail with a connection error
    pub fn set_fail_receipt(&self, fail: bool) {
        self.state().fail_receipt = fail;
    }

    pub fn set_receipt_mode(&self, mode: ReceiptMode) {
        self.state().receipt_mode = mode;
    }

    /// Include a previously pending transaction with the given status
    pub fn land(&self, tx: TxHash, status: ReceiptStatus) {
        let mut state = self.state();
        let block_number = state.height;
        state.receipts.insert(
            tx,
            Receipt {
                tx_hash: tx,
                status,
                block_number,
            },
        );
    }

    pub fn submit_count(&self) -> usize {
        self.submit_count.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> Vec<(TxHash, ContractCall)> {
        self.state().submissions.clone()
    }

    pub fn fetch_ranges(&self) -> Vec<(u64, u64)> {
        self.state().fetch_ranges.clone()
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    fn name(&self) -> &str {
        &self.name
    }

    async fn current_block_height(&self) -> Result<u64, LedgerError> {
        let state = self.state();
        if state.fail_height {
            return Err(LedgerError::RpcConnection("mock: height unavailable".to_string()));
        }
        Ok(state.height)
    }

    async fn fetch_logs(
        &self,
        _event_name: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, LedgerError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        if state.fail_fetch || state.fail_fetch_from == Some(from_block) {
            return Err(LedgerError::RpcConnection("mock: eth_getLogs failed".to_string()));
        }
        if state.undecodable_logs {
            return Err(LedgerError::Parse("mock: TokensDeposited data too short".to_string()));
        }
        state.fetch_ranges.push((from_block, to_block));

        Ok(state
            .logs
            .iter()
            .filter(|log| (from_block..=to_block).contains(&log.block_number))
            .cloned()
            .collect())
    }

    async fn pending_nonce(&self, _account: Address) -> Result<u64, LedgerError> {
        Ok(self.state().nonce)
    }

    async fn submit_transaction(
        &self,
        call: &ContractCall,
        _signer: &Signer,
    ) -> Result<TxHash, LedgerError> {
        self.submit_count.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        if let Some(error) = &state.submit_error {
            return Err(LedgerError::Rpc {
                code: -32000,
                message: error.clone(),
            });
        }

        state.next_tx += 1;
        let tx = tx_hash(state.next_tx);
        state.submissions.push((tx, call.clone()));
        state.nonce = state.nonce.max(call.nonce + 1);

        let status = match state.receipt_mode {
            ReceiptMode::Success => Some(ReceiptStatus::Success),
            ReceiptMode::Revert => Some(ReceiptStatus::Failure),
            ReceiptMode::Pending => None,
        };
        if let Some(status) = status {
            let block_number = state.height;
            state.receipts.insert(
                tx,
                Receipt {
                    tx_hash: tx,
                    status,
                    block_number,
                },
            );
        }

        if state.submit_unconfirmed {
            return Err(LedgerError::SubmissionUnconfirmed {
                tx,
                reason: "mock: response lost".to_string(),
            });
        }
        Ok(tx)
    }

    async fn get_receipt(&self, tx: TxHash) -> Result<Option<Receipt>, LedgerError> {
        let state = self.state();
        if state.fail_receipt {
            return Err(LedgerError::RpcConnection(
                "mock: eth_getTransactionReceipt failed".to_string(),
            ));
        }
        Ok(state.receipts.get(&tx).copied())
    }

    /// Resolves immediately: a missing receipt is reported as a timeout.
    async fn await_receipt(&self, tx: TxHash, _timeout: Duration) -> Result<Receipt, LedgerError> {
        self.get_receipt(tx)
            .await?
            .ok_or(LedgerError::ReceiptTimeout(tx))
    }
}

/// Collects alerts for assertions
#[derive(Debug, Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlertSink {
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AlertSink for RecordingAlertSink {
    fn alert(&self, alert: &Alert) {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(alert.clone());
    }
}
