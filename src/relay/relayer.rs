//! Relayer
//!
//! Turns one confirmed source deposit into a `mintBridgedTokens` call on the
//! destination chain, submits it and waits (bounded) for inclusion.
//!
//! Each deposit owns one destination nonce from its first broadcast until a
//! transaction under that nonce is included. Every hash broadcast under it is
//! kept on the event. The next attempt looks all of them up first and only
//! resubmits, with the same nonce, when none has landed. At most one of them
//! can ever be included, so a late landing and a resubmission cannot both
//! mint.

use alloy_primitives::{Address, U256};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{info, warn};

use super::abi;
use super::error::{LedgerError, RelayFailure};
use super::ledger_client::{ContractCall, LedgerClient};
use super::signer::Signer;
use super::types::{TrackedEvent, TxHash};

#[derive(Debug, Clone)]
pub struct RelayerConfig {
    pub contract: Address,
    pub signer: Signer,
    pub receipt_timeout: Duration,
    pub gas_limit: u64,
}

pub struct Relayer {
    client: Arc<dyn LedgerClient>,
    config: RelayerConfig,
    /// Lowest nonce not yet handed to a deposit by this process
    next_nonce: AtomicU64,
}

impl Relayer {
    pub fn new(client: Arc<dyn LedgerClient>, config: RelayerConfig) -> Self {
        Self {
            client,
            config,
            next_nonce: AtomicU64::new(0),
        }
    }

    pub fn signer(&self) -> &Signer {
        &self.config.signer
    }

    /// Destination call for `event`, before a nonce is assigned
    pub fn build_call(&self, event: &TrackedEvent) -> Result<ContractCall, RelayFailure> {
        let payload = &event.payload;
        if payload.recipient == Address::ZERO {
            return Err(RelayFailure::InvalidEvent("recipient is the zero address".to_string()));
        }
        if payload.amount == U256::ZERO {
            return Err(RelayFailure::InvalidEvent("amount is zero".to_string()));
        }

        Ok(ContractCall {
            to: self.config.contract,
            data: abi::encode_mint(payload.recipient, payload.amount, event.source_tx),
            gas_limit: self.config.gas_limit,
            nonce: event.nonce.unwrap_or_default(),
        })
    }

    /// Relay `event`, returning the destination transaction hash on success.
    ///
    /// The attempt records its nonce and broadcasts on `event`; callers keep
    /// them for the next attempt whatever the result.
    pub async fn relay(&self, event: &mut TrackedEvent) -> Result<TxHash, RelayFailure> {
        if let Some(landed) = self.resolve_pending(event).await? {
            return Ok(landed);
        }

        let mut call = self.build_call(event)?;
        let nonce = match event.nonce {
            Some(nonce) => nonce,
            None => self.reserve_nonce().await?,
        };
        event.nonce = Some(nonce);
        call.nonce = nonce;

        info!(
            source_tx = %event.source_tx,
            recipient = %event.payload.recipient,
            amount = %event.payload.amount,
            nonce,
            attempt = event.retry_count + 1,
            "Submitting mint"
        );

        let tx = match self
            .client
            .submit_transaction(&call, &self.config.signer)
            .await
        {
            Ok(tx) => tx,
            Err(e) => {
                self.handle_submit_error(event, nonce, &e);
                return Err(RelayFailure::SubmissionFailed(e.to_string()));
            }
        };
        track(event, tx);

        info!(source_tx = %event.source_tx, dest_tx = %tx, nonce, "Mint submitted");

        match self
            .client
            .await_receipt(tx, self.config.receipt_timeout)
            .await
        {
            Ok(receipt) if receipt.is_success() => {
                info!(
                    source_tx = %event.source_tx,
                    dest_tx = %tx,
                    block = receipt.block_number,
                    "Mint included"
                );
                Ok(tx)
            }
            Ok(receipt) => {
                warn!(
                    source_tx = %event.source_tx,
                    dest_tx = %tx,
                    block = receipt.block_number,
                    "Mint reverted"
                );
                event.clear_pending();
                Err(RelayFailure::Reverted { tx })
            }
            // Submitted but unobserved: the outcome is unknown either way
            Err(e) => {
                if !matches!(e, LedgerError::ReceiptTimeout(_)) {
                    warn!(dest_tx = %tx, error = %e, "Receipt lookup failed");
                }
                Err(RelayFailure::Timeout {
                    tx,
                    waited_secs: self.config.receipt_timeout.as_secs(),
                })
            }
        }
    }

    /// Look up every transaction broadcast for `event` by earlier attempts.
    /// `Ok(None)` means none has landed and a resubmission is needed. A
    /// failed lookup leaves the broadcasts on the event untouched.
    async fn resolve_pending(&self, event: &mut TrackedEvent) -> Result<Option<TxHash>, RelayFailure> {
        for tx in event.pending_txs.clone() {
            let receipt = self.client.get_receipt(tx).await.map_err(|e| {
                RelayFailure::SubmissionFailed(format!("receipt lookup for {} failed: {}", tx, e))
            })?;

            match receipt {
                Some(receipt) if receipt.is_success() => {
                    info!(
                        source_tx = %event.source_tx,
                        dest_tx = %tx,
                        "Earlier mint landed after timeout"
                    );
                    return Ok(Some(tx));
                }
                Some(_) => {
                    warn!(source_tx = %event.source_tx, dest_tx = %tx, "Earlier mint reverted");
                    event.clear_pending();
                    return Err(RelayFailure::Reverted { tx });
                }
                None => {}
            }
        }

        if !event.pending_txs.is_empty() {
            warn!(
                source_tx = %event.source_tx,
                broadcasts = event.pending_txs.len(),
                nonce = ?event.nonce,
                "Earlier mints still not included, resubmitting"
            );
        }
        Ok(None)
    }

    /// Keep or give back the nonce after a failed submission
    fn handle_submit_error(&self, event: &mut TrackedEvent, nonce: u64, error: &LedgerError) {
        match error {
            LedgerError::SubmissionUnconfirmed { tx, .. } => {
                warn!(source_tx = %event.source_tx, dest_tx = %tx, "Mint broadcast unconfirmed");
                track(event, *tx);
            }
            // Spent by a transaction we never saw; the next attempt takes a new one
            LedgerError::Rpc { message, .. } if is_nonce_too_low(message) => {
                warn!(source_tx = %event.source_tx, nonce, "Nonce already used, dropping it");
                event.nonce = None;
            }
            // Refused before anything went out under this nonce
            _ if event.pending_txs.is_empty() => {
                self.release_nonce(nonce);
                event.nonce = None;
            }
            _ => {}
        }
    }

    async fn reserve_nonce(&self) -> Result<u64, RelayFailure> {
        let pending = self
            .client
            .pending_nonce(self.config.signer.address())
            .await
            .map_err(|e| RelayFailure::SubmissionFailed(format!("nonce lookup failed: {}", e)))?;

        let nonce = pending.max(self.next_nonce.load(Ordering::Acquire));
        self.next_nonce.store(nonce + 1, Ordering::Release);
        Ok(nonce)
    }

    /// Hand `nonce` back if it is still the most recent reservation
    fn release_nonce(&self, nonce: u64) {
        let _ = self.next_nonce.compare_exchange(
            nonce + 1,
            nonce,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

fn track(event: &mut TrackedEvent, tx: TxHash) {
    if !event.pending_txs.contains(&tx) {
        event.pending_txs.push(tx);
    }
}

fn is_nonce_too_low(message: &str) -> bool {
    message.to_ascii_lowercase().contains("nonce too low")
}
