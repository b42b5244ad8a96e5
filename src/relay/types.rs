//! Tracked Event State Machine
//!
//! Lifecycle of a source deposit inside the relay:
//!
//! ```text
//! DETECTED -> AWAITING_CONFIRMATION -> CONFIRMED -> RELAY_IN_FLIGHT -> RELAYED
//!                                                        |
//!                                                        v
//!                                        RELAY_FAILED(retryable) --retry--> RELAY_IN_FLIGHT
//!                                        RELAY_FAILED(terminal)
//! ```
//!
//! An event leaves the tracked set only from a terminal state, and only once
//! its outcome is in the idempotency ledger. Confirmation never removes it.

use alloy_primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use std::fmt;

/// Transaction identifier on either chain.
pub type TxHash = B256;

/// Decoded `TokensDeposited` arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositPayload {
    pub sender: Address,
    pub recipient: Address,
    pub amount: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    Retryable,
    Terminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayState {
    Detected,
    AwaitingConfirmation,
    Confirmed,
    RelayInFlight,
    Relayed,
    RelayFailed(FailureClass),
}

impl RelayState {
    /// No more transitions possible
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RelayState::Relayed | RelayState::RelayFailed(FailureClass::Terminal)
        )
    }

    /// Confirmed and waiting for a (first or repeated) relay attempt
    #[inline]
    pub fn is_ready_for_relay(&self) -> bool {
        matches!(
            self,
            RelayState::Confirmed | RelayState::RelayFailed(FailureClass::Retryable)
        )
    }

    pub fn can_transition_to(&self, next: RelayState) -> bool {
        use RelayState::*;
        matches!(
            (self, next),
            (Detected, AwaitingConfirmation)
                | (AwaitingConfirmation, Confirmed)
                | (Confirmed, RelayInFlight)
                | (RelayFailed(FailureClass::Retryable), RelayInFlight)
                | (RelayInFlight, Relayed)
                | (RelayInFlight, RelayFailed(_))
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RelayState::Detected => "DETECTED",
            RelayState::AwaitingConfirmation => "AWAITING_CONFIRMATION",
            RelayState::Confirmed => "CONFIRMED",
            RelayState::RelayInFlight => "RELAY_IN_FLIGHT",
            RelayState::Relayed => "RELAYED",
            RelayState::RelayFailed(FailureClass::Retryable) => "RELAY_FAILED(retryable)",
            RelayState::RelayFailed(FailureClass::Terminal) => "RELAY_FAILED(terminal)",
        }
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A source deposit followed through confirmation and relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedEvent {
    pub source_tx: TxHash,
    pub block_number: u64,
    pub log_index: u64,
    pub payload: DepositPayload,
    pub state: RelayState,
    pub retry_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Destination transaction of the successful mint
    pub dest_tx: Option<TxHash>,
    /// Destination nonce reserved for this deposit, reused by every
    /// resubmission until one of its transactions is included
    pub nonce: Option<u64>,
    /// Destination transactions broadcast under `nonce` whose fate is unknown
    pub pending_txs: Vec<TxHash>,
    pub last_error: Option<String>,
}

impl TrackedEvent {
    pub fn detected(source_tx: TxHash, block_number: u64, log_index: u64, payload: DepositPayload) -> Self {
        Self {
            source_tx,
            block_number,
            log_index,
            payload,
            state: RelayState::Detected,
            retry_count: 0,
            last_attempt_at: None,
            dest_tx: None,
            nonce: None,
            pending_txs: Vec::new(),
            last_error: None,
        }
    }

    /// Blocks on top of the originating block at chain height `height`
    #[inline]
    pub fn age(&self, height: u64) -> u64 {
        height.saturating_sub(self.block_number)
    }

    /// Forget the reserved nonce and its broadcasts once the nonce is spent
    /// by an included transaction
    pub fn clear_pending(&mut self) {
        self.nonce = None;
        self.pending_txs.clear();
    }

    /// Move to `next`, returning the previous state on an illegal transition.
    pub fn transition(&mut self, next: RelayState) -> Result<(), RelayState> {
        if !self.state.can_transition_to(next) {
            return Err(self.state);
        }
        self.state = next;
        Ok(())
    }
}
