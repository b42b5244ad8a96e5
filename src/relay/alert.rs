//! Operator Alerts
//!
//! Conditions that need a human: a source deposit that will never be relayed
//! automatically, and a control loop that keeps failing.

use std::fmt;
use tracing::error;

use super::types::TxHash;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alert {
    /// Source event given up on; its failure is recorded in the ledger
    RelayAbandoned {
        source_tx: TxHash,
        block_number: u64,
        attempts: u32,
        reason: String,
    },
    /// Consecutive unexpected cycle failures reached the escalation threshold
    CycleFailures { consecutive: u32, last_error: String },
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alert::RelayAbandoned {
                source_tx,
                block_number,
                attempts,
                reason,
            } => write!(
                f,
                "relay of {} (block {}) abandoned after {} attempt(s): {}",
                source_tx, block_number, attempts, reason
            ),
            Alert::CycleFailures {
                consecutive,
                last_error,
            } => write!(
                f,
                "{} consecutive relay cycles failed, last error: {}",
                consecutive, last_error
            ),
        }
    }
}

/// Log target of alert events; logging keeps it enabled at `error`
pub const ALERT_TARGET: &str = "ALERT";

pub trait AlertSink: Send + Sync {
    fn alert(&self, alert: &Alert);
}

/// Emits alerts as `error` events under [`ALERT_TARGET`]
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn alert(&self, alert: &Alert) {
        match alert {
            Alert::RelayAbandoned {
                source_tx,
                block_number,
                attempts,
                reason,
            } => error!(
                target: ALERT_TARGET,
                source_tx = %source_tx,
                block = block_number,
                attempts = attempts,
                reason = %reason,
                "Relay abandoned, manual action required"
            ),
            Alert::CycleFailures {
                consecutive,
                last_error,
            } => error!(
                target: ALERT_TARGET,
                consecutive = consecutive,
                last_error = %last_error,
                "Relay loop failing repeatedly"
            ),
        }
    }
}
