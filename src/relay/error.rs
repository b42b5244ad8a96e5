use thiserror::Error;

use super::types::{RelayState, TxHash};

/// Errors raised by a [`LedgerClient`](super::ledger_client::LedgerClient).
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("RPC connection failed: {0}")]
    RpcConnection(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("Receipt for {0} not observed before timeout")]
    ReceiptTimeout(TxHash),

    /// The signed transaction was sent but the node's answer was lost; it may
    /// or may not be in the mempool.
    #[error("Submission of {tx} unconfirmed: {reason}")]
    SubmissionUnconfirmed { tx: TxHash, reason: String },
}

impl LedgerError {
    /// Network-level failures that a later call may not see again. Parse and
    /// unknown-event errors repeat on every call until someone intervenes.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LedgerError::RpcConnection(_)
                | LedgerError::Rpc { .. }
                | LedgerError::ReceiptTimeout(_)
                | LedgerError::SubmissionUnconfirmed { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Cursor regression: persisted {persisted}, attempted {attempted}")]
    CursorRegression { persisted: u64, attempted: u64 },

    #[error("Outcome already recorded for {0}")]
    DuplicateOutcome(TxHash),
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Failed to read chain height: {0}")]
    Height(#[source] LedgerError),

    #[error("Failed to fetch logs for blocks {from}..={to}: {source}")]
    FetchLogs {
        from: u64,
        to: u64,
        #[source]
        source: LedgerError,
    },

    #[error("Failed to persist scan state: {0}")]
    Persist(#[from] StateError),

    #[error("Event {0} is not tracked")]
    UnknownEvent(TxHash),

    #[error("Invalid transition for {tx}: {from} -> {to}")]
    InvalidTransition {
        tx: TxHash,
        from: RelayState,
        to: RelayState,
    },
}

impl ScanError {
    /// RPC failures that leave scanner state untouched and clear up on their own.
    /// A log the client cannot decode is not one of them: the cursor holds and
    /// the cycle counts toward escalation.
    pub fn is_transient(&self) -> bool {
        match self {
            ScanError::Height(source) | ScanError::FetchLogs { source, .. } => {
                source.is_transient()
            }
            _ => false,
        }
    }
}

/// Why a single relay attempt did not produce a successful mint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayFailure {
    /// Network or signing failure before the destination saw the transaction.
    #[error("submission failed: {0}")]
    SubmissionFailed(String),

    /// The destination contract rejected the call.
    #[error("destination reverted in tx {tx}")]
    Reverted { tx: TxHash },

    /// Inclusion not observed in time; the transaction may still land.
    #[error("receipt for {tx} not observed within {waited_secs}s")]
    Timeout { tx: TxHash, waited_secs: u64 },

    /// The event payload can never produce a valid destination call.
    #[error("invalid event: {0}")]
    InvalidEvent(String),
}

impl RelayFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            RelayFailure::SubmissionFailed(_) => "submission-failed",
            RelayFailure::Reverted { .. } => "reverted",
            RelayFailure::Timeout { .. } => "timeout",
            RelayFailure::InvalidEvent(_) => "invalid-event",
        }
    }

    /// Terminal regardless of the retry budget.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RelayFailure::InvalidEvent(_))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Top-level error for a processor cycle and for startup.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Scanner error: {0}")]
    Scan(#[from] ScanError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl RelayError {
    /// Transient failures are retried on the normal poll interval; anything
    /// else is answered with the extended error pause.
    pub fn is_transient(&self) -> bool {
        match self {
            RelayError::Scan(e) => e.is_transient(),
            _ => false,
        }
    }
}
