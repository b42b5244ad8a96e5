//! Deposit Relay
//!
//! Watches a bridge contract on the source chain for `TokensDeposited`
//! events, waits until each is buried under enough blocks, then mints the
//! bridged amount on the destination chain exactly once.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ HealthMonitor│──▶│  Processor   │──▶│ EventScanner │──▶│   Relayer    │
//! │ (src + dest) │   │ (main loop)  │   │ (cursor+FSM) │   │ (mint call)  │
//! └──────────────┘   └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!                           │                  │                  │
//!                           ▼                  ▼                  ▼
//!                    IdempotencyLedger    StateStore      LedgerClient (dest)
//!                                                                 + Signer
//! ```
//!
//! # Modules
//!
//! - [`types`] - TrackedEvent and its relay state machine
//! - [`ledger_client`] - Chain access trait
//! - [`evm`] - JSON-RPC implementation of the chain access trait
//! - [`abi`] - Event topic / calldata encoding
//! - [`state`] - Persisted scan cursor
//! - [`ledger`] - Idempotency ledger of terminal outcomes
//! - [`scanner`] - Chunked scanning and confirmation tracking
//! - [`signer`] - Relayer key and local transaction signing
//! - [`relayer`] - Destination mint submission, nonce per deposit
//! - [`health`] - Background endpoint health checks
//! - [`processor`] - Control loop, retries and alerting
//! - [`config`] - Relay settings and env overrides

pub mod abi;
pub mod alert;
pub mod config;
pub mod error;
pub mod evm;
pub mod health;
pub mod ledger;
pub mod ledger_client;
pub mod processor;
pub mod relayer;
pub mod scanner;
pub mod signer;
pub mod state;
pub mod types;

#[cfg(any(test, feature = "mock-ledger"))]
pub mod mock;

pub use alert::{Alert, AlertSink, LogAlertSink};
pub use config::RelayConfig;
pub use error::{ConfigError, LedgerError, RelayError, RelayFailure, ScanError, StateError};
pub use evm::EvmClient;
pub use health::{HealthConfig, HealthMonitor, HealthReader, HealthStatus};
pub use ledger::{IdempotencyLedger, Outcome};
pub use ledger_client::{ContractCall, LedgerClient, RawLog, Receipt, ReceiptStatus};
pub use processor::{CycleReport, Processor, ProcessorConfig};
pub use relayer::{Relayer, RelayerConfig};
pub use scanner::{EventScanner, ScannerConfig};
pub use signer::{SignedTransaction, Signer};
pub use state::{ScanState, StateStore};
pub use types::{DepositPayload, FailureClass, RelayState, TrackedEvent, TxHash};
