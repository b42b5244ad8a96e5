//! deposit_relay - Cross-chain deposit relayer
//!
//! Relays `TokensDeposited` events from a source-chain bridge contract to
//! `mintBridgedTokens` calls on a destination-chain bridge contract, once
//! each deposit has enough confirmations, and never more than once per
//! source transaction.
//!
//! # Modules
//!
//! - [`relay`] - Scanner, relayer, processor loop and chain access
//! - [`config`] - Application configuration (YAML + env overrides)
//! - [`logging`] - tracing subscriber setup

pub mod config;
pub mod logging;
pub mod relay;

// Convenient re-exports at crate root
pub use relay::{
    EventScanner, EvmClient, HealthMonitor, IdempotencyLedger, LedgerClient, Processor, Relayer,
    RelayConfig, RelayError, StateStore, TrackedEvent, TxHash,
};
