//! Relay Processor - Main control loop
//!
//! One sequential loop per source/destination pair:
//!
//! ```text
//! health gate -> scanner.advance() -> relay each ready event -> settle -> sleep
//! ```
//!
//! Owns the idempotency ledger and the retry policy. An event is settled
//! (ledger record, then release from the scanner) only after a terminal
//! outcome. Cycle errors and panics are caught here and never end the loop.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::alert::{Alert, AlertSink};
use super::error::{RelayError, RelayFailure, StateError};
use super::health::HealthReader;
use super::ledger::{IdempotencyLedger, Outcome};
use super::relayer::Relayer;
use super::scanner::EventScanner;
use super::types::{FailureClass, RelayState, TrackedEvent, TxHash};

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub poll_interval: Duration,
    /// Pause while an endpoint is unhealthy
    pub health_pause: Duration,
    /// Pause after an unexpected cycle failure
    pub error_pause: Duration,
    /// Relay attempts before an event is abandoned
    pub max_relay_attempts: u32,
    /// Wait before the first retry; doubles per further attempt
    pub retry_backoff: Duration,
    pub max_retry_backoff: Duration,
    /// Consecutive unexpected failures that raise an alert
    pub failure_escalation: u32,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            health_pause: Duration::from_secs(60),
            error_pause: Duration::from_secs(60),
            max_relay_attempts: 3,
            retry_backoff: Duration::from_secs(15),
            max_retry_backoff: Duration::from_secs(300),
            failure_escalation: 3,
        }
    }
}

/// What one cycle did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub skipped_unhealthy: bool,
    pub ready: usize,
    pub relayed: usize,
    pub retrying: usize,
    pub abandoned: usize,
    /// Ready events still inside their retry backoff
    pub deferred: usize,
}

pub struct Processor {
    scanner: EventScanner,
    relayer: Relayer,
    ledger: IdempotencyLedger,
    source_health: HealthReader,
    dest_health: HealthReader,
    alerts: Arc<dyn AlertSink>,
    config: ProcessorConfig,
    consecutive_failures: u32,
}

impl Processor {
    pub fn new(
        scanner: EventScanner,
        relayer: Relayer,
        ledger: IdempotencyLedger,
        source_health: HealthReader,
        dest_health: HealthReader,
        alerts: Arc<dyn AlertSink>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            scanner,
            relayer,
            ledger,
            source_health,
            dest_health,
            alerts,
            config,
            consecutive_failures: 0,
        }
    }

    pub fn ledger(&self) -> &IdempotencyLedger {
        &self.ledger
    }

    pub fn scanner(&self) -> &EventScanner {
        &self.scanner
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Run cycles until `shutdown` fires
    pub async fn run(&mut self, shutdown: CancellationToken) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            max_relay_attempts = self.config.max_relay_attempts,
            "Relay processor starting"
        );

        while !shutdown.is_cancelled() {
            let pause = self.run_guarded_cycle(&shutdown).await;

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!(
            tracked = self.scanner.tracked_count(),
            settled = self.ledger.len(),
            "Relay processor stopped"
        );
    }

    /// One cycle with errors and panics contained; returns the pause before the next
    pub async fn run_guarded_cycle(&mut self, shutdown: &CancellationToken) -> Duration {
        let result = AssertUnwindSafe(self.run_cycle(shutdown))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(report)) => {
                self.consecutive_failures = 0;
                if report.skipped_unhealthy {
                    return self.config.health_pause;
                }
                if report.ready > 0 {
                    info!(
                        ready = report.ready,
                        relayed = report.relayed,
                        retrying = report.retrying,
                        abandoned = report.abandoned,
                        deferred = report.deferred,
                        tracked = self.scanner.tracked_count(),
                        "Cycle complete"
                    );
                } else {
                    debug!(tracked = self.scanner.tracked_count(), "Cycle complete");
                }
                self.config.poll_interval
            }
            Ok(Err(e)) if e.is_transient() => {
                warn!(error = %e, "Scan pass failed, retrying next cycle");
                self.config.poll_interval
            }
            Ok(Err(e)) => {
                error!(error = %e, ?e, "Unexpected error in relay cycle");
                self.note_unexpected(e.to_string());
                self.config.error_pause
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(panic = %message, "Relay cycle panicked");
                self.note_unexpected(message);
                self.config.error_pause
            }
        }
    }

    fn note_unexpected(&mut self, last_error: String) {
        self.consecutive_failures += 1;
        if self.consecutive_failures == self.config.failure_escalation {
            self.alerts.alert(&Alert::CycleFailures {
                consecutive: self.consecutive_failures,
                last_error,
            });
        }
    }

    /// Health gate, scan, relay
    pub async fn run_cycle(&mut self, shutdown: &CancellationToken) -> Result<CycleReport, RelayError> {
        let mut report = CycleReport::default();

        for reader in [&self.source_health, &self.dest_health] {
            if reader.is_unhealthy() {
                warn!(
                    endpoint = reader.name(),
                    pause_secs = self.config.health_pause.as_secs(),
                    "Endpoint unhealthy, pausing relay"
                );
                report.skipped_unhealthy = true;
                return Ok(report);
            }
        }

        self.settle_leftovers()?;

        if shutdown.is_cancelled() {
            return Ok(report);
        }

        let ready = self.scanner.advance(&self.ledger).await?;
        report.ready = ready.len();

        for event in ready {
            // Stop before the next RPC call; an attempt already running finishes
            if shutdown.is_cancelled() {
                info!("Shutdown requested, leaving remaining events for the next run");
                break;
            }

            if self.scanner.discard_settled(&event.source_tx, &self.ledger) {
                continue;
            }

            let now = Utc::now();
            if !self.backoff_elapsed(&event, now) {
                report.deferred += 1;
                continue;
            }

            self.relay_one(&event, now, &mut report).await?;
        }

        Ok(report)
    }

    async fn relay_one(
        &mut self,
        event: &TrackedEvent,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> Result<(), RelayError> {
        let tx = event.source_tx;
        self.scanner.mark_in_flight(&tx, now)?;

        let mut attempt = event.clone();
        match self.relayer.relay(&mut attempt).await {
            Ok(dest_tx) => {
                self.scanner.mark_relayed(&tx, dest_tx)?;
                info!(source_tx = %tx, dest_tx = %dest_tx, "Deposit relayed");
                report.relayed += 1;
            }
            Err(failure) => {
                let attempts = event.retry_count + 1;
                let terminal = failure.is_terminal() || attempts >= self.config.max_relay_attempts;
                let class = if terminal {
                    FailureClass::Terminal
                } else {
                    FailureClass::Retryable
                };

                let reason = if terminal {
                    abandon_reason(&failure, &attempt.pending_txs)
                } else {
                    failure.to_string()
                };
                self.scanner.mark_failed(&attempt, class, reason.clone())?;

                if terminal {
                    error!(
                        source_tx = %tx,
                        kind = failure.kind(),
                        attempts,
                        unresolved = attempt.pending_txs.len(),
                        error = %failure,
                        "Relay failed permanently"
                    );
                    self.alerts.alert(&Alert::RelayAbandoned {
                        source_tx: tx,
                        block_number: event.block_number,
                        attempts,
                        reason,
                    });
                    report.abandoned += 1;
                } else {
                    warn!(
                        source_tx = %tx,
                        kind = failure.kind(),
                        attempts,
                        max_attempts = self.config.max_relay_attempts,
                        error = %failure,
                        "Relay failed, will retry"
                    );
                    report.retrying += 1;
                    return Ok(());
                }
            }
        }

        self.settle(&tx)
    }

    /// Record a terminal event in the ledger, then stop tracking it
    fn settle(&mut self, tx: &TxHash) -> Result<(), RelayError> {
        let Some(event) = self.scanner.get(tx) else {
            return Ok(());
        };

        let outcome = match (event.state, event.dest_tx) {
            (RelayState::Relayed, Some(dest_tx)) => Outcome::Relayed { dest_tx },
            (RelayState::RelayFailed(FailureClass::Terminal), _) => Outcome::Failed {
                reason: event
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
            },
            _ => return Ok(()),
        };

        match self.ledger.record(*tx, outcome) {
            Ok(()) | Err(StateError::DuplicateOutcome(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.scanner.release(tx)?;
        Ok(())
    }

    /// Terminal events whose ledger write failed in an earlier cycle
    fn settle_leftovers(&mut self) -> Result<(), RelayError> {
        for tx in self.scanner.unsettled_terminal() {
            warn!(source_tx = %tx, "Settling terminal event from an earlier cycle");
            self.settle(&tx)?;
        }
        Ok(())
    }

    fn backoff_elapsed(&self, event: &TrackedEvent, now: DateTime<Utc>) -> bool {
        let Some(last_attempt) = event.last_attempt_at else {
            return true;
        };
        if event.retry_count == 0 {
            return true;
        }

        let backoff = retry_backoff(
            self.config.retry_backoff,
            self.config.max_retry_backoff,
            event.retry_count,
        );
        match chrono::Duration::from_std(backoff) {
            Ok(backoff) => now >= last_attempt + backoff,
            Err(_) => false,
        }
    }
}

/// `base * 2^(retries - 1)`, capped at `max`
pub fn retry_backoff(base: Duration, max: Duration, retries: u32) -> Duration {
    let exponent = retries.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent).min(max)
}

/// Failure text for the ledger and the alert. Broadcasts that may still land
/// are listed so an operator can check them before re-driving the deposit.
fn abandon_reason(failure: &RelayFailure, pending_txs: &[TxHash]) -> String {
    if pending_txs.is_empty() {
        return failure.to_string();
    }
    let pending: Vec<String> = pending_txs.iter().map(|tx| tx.to_string()).collect();
    format!("{}; unresolved destination txs: {}", failure, pending.join(", "))
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
