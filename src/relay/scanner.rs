//! Event Scanner
//!
//! Advances the scan cursor over the source chain in bounded chunks and
//! follows each deposit through the confirmation state machine.
//!
//! A pass is all-or-nothing: logs are fetched, the new cursor is persisted,
//! and only then are detections and confirmations applied in memory. Any RPC
//! error leaves both the cursor and the tracked set exactly as they were.
//!
//! Confirmed events are handed to the caller but stay tracked until the
//! caller settles them with a terminal outcome.
//!
//! Before a tracked deposit is confirmed, its block range is read again. A
//! deposit that a reorg moved is re-anchored to its new block and waits out
//! the threshold there; one that vanished is dropped without a relay.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::error::ScanError;
use super::ledger::IdempotencyLedger;
use super::ledger_client::{LedgerClient, RawLog};
use super::state::{ScanState, StateStore};
use super::types::{FailureClass, RelayState, TrackedEvent, TxHash};

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub event_name: String,
    pub confirmation_threshold: u64,
    pub chunk_size: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            event_name: super::abi::DEPOSIT_EVENT.to_string(),
            confirmation_threshold: 12,
            chunk_size: 100,
        }
    }
}

pub struct EventScanner {
    client: Arc<dyn LedgerClient>,
    store: StateStore,
    config: ScannerConfig,
    /// Highest block fully scanned and persisted
    cursor: u64,
    /// First block of the next pass; below `cursor + 1` only while rescanning after a restart
    next_block: u64,
    tracked: HashMap<TxHash, TrackedEvent>,
}

impl EventScanner {
    /// Build a scanner from persisted state.
    ///
    /// Without a usable record the scanner starts at the current head
    /// (`height - 1`). With one, it resumes from the recorded rescan point so
    /// events still unsettled at shutdown are detected again.
    pub async fn resume(
        client: Arc<dyn LedgerClient>,
        mut store: StateStore,
        config: ScannerConfig,
    ) -> Result<Self, ScanError> {
        let (cursor, next_block) = match store.load() {
            Some(state) => {
                let after_cursor = state.last_scanned_block + 1;
                let next_block = match state.resume_from_block {
                    Some(block) => block.min(after_cursor),
                    // Bare record: rescan the confirmation window
                    None => after_cursor
                        .saturating_sub(config.confirmation_threshold)
                        .max(1),
                };
                (state.last_scanned_block, next_block)
            }
            None => {
                let height = client
                    .current_block_height()
                    .await
                    .map_err(ScanError::Height)?;
                let cursor = height.saturating_sub(1);
                (cursor, cursor + 1)
            }
        };

        info!(
            chain = client.name(),
            state_file = %store.path().display(),
            cursor,
            next_block,
            threshold = config.confirmation_threshold,
            chunk = config.chunk_size,
            "Event scanner ready"
        );

        Ok(Self {
            client,
            store,
            config,
            cursor,
            next_block,
            tracked: HashMap::new(),
        })
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn next_block(&self) -> u64 {
        self.next_block
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    pub fn get(&self, tx: &TxHash) -> Option<&TrackedEvent> {
        self.tracked.get(tx)
    }

    /// Scan the next chunk, run the confirmation pass, and return every
    /// tracked event that is ready for a relay attempt, oldest first.
    pub async fn advance(
        &mut self,
        ledger: &IdempotencyLedger,
    ) -> Result<Vec<TrackedEvent>, ScanError> {
        let height = self
            .client
            .current_block_height()
            .await
            .map_err(ScanError::Height)?;

        if self.next_block > height {
            debug!(chain = self.client.name(), height, "No new blocks to scan");
            return Ok(Vec::new());
        }

        let from = self.next_block;
        let to = height.min(from.saturating_add(self.config.chunk_size.max(1) - 1));

        debug!(
            chain = self.client.name(),
            event = %self.config.event_name,
            from,
            to,
            height,
            "Scanning block range"
        );

        let logs = self
            .client
            .fetch_logs(&self.config.event_name, from, to)
            .await
            .map_err(|source| ScanError::FetchLogs { from, to, source })?;

        let detected = self.new_detections(logs, ledger);
        let rechecked = self.recheck_maturing(height).await?;
        let cursor = self.cursor.max(to);

        let oldest_unsettled = self
            .tracked
            .values()
            .map(|e| e.block_number)
            .chain(detected.iter().map(|e| e.block_number))
            .min();
        // While rescanning below the cursor, a crash must resume the rescan
        let resume_from = oldest_unsettled.unwrap_or(to + 1).min(to + 1);
        self.store.save(&ScanState {
            last_scanned_block: cursor,
            resume_from_block: Some(resume_from),
        })?;

        // Persisted: commit the pass in memory
        self.cursor = cursor;
        self.next_block = to + 1;
        self.apply_recheck(rechecked, height);

        for mut event in detected {
            // Detected events enter the confirmation window straight away
            let _ = event.transition(RelayState::AwaitingConfirmation);
            info!(
                source_tx = %event.source_tx,
                block = event.block_number,
                recipient = %event.payload.recipient,
                amount = %event.payload.amount,
                "Deposit detected"
            );
            self.tracked.insert(event.source_tx, event);
        }

        self.confirm(height);

        let mut ready: Vec<TrackedEvent> = self
            .tracked
            .values()
            .filter(|e| e.state.is_ready_for_relay())
            .cloned()
            .collect();
        ready.sort_by_key(|e| (e.block_number, e.log_index));

        info!(
            chain = self.client.name(),
            from,
            to,
            cursor = self.cursor,
            tracked = self.tracked.len(),
            ready = ready.len(),
            "Scan pass complete"
        );

        Ok(ready)
    }

    fn new_detections(&self, logs: Vec<RawLog>, ledger: &IdempotencyLedger) -> Vec<TrackedEvent> {
        let mut detected: Vec<TrackedEvent> = Vec::new();

        for log in logs {
            if self.tracked.contains_key(&log.tx_hash)
                || detected.iter().any(|e| e.source_tx == log.tx_hash)
            {
                debug!(source_tx = %log.tx_hash, "Already tracked, skipping");
                continue;
            }
            if ledger.contains(&log.tx_hash) {
                debug!(source_tx = %log.tx_hash, "Already settled, skipping");
                continue;
            }
            detected.push(TrackedEvent::detected(
                log.tx_hash,
                log.block_number,
                log.log_index,
                log.payload,
            ));
        }

        detected
    }

    /// Re-read the logs of tracked deposits old enough to confirm at
    /// `height`. Maps each to where the chain now has it, or `None` when it is
    /// gone.
    async fn recheck_maturing(
        &self,
        height: u64,
    ) -> Result<Vec<(TxHash, Option<(u64, u64)>)>, ScanError> {
        let threshold = self.config.confirmation_threshold;
        let mut maturing: Vec<(u64, TxHash)> = self
            .tracked
            .values()
            .filter(|e| e.state == RelayState::AwaitingConfirmation && e.age(height) >= threshold)
            .map(|e| (e.block_number, e.source_tx))
            .collect();
        if maturing.is_empty() {
            return Ok(Vec::new());
        }
        maturing.sort();

        let mut found: HashMap<TxHash, (u64, u64)> = HashMap::new();
        let mut covered_to: Option<u64> = None;
        for &(block, _) in &maturing {
            if covered_to.is_some_and(|end| block <= end) {
                continue;
            }
            let from = block;
            let to = height.min(from.saturating_add(self.config.chunk_size.max(1) - 1));
            let logs = self
                .client
                .fetch_logs(&self.config.event_name, from, to)
                .await
                .map_err(|source| ScanError::FetchLogs { from, to, source })?;
            for log in logs {
                found
                    .entry(log.tx_hash)
                    .or_insert((log.block_number, log.log_index));
            }
            covered_to = Some(to);
        }

        Ok(maturing
            .into_iter()
            .map(|(_, tx)| (tx, found.get(&tx).copied()))
            .collect())
    }

    fn apply_recheck(&mut self, rechecked: Vec<(TxHash, Option<(u64, u64)>)>, height: u64) {
        for (tx, location) in rechecked {
            match location {
                Some((block, log_index)) => {
                    let Some(event) = self.tracked.get_mut(&tx) else {
                        continue;
                    };
                    if event.block_number != block || event.log_index != log_index {
                        warn!(
                            source_tx = %tx,
                            from_block = event.block_number,
                            to_block = block,
                            confirmations = height.saturating_sub(block),
                            "Deposit moved by reorg"
                        );
                        event.block_number = block;
                        event.log_index = log_index;
                    }
                }
                None => {
                    if let Some(event) = self.tracked.remove(&tx) {
                        warn!(
                            source_tx = %tx,
                            block = event.block_number,
                            "Deposit no longer on chain, dropped"
                        );
                    }
                }
            }
        }
    }

    fn confirm(&mut self, height: u64) {
        let threshold = self.config.confirmation_threshold;
        for event in self.tracked.values_mut() {
            if event.state != RelayState::AwaitingConfirmation {
                continue;
            }
            let age = event.age(height);
            if age >= threshold && event.transition(RelayState::Confirmed).is_ok() {
                info!(
                    source_tx = %event.source_tx,
                    block = event.block_number,
                    confirmations = age,
                    "Deposit confirmed"
                );
            }
        }
    }

    fn transition(&mut self, tx: &TxHash, next: RelayState) -> Result<&mut TrackedEvent, ScanError> {
        let event = self
            .tracked
            .get_mut(tx)
            .ok_or(ScanError::UnknownEvent(*tx))?;
        event
            .transition(next)
            .map_err(|from| ScanError::InvalidTransition {
                tx: *tx,
                from,
                to: next,
            })?;
        Ok(event)
    }

    /// `Confirmed | RelayFailed(retryable) -> RelayInFlight`
    pub fn mark_in_flight(&mut self, tx: &TxHash, at: DateTime<Utc>) -> Result<(), ScanError> {
        let event = self.transition(tx, RelayState::RelayInFlight)?;
        event.last_attempt_at = Some(at);
        Ok(())
    }

    /// `RelayInFlight -> Relayed`
    pub fn mark_relayed(&mut self, tx: &TxHash, dest_tx: TxHash) -> Result<(), ScanError> {
        let event = self.transition(tx, RelayState::Relayed)?;
        event.dest_tx = Some(dest_tx);
        event.clear_pending();
        event.last_error = None;
        Ok(())
    }

    /// `RelayInFlight -> RelayFailed(class)`, counting the attempt and
    /// keeping the nonce and broadcasts it left on `attempt`
    pub fn mark_failed(
        &mut self,
        attempt: &TrackedEvent,
        class: FailureClass,
        error: String,
    ) -> Result<u32, ScanError> {
        let event = self.transition(&attempt.source_tx, RelayState::RelayFailed(class))?;
        event.retry_count += 1;
        event.last_error = Some(error);
        // The attempt started from this event, so its list only grew unless
        // the nonce was spent
        event.nonce = attempt.nonce;
        event.pending_txs = attempt.pending_txs.clone();
        Ok(event.retry_count)
    }

    /// Stop tracking an event that reached a terminal state
    pub fn release(&mut self, tx: &TxHash) -> Result<TrackedEvent, ScanError> {
        let state = self
            .tracked
            .get(tx)
            .map(|e| e.state)
            .ok_or(ScanError::UnknownEvent(*tx))?;
        if !state.is_terminal() {
            return Err(ScanError::InvalidTransition {
                tx: *tx,
                from: state,
                to: RelayState::Relayed,
            });
        }
        self.tracked.remove(tx).ok_or(ScanError::UnknownEvent(*tx))
    }

    /// Stop tracking an event whose outcome the ledger already holds
    pub fn discard_settled(&mut self, tx: &TxHash, ledger: &IdempotencyLedger) -> bool {
        if !ledger.contains(tx) {
            return false;
        }
        if let Some(event) = self.tracked.remove(tx) {
            warn!(
                source_tx = %tx,
                state = %event.state,
                "Dropping tracked event already settled in ledger"
            );
            return true;
        }
        false
    }

    /// Terminal events still waiting for their ledger record
    pub fn unsettled_terminal(&self) -> Vec<TxHash> {
        self.tracked
            .values()
            .filter(|e| e.state.is_terminal())
            .map(|e| e.source_tx)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::ledger::Outcome;
    use crate::relay::mock::{MockLedger, tx_hash};
    use alloy_primitives::Address;
    use tempfile::TempDir;

    fn config(threshold: u64, chunk: u64) -> ScannerConfig {
        ScannerConfig {
            confirmation_threshold: threshold,
            chunk_size: chunk,
            ..ScannerConfig::default()
        }
    }

    fn seed_state(dir: &TempDir, state: ScanState) -> StateStore {
        let path = dir.path().join("state.json");
        StateStore::new(&path).save(&state).unwrap();
        StateStore::new(path)
    }

    async fn scanner_at(
        chain: &Arc<MockLedger>,
        dir: &TempDir,
        cursor: u64,
        cfg: ScannerConfig,
    ) -> EventScanner {
        let store = seed_state(
            dir,
            ScanState {
                last_scanned_block: cursor,
                resume_from_block: Some(cursor + 1),
            },
        );
        EventScanner::resume(chain.clone(), store, cfg).await.unwrap()
    }

    fn recipient() -> Address {
        Address::repeat_byte(0x42)
    }

    #[tokio::test]
    async fn test_fresh_start_resumes_from_head() {
        let chain = Arc::new(MockLedger::new("source"));
        chain.set_height(1_000);
        let dir = tempfile::tempdir().unwrap();

        let scanner = EventScanner::resume(
            chain.clone(),
            StateStore::new(dir.path().join("missing.json")),
            config(12, 100),
        )
        .await
        .unwrap();

        assert_eq!(scanner.cursor(), 999);
        assert_eq!(scanner.next_block(), 1_000);
    }

    #[tokio::test]
    async fn test_no_new_blocks_is_noop() {
        let chain = Arc::new(MockLedger::new("source"));
        chain.set_height(50);
        let dir = tempfile::tempdir().unwrap();
        let mut scanner = scanner_at(&chain, &dir, 50, config(12, 100)).await;

        let ready = scanner.advance(&IdempotencyLedger::in_memory()).await.unwrap();
        assert!(ready.is_empty());
        assert_eq!(chain.fetch_count(), 0);
        assert_eq!(scanner.cursor(), 50);
    }

    #[tokio::test]
    async fn test_chunk_bounds_cursor_advance() {
        let chain = Arc::new(MockLedger::new("source"));
        chain.set_height(500);
        let dir = tempfile::tempdir().unwrap();
        let mut scanner = scanner_at(&chain, &dir, 50, config(12, 100)).await;

        scanner.advance(&IdempotencyLedger::in_memory()).await.unwrap();

        assert_eq!(chain.fetch_ranges(), vec![(51, 150)]);
        assert_eq!(scanner.cursor(), 150);
        let persisted = StateStore::new(dir.path().join("state.json")).load().unwrap();
        assert_eq!(persisted.last_scanned_block, 150);
    }

    #[tokio::test]
    async fn test_confirmation_threshold() {
        let chain = Arc::new(MockLedger::new("source"));
        chain.set_height(100);
        let old = chain.add_deposit(1, 85, recipient(), 10);
        let young = chain.add_deposit(2, 95, recipient(), 20);
        let dir = tempfile::tempdir().unwrap();
        let mut scanner = scanner_at(&chain, &dir, 80, config(12, 100)).await;

        let ready = scanner.advance(&IdempotencyLedger::in_memory()).await.unwrap();

        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].source_tx, old);
        assert_eq!(scanner.get(&old).unwrap().state, RelayState::Confirmed);
        assert_eq!(
            scanner.get(&young).unwrap().state,
            RelayState::AwaitingConfirmation
        );
    }

    #[tokio::test]
    async fn test_confirmed_events_stay_tracked() {
        let chain = Arc::new(MockLedger::new("source"));
        chain.set_height(100);
        let tx = chain.add_deposit(1, 85, recipient(), 10);
        let dir = tempfile::tempdir().unwrap();
        let mut scanner = scanner_at(&chain, &dir, 80, config(12, 100)).await;
        let ledger = IdempotencyLedger::in_memory();

        assert_eq!(scanner.advance(&ledger).await.unwrap().len(), 1);

        // Nothing settled it, so the next pass hands it out again
        chain.set_height(101);
        let ready = scanner.advance(&ledger).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].source_tx, tx);
        assert_eq!(scanner.tracked_count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_error_leaves_state_untouched() {
        let chain = Arc::new(MockLedger::new("source"));
        chain.set_height(100);
        chain.add_deposit(1, 85, recipient(), 10);
        let dir = tempfile::tempdir().unwrap();
        let mut scanner = scanner_at(&chain, &dir, 80, config(12, 100)).await;

        chain.set_fail_fetch(true);
        let err = scanner
            .advance(&IdempotencyLedger::in_memory())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(scanner.cursor(), 80);
        assert_eq!(scanner.next_block(), 81);
        assert_eq!(scanner.tracked_count(), 0);
        let persisted = StateStore::new(dir.path().join("state.json")).load().unwrap();
        assert_eq!(persisted.last_scanned_block, 80);

        // The same range is scanned once the endpoint recovers
        chain.set_fail_fetch(false);
        let ready = scanner.advance(&IdempotencyLedger::in_memory()).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(chain.fetch_ranges(), vec![(81, 100)]);
    }

    #[tokio::test]
    async fn test_height_error_is_transient() {
        let chain = Arc::new(MockLedger::new("source"));
        chain.set_height(100);
        let dir = tempfile::tempdir().unwrap();
        let mut scanner = scanner_at(&chain, &dir, 80, config(12, 100)).await;

        chain.set_fail_height(true);
        let err = scanner
            .advance(&IdempotencyLedger::in_memory())
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Height(_)));
        assert_eq!(scanner.cursor(), 80);
    }

    #[tokio::test]
    async fn test_settled_events_are_not_tracked() {
        let chain = Arc::new(MockLedger::new("source"));
        chain.set_height(100);
        let tx = chain.add_deposit(1, 85, recipient(), 10);
        let dir = tempfile::tempdir().unwrap();
        let mut scanner = scanner_at(&chain, &dir, 80, config(12, 100)).await;

        let mut ledger = IdempotencyLedger::in_memory();
        ledger
            .record(
                tx,
                Outcome::Relayed {
                    dest_tx: tx_hash(99),
                },
            )
            .unwrap();

        assert!(scanner.advance(&ledger).await.unwrap().is_empty());
        assert_eq!(scanner.tracked_count(), 0);
    }

    #[tokio::test]
    async fn test_release_requires_terminal_state() {
        let chain = Arc::new(MockLedger::new("source"));
        chain.set_height(100);
        let tx = chain.add_deposit(1, 85, recipient(), 10);
        let dir = tempfile::tempdir().unwrap();
        let mut scanner = scanner_at(&chain, &dir, 80, config(12, 100)).await;
        scanner.advance(&IdempotencyLedger::in_memory()).await.unwrap();

        assert!(matches!(
            scanner.release(&tx),
            Err(ScanError::InvalidTransition { .. })
        ));

        scanner.mark_in_flight(&tx, Utc::now()).unwrap();
        let mut attempt = scanner.get(&tx).unwrap().clone();
        attempt.nonce = Some(3);
        attempt.pending_txs.push(tx_hash(6));
        let retries = scanner
            .mark_failed(&attempt, FailureClass::Retryable, "boom".to_string())
            .unwrap();
        assert_eq!(retries, 1);
        let failed = scanner.get(&tx).unwrap();
        assert_eq!(failed.nonce, Some(3));
        assert_eq!(failed.pending_txs, vec![tx_hash(6)]);
        assert!(scanner.release(&tx).is_err());

        scanner.mark_in_flight(&tx, Utc::now()).unwrap();
        scanner.mark_relayed(&tx, tx_hash(7)).unwrap();
        assert!(scanner.get(&tx).unwrap().pending_txs.is_empty());
        assert_eq!(scanner.unsettled_terminal(), vec![tx]);
        let released = scanner.release(&tx).unwrap();
        assert_eq!(released.dest_tx, Some(tx_hash(7)));
        assert_eq!(scanner.tracked_count(), 0);
    }

    #[tokio::test]
    async fn test_restart_rebuilds_unsettled_events() {
        let chain = Arc::new(MockLedger::new("source"));
        chain.set_height(100);
        let pending = chain.add_deposit(1, 95, recipient(), 10);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        {
            let mut scanner = scanner_at(&chain, &dir, 80, config(12, 100)).await;
            assert!(scanner.advance(&IdempotencyLedger::in_memory()).await.unwrap().is_empty());
            assert_eq!(scanner.cursor(), 100);
        }

        let persisted = StateStore::new(&path).load().unwrap();
        assert_eq!(persisted.last_scanned_block, 100);
        assert_eq!(persisted.resume_from_block, Some(95));

        // Process restarts; the chain moved on past the confirmation window
        chain.set_height(110);
        let mut scanner = EventScanner::resume(chain.clone(), StateStore::new(&path), config(12, 100))
            .await
            .unwrap();
        assert_eq!(scanner.cursor(), 100);
        assert_eq!(scanner.next_block(), 95);

        let ready = scanner.advance(&IdempotencyLedger::in_memory()).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].source_tx, pending);
        assert_eq!(scanner.cursor(), 110);
    }

    #[tokio::test]
    async fn test_bare_record_rescans_confirmation_window() {
        let chain = Arc::new(MockLedger::new("source"));
        chain.set_height(200);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"last_scanned_block": 150}"#).unwrap();

        let scanner = EventScanner::resume(chain.clone(), StateStore::new(&path), config(12, 100))
            .await
            .unwrap();
        assert_eq!(scanner.cursor(), 150);
        assert_eq!(scanner.next_block(), 139);
    }

    #[tokio::test]
    async fn test_rescan_never_lowers_persisted_cursor() {
        let chain = Arc::new(MockLedger::new("source"));
        chain.set_height(300);
        let dir = tempfile::tempdir().unwrap();
        let store = seed_state(
            &dir,
            ScanState {
                last_scanned_block: 250,
                resume_from_block: Some(100),
            },
        );
        let mut scanner = EventScanner::resume(chain.clone(), store, config(12, 50))
            .await
            .unwrap();

        scanner.advance(&IdempotencyLedger::in_memory()).await.unwrap();
        assert_eq!(chain.fetch_ranges(), vec![(100, 149)]);
        assert_eq!(scanner.cursor(), 250);
        let persisted = StateStore::new(dir.path().join("state.json")).load().unwrap();
        assert_eq!(persisted.last_scanned_block, 250);
        // a crash mid-rescan picks up where the rescan stopped
        assert_eq!(persisted.resume_from_block, Some(150));
    }

    #[tokio::test]
    async fn test_duplicate_logs_tracked_once() {
        let chain = Arc::new(MockLedger::new("source"));
        chain.set_height(300);
        let tx = chain.add_deposit(1, 120, recipient(), 10);
        chain.add_deposit(1, 120, recipient(), 10);
        let dir = tempfile::tempdir().unwrap();
        let mut scanner = scanner_at(&chain, &dir, 100, config(12, 100)).await;
        let ledger = IdempotencyLedger::in_memory();

        let ready = scanner.advance(&ledger).await.unwrap();
        assert_eq!(ready.len(), 1);
        scanner.mark_in_flight(&tx, Utc::now()).unwrap();

        // In-flight events are neither re-added nor handed out again
        chain.set_height(301);
        assert!(scanner.advance(&ledger).await.unwrap().is_empty());
        assert_eq!(scanner.tracked_count(), 1);
        assert_eq!(scanner.get(&tx).unwrap().state, RelayState::RelayInFlight);
    }

    #[tokio::test]
    async fn test_deposit_removed_by_reorg_is_dropped() {
        let chain = Arc::new(MockLedger::new("source"));
        chain.set_height(100);
        let tx = chain.add_deposit(1, 95, recipient(), 10);
        let dir = tempfile::tempdir().unwrap();
        let mut scanner = scanner_at(&chain, &dir, 80, config(12, 100)).await;
        let ledger = IdempotencyLedger::in_memory();

        assert!(scanner.advance(&ledger).await.unwrap().is_empty());
        assert_eq!(scanner.get(&tx).unwrap().state, RelayState::AwaitingConfirmation);

        // Block 95 is replaced; the chain regrows past the threshold without it
        chain.reorg_to(94);
        chain.set_height(110);
        let ready = scanner.advance(&ledger).await.unwrap();

        assert!(ready.is_empty());
        assert!(scanner.get(&tx).is_none());
        assert_eq!(scanner.tracked_count(), 0);
        assert_eq!(chain.fetch_ranges(), vec![(81, 100), (101, 110), (95, 110)]);
    }

    #[tokio::test]
    async fn test_deposit_moved_by_reorg_waits_at_new_block() {
        let chain = Arc::new(MockLedger::new("source"));
        chain.set_height(100);
        let tx = chain.add_deposit(1, 95, recipient(), 10);
        let dir = tempfile::tempdir().unwrap();
        let mut scanner = scanner_at(&chain, &dir, 80, config(12, 100)).await;
        let ledger = IdempotencyLedger::in_memory();
        scanner.advance(&ledger).await.unwrap();

        // Same deposit transaction re-included two blocks later
        chain.reorg_to(94);
        chain.add_deposit(1, 97, recipient(), 10);
        chain.set_height(108);
        assert!(scanner.advance(&ledger).await.unwrap().is_empty());
        let moved = scanner.get(&tx).unwrap();
        assert_eq!(moved.block_number, 97);
        assert_eq!(moved.state, RelayState::AwaitingConfirmation);

        chain.set_height(109);
        let ready = scanner.advance(&ledger).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].block_number, 97);
    }

    #[tokio::test]
    async fn test_recheck_failure_leaves_state_untouched() {
        let chain = Arc::new(MockLedger::new("source"));
        chain.set_height(100);
        let tx = chain.add_deposit(1, 95, recipient(), 10);
        let dir = tempfile::tempdir().unwrap();
        let mut scanner = scanner_at(&chain, &dir, 80, config(12, 100)).await;
        let ledger = IdempotencyLedger::in_memory();
        scanner.advance(&ledger).await.unwrap();

        // New range reads fine, re-reading block 95 does not
        chain.set_height(110);
        chain.set_fail_fetch_from(Some(95));
        assert!(scanner.advance(&ledger).await.is_err());
        assert_eq!(scanner.cursor(), 100);
        assert_eq!(scanner.next_block(), 101);
        let persisted = StateStore::new(dir.path().join("state.json")).load().unwrap();
        assert_eq!(persisted.last_scanned_block, 100);
        assert_eq!(scanner.get(&tx).unwrap().state, RelayState::AwaitingConfirmation);

        chain.set_fail_fetch_from(None);
        assert_eq!(scanner.advance(&ledger).await.unwrap().len(), 1);
    }
}
