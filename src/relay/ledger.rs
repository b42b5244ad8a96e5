//! Idempotency Ledger
//!
//! Set of source transactions that reached a terminal relay outcome. An
//! identifier is recorded at most once; the processor consults the ledger
//! before every relay attempt and the scanner before tracking a log.
//!
//! Optionally backed by an append-only JSON-lines journal replayed on
//! startup, so terminal outcomes survive restarts:
//!
//! ```text
//! {"source_tx":"0x..","outcome":"relayed","dest_tx":"0x..","recorded_at":"2026-..."}
//! {"source_tx":"0x..","outcome":"failed","reason":"destination reverted ..","recorded_at":"2026-..."}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

use super::error::StateError;
use super::types::TxHash;

/// Terminal outcome of a source event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Relayed { dest_tx: TxHash },
    Failed { reason: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct JournalEntry {
    source_tx: TxHash,
    #[serde(flatten)]
    outcome: Outcome,
    recorded_at: DateTime<Utc>,
}

pub struct IdempotencyLedger {
    entries: HashMap<TxHash, Outcome>,
    journal: Option<File>,
}

impl IdempotencyLedger {
    /// Process-lifetime ledger with no journal
    pub fn in_memory() -> Self {
        Self {
            entries: HashMap::new(),
            journal: None,
        }
    }

    /// Open (or create) a journal-backed ledger, replaying existing entries
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StateError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let mut entries = HashMap::new();
        let mut torn_tail = false;
        if path.exists() {
            let content = fs::read(path)?;
            torn_tail = content.last().is_some_and(|b| *b != b'\n');
            for (line_no, line) in content.split(|b| *b == b'\n').enumerate() {
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                match serde_json::from_slice::<JournalEntry>(line) {
                    Ok(entry) => {
                        entries.entry(entry.source_tx).or_insert(entry.outcome);
                    }
                    Err(e) => {
                        warn!(
                            path = %path.display(),
                            line = line_no + 1,
                            error = %e,
                            "Skipping unreadable ledger journal entry"
                        );
                    }
                }
            }
        }

        let mut journal = OpenOptions::new().create(true).append(true).open(path)?;
        if torn_tail {
            // Terminate a partially written line so the next entry starts clean
            journal.write_all(b"\n")?;
            journal.sync_data()?;
        }

        info!(
            path = %path.display(),
            entries = entries.len(),
            "Idempotency ledger loaded"
        );

        Ok(Self {
            entries,
            journal: Some(journal),
        })
    }

    pub fn contains(&self, source_tx: &TxHash) -> bool {
        self.entries.contains_key(source_tx)
    }

    pub fn get(&self, source_tx: &TxHash) -> Option<&Outcome> {
        self.entries.get(source_tx)
    }

    /// Record the terminal outcome of `source_tx`.
    ///
    /// The journal line is synced before the in-memory entry is added; a
    /// second outcome for the same identifier is rejected.
    pub fn record(&mut self, source_tx: TxHash, outcome: Outcome) -> Result<(), StateError> {
        if self.entries.contains_key(&source_tx) {
            return Err(StateError::DuplicateOutcome(source_tx));
        }

        if let Some(journal) = self.journal.as_mut() {
            let entry = JournalEntry {
                source_tx,
                outcome: outcome.clone(),
                recorded_at: Utc::now(),
            };
            let mut line = serde_json::to_vec(&entry)?;
            line.push(b'\n');
            journal.write_all(&line)?;
            journal.sync_data()?;
        }

        self.entries.insert(source_tx, outcome);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn relayed_count(&self) -> usize {
        self.entries
            .values()
            .filter(|o| matches!(o, Outcome::Relayed { .. }))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.entries
            .values()
            .filter(|o| matches!(o, Outcome::Failed { .. }))
            .count()
    }
}
