//! Scan Cursor Persistence
//!
//! A single JSON record holding the highest fully-scanned source block:
//!
//! ```json
//! { "last_scanned_block": 150, "resume_from_block": 131 }
//! ```
//!
//! `resume_from_block` is the lowest block a restart must rescan to rebuild
//! the in-memory set of unsettled events. Records written without it (the
//! bare `{"last_scanned_block": N}` shape) are still accepted.
//!
//! Writes go to a temp file that is then renamed over the record, so a crash
//! leaves either the old or the new cursor on disk.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::error::StateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanState {
    pub last_scanned_block: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_from_block: Option<u64>,
}

/// Durable home of the scan cursor
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    /// Last cursor written or loaded; the persisted value never goes below it
    persisted: Option<u64>,
}

impl StateStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            persisted: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted record. A missing or corrupt file yields `None`.
    pub fn load(&mut self) -> Option<ScanState> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "State file not readable, starting from chain head"
                );
                return None;
            }
        };

        match serde_json::from_str::<ScanState>(&content) {
            Ok(state) => {
                debug!(path = %self.path.display(), ?state, "Loaded scan state");
                self.persisted = Some(state.last_scanned_block);
                Some(state)
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "State file corrupt, starting from chain head"
                );
                None
            }
        }
    }

    /// Atomically replace the persisted record. Refuses to move the cursor backwards.
    pub fn save(&mut self, state: &ScanState) -> Result<(), StateError> {
        if let Some(persisted) = self.persisted
            && state.last_scanned_block < persisted
        {
            return Err(StateError::CursorRegression {
                persisted,
                attempted: state.last_scanned_block,
            });
        }

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = self.tmp_path();
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&serde_json::to_vec(state)?)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        self.persisted = Some(state.last_scanned_block);
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = StateStore::new(dir.path().join("state.json"));
        assert_eq!(store.load(), None);
    }

    #[test]
    fn test_corrupt_file_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();

        let mut store = StateStore::new(&path);
        assert_eq!(store.load(), None);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let state = ScanState {
            last_scanned_block: 150,
            resume_from_block: Some(131),
        };

        StateStore::new(&path).save(&state).unwrap();
        assert_eq!(StateStore::new(&path).load(), Some(state));
        assert!(!path.with_file_name("state.json.tmp").exists());
    }

    #[test]
    fn test_minimal_record_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{"last_scanned_block": 77}"#).unwrap();

        let state = StateStore::new(&path).load().unwrap();
        assert_eq!(state.last_scanned_block, 77);
        assert_eq!(state.resume_from_block, None);
    }

    #[test]
    fn test_cursor_never_regresses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut store = StateStore::new(&path);

        store
            .save(&ScanState {
                last_scanned_block: 200,
                resume_from_block: None,
            })
            .unwrap();

        let err = store
            .save(&ScanState {
                last_scanned_block: 199,
                resume_from_block: None,
            })
            .unwrap_err();
        assert!(matches!(
            err,
            StateError::CursorRegression {
                persisted: 200,
                attempted: 199
            }
        ));

        // A fresh store over the same file picks the floor up on load
        let mut reopened = StateStore::new(&path);
        reopened.load();
        assert!(
            reopened
                .save(&ScanState {
                    last_scanned_block: 10,
                    resume_from_block: None,
                })
                .is_err()
        );
        assert_eq!(reopened.load().unwrap().last_scanned_block, 200);
    }
}
