//! Persisted ingestion state store.
//!
//! One JSON document outside the per-run artifact tree holds the last
//! successfully ingested fingerprint per state key. A record is committed
//! only after the corresponding output file is durably on disk and
//! re-hashed to match the source, so the stored state always reflects a
//! verified artifact. Commits are serialized (single writer) and the
//! document is replaced atomically to avoid torn reads.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use strataflow_shared::fsio::{atomic_write_json, ensure_dir};
use strataflow_shared::{Result, RunId, StrataflowError};

/// Last-known good fingerprint of one ingested file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetState {
    pub source_path: PathBuf,
    pub mtime_utc: DateTime<Utc>,
    pub sha256: String,
    pub size_bytes: u64,
    /// Run that last copied and verified this file.
    pub last_run_id: RunId,
}

/// On-disk shape of the state document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StateDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_utc: Option<DateTime<Utc>>,
    /// Records keyed by `<dataset>/<file-name>`.
    #[serde(default)]
    files: BTreeMap<String, DatasetState>,
}

/// Durable store of per-dataset ingestion state.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    inner: Mutex<StateDocument>,
}

impl StateStore {
    /// Load the store from `path`. A missing file yields an empty store;
    /// every dataset then classifies as new.
    pub fn load_from(path: &Path) -> Result<Self> {
        let doc = if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| StrataflowError::io(path, e))?;
            serde_json::from_str(&content).map_err(|e| {
                StrataflowError::State(format!("corrupt state at {}: {e}", path.display()))
            })?
        } else {
            StateDocument::default()
        };

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(doc),
        })
    }

    /// Prior state for a key, if this file was ever successfully ingested.
    pub fn get(&self, key: &str) -> Option<DatasetState> {
        self.inner
            .lock()
            .expect("state store poisoned")
            .files
            .get(key)
            .cloned()
    }

    /// Commit a verified record and atomically persist the whole document.
    ///
    /// Must only be called after the output artifact has been re-hashed
    /// against the source. Holding the lock across the write serializes
    /// concurrent committers.
    pub fn commit(&self, key: &str, state: DatasetState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            ensure_dir(parent)?;
        }
        let mut doc = self.inner.lock().expect("state store poisoned");
        doc.files.insert(key.to_string(), state);
        doc.updated_utc = Some(Utc::now());
        atomic_write_json(&self.path, &*doc)
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("state store poisoned").files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(run: &str) -> DatasetState {
        DatasetState {
            source_path: "sources/orders.csv".into(),
            mtime_utc: Utc::now(),
            sha256: "ab".repeat(32),
            size_bytes: 64,
            last_run_id: run.parse().unwrap(),
        }
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::load_from(&dir.path().join("state.json")).unwrap();
        assert!(store.is_empty());
        assert!(store.get("orders/orders.csv").is_none());
    }

    #[test]
    fn commit_then_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let store = StateStore::load_from(&path).unwrap();
        store
            .commit("orders/orders.csv", record("20240101_000000_#deadbeef"))
            .unwrap();

        let reloaded = StateStore::load_from(&path).unwrap();
        let rec = reloaded.get("orders/orders.csv").unwrap();
        assert_eq!(rec.last_run_id.as_str(), "20240101_000000_#deadbeef");
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn commit_replaces_existing_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = StateStore::load_from(&path).unwrap();
        store.commit("k", record("20240101_000000_#aaaaaaaa")).unwrap();
        store.commit("k", record("20240201_000000_#bbbbbbbb")).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(
            store.get("k").unwrap().last_run_id.as_str(),
            "20240201_000000_#bbbbbbbb"
        );
    }

    #[test]
    fn corrupt_state_is_an_error_not_a_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = StateStore::load_from(&path).unwrap_err();
        assert_eq!(err.error_type(), "state");
    }

    #[test]
    fn concurrent_commits_serialize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = std::sync::Arc::new(StateStore::load_from(&path).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store
                        .commit(&format!("ds/file_{i}.csv"), record("20240101_000000_#deadbeef"))
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let reloaded = StateStore::load_from(&path).unwrap();
        assert_eq!(reloaded.len(), 8);
    }
}
