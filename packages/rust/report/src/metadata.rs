//! Structured per-run metadata documents.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use strataflow_shared::fsio::atomic_write_json;
use strataflow_shared::{FileOutcome, Layer, Result, RunId, StrataflowError};

/// File name of the structured metadata document inside a run's data dir.
pub const METADATA_FILE: &str = "metadata.json";

// ---------------------------------------------------------------------------
// Common blocks
// ---------------------------------------------------------------------------

/// Identity and timing of one stage run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunBlock {
    pub run_id: RunId,
    pub layer: Layer,
    /// Pipeline/stage name (`ingest`, `standardize`, `aggregate`).
    pub pipeline: String,
    pub started_utc: DateTime<Utc>,
    pub ended_utc: DateTime<Utc>,
    pub duration_s: f64,
    /// Upstream run this stage consumed, when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_run_id: Option<RunId>,
}

/// Execution environment snapshot, for reproducibility audits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvBlock {
    pub os: String,
    pub arch: String,
    pub tool_version: String,
}

impl EnvBlock {
    /// Capture the current environment.
    pub fn capture() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Ingest metadata
// ---------------------------------------------------------------------------

/// Summary counts for an ingestion run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestSummary {
    pub files_total: u64,
    pub files_copied: u64,
    pub files_unchanged: u64,
    pub files_failed: u64,
    /// True iff at least one file was discovered and none were copied or
    /// failed. The orchestrator short-circuits downstream stages on this.
    pub no_new_data: bool,
}

/// Metadata document written by the ingestion engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestMetadata {
    pub run: RunBlock,
    pub env: EnvBlock,
    /// Per-file audit records, keyed by file name.
    pub tables: BTreeMap<String, FileOutcome>,
    pub summary: IngestSummary,
}

// ---------------------------------------------------------------------------
// Transform metadata
// ---------------------------------------------------------------------------

/// Outcome of one table inside a transform stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TableStatus {
    Succeeded,
    Failed {
        error_type: String,
        message: String,
    },
}

impl TableStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, TableStatus::Failed { .. })
    }
}

/// Audit record for one table processed by a transform stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableOutcome {
    pub table: String,
    #[serde(flatten)]
    pub status: TableStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_out: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    /// SHA-256 of the written output file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_sha256: Option<String>,
    pub duration_s: f64,
    /// Stage-specific counters (cells trimmed, dates normalized, groups…).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub counters: BTreeMap<String, u64>,
}

/// Summary counts for a transform run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformSummary {
    pub tables_total: u64,
    pub tables_succeeded: u64,
    pub tables_failed: u64,
}

/// Metadata document written by the standardize and aggregate stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformMetadata {
    pub run: RunBlock,
    pub env: EnvBlock,
    pub tables: BTreeMap<String, TableOutcome>,
    pub summary: TransformSummary,
}

// ---------------------------------------------------------------------------
// Read / write
// ---------------------------------------------------------------------------

/// Write a metadata document into `data_dir` (single shot, atomic).
pub fn write_metadata<T: Serialize>(data_dir: &Path, doc: &T) -> Result<PathBuf> {
    let path = data_dir.join(METADATA_FILE);
    atomic_write_json(&path, doc)?;
    tracing::debug!(path = %path.display(), "wrote run metadata");
    Ok(path)
}

/// Read the ingest metadata of a run directory (`<run>/data/metadata.json`).
pub fn read_ingest_metadata(run_dir: &Path) -> Result<IngestMetadata> {
    let path = run_dir.join("data").join(METADATA_FILE);
    let content =
        std::fs::read_to_string(&path).map_err(|e| StrataflowError::io(&path, e))?;
    serde_json::from_str(&content).map_err(|e| {
        StrataflowError::validation(format!("invalid metadata at {}: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use strataflow_shared::FileStatus;

    fn sample_ingest_metadata() -> IngestMetadata {
        let run_id: RunId = "20240101_000000_#deadbeef".parse().unwrap();
        let mut tables = BTreeMap::new();
        tables.insert(
            "orders.csv".to_string(),
            FileOutcome {
                file: "orders.csv".into(),
                dataset: "orders".into(),
                source_path: "sources/orders.csv".into(),
                status: FileStatus::Copied,
                mtime_utc: Some(Utc::now()),
                sha256: Some("ab".repeat(32)),
                size_bytes: Some(120),
                rows: Some(10),
                schema: vec!["order_id".into(), "amount".into()],
                schema_warning: None,
                read_duration_s: Some(0.01),
                copy_duration_s: Some(0.02),
            },
        );
        IngestMetadata {
            run: RunBlock {
                run_id: run_id.clone(),
                layer: Layer::Raw,
                pipeline: "ingest".into(),
                started_utc: Utc::now(),
                ended_utc: Utc::now(),
                duration_s: 0.5,
                input_run_id: None,
            },
            env: EnvBlock::capture(),
            tables,
            summary: IngestSummary {
                files_total: 1,
                files_copied: 1,
                files_unchanged: 0,
                files_failed: 0,
                no_new_data: false,
            },
        }
    }

    #[test]
    fn metadata_write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let run_dir = dir.path().join("20240101_000000_#deadbeef");
        let data_dir = run_dir.join("data");
        std::fs::create_dir_all(&data_dir).unwrap();

        let doc = sample_ingest_metadata();
        write_metadata(&data_dir, &doc).unwrap();

        let back = read_ingest_metadata(&run_dir).unwrap();
        assert_eq!(back.summary.files_copied, 1);
        assert!(!back.summary.no_new_data);
        assert!(back.tables.contains_key("orders.csv"));
    }

    #[test]
    fn missing_metadata_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_ingest_metadata(dir.path()).is_err());
    }

    #[test]
    fn table_status_flattens_into_record() {
        let outcome = TableOutcome {
            table: "orders".into(),
            status: TableStatus::Failed {
                error_type: "csv".into(),
                message: "ragged row".into(),
            },
            rows_in: None,
            rows_out: None,
            columns: vec![],
            output_sha256: None,
            duration_s: 0.1,
            counters: BTreeMap::new(),
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains(r#""status":"failed""#));
        assert!(json.contains("ragged row"));
    }
}
