//! Core domain types shared across the pipeline crates.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::runid::RunId;

// ---------------------------------------------------------------------------
// Layer
// ---------------------------------------------------------------------------

/// One snapshot layer in the artifact tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    /// Byte-for-byte copies of source files.
    Raw,
    /// Cleaned, standardized tables (1:1 grain with raw).
    Standardized,
    /// Business-ready aggregated marts.
    Marts,
}

impl Layer {
    /// Directory name under the artifact root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Layer::Raw => "raw",
            Layer::Standardized => "standardized",
            Layer::Marts => "marts",
        }
    }
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

// ---------------------------------------------------------------------------
// Per-file outcomes
// ---------------------------------------------------------------------------

/// Classification of one source file within an ingestion run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileStatus {
    /// Bytes copied into the run snapshot and verified against the source hash.
    Copied,
    /// Fingerprint matches the persisted state; nothing copied, state untouched.
    Unchanged,
    /// Read/copy/hash error, recorded and excluded from the state commit.
    Failed {
        error_type: String,
        message: String,
    },
}

impl FileStatus {
    pub fn is_copied(&self) -> bool {
        matches!(self, FileStatus::Copied)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, FileStatus::Failed { .. })
    }
}

/// Audit record for one file processed by a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOutcome {
    /// File name within the source directory.
    pub file: String,
    /// Logical dataset the file was discovered under.
    pub dataset: String,
    /// Absolute or config-relative source path.
    pub source_path: PathBuf,
    #[serde(flatten)]
    pub status: FileStatus,
    /// Source modification time (UTC).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime_utc: Option<DateTime<Utc>>,
    /// SHA-256 of the source content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Source size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    /// Data rows (header excluded). Only captured for copied files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<u64>,
    /// Header columns. Only captured for copied files.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schema: Vec<String>,
    /// Declared columns missing from or extra to the header, if a schema
    /// was declared for the dataset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_warning: Option<String>,
    /// Seconds spent reading/parsing the table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_duration_s: Option<f64>,
    /// Seconds spent copying and re-hashing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy_duration_s: Option<f64>,
}

// ---------------------------------------------------------------------------
// Stage outcomes
// ---------------------------------------------------------------------------

/// Why a stage was deliberately not executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The ingestion stage reported that every file was unchanged.
    NoNewData,
    /// The immediately preceding stage failed.
    UpstreamFailed,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NoNewData => "no_new_data",
            SkipReason::UpstreamFailed => "upstream_failed",
        }
    }
}

/// Terminal outcome of one stage invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome {
    Succeeded,
    Failed,
    Skipped { reason: SkipReason },
}

impl StageOutcome {
    pub fn is_succeeded(&self) -> bool {
        matches!(self, StageOutcome::Succeeded)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StageOutcome::Failed)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, StageOutcome::Skipped { .. })
    }

    /// Human-readable status label.
    pub fn label(&self) -> &'static str {
        match self {
            StageOutcome::Succeeded => "succeeded",
            StageOutcome::Failed => "failed",
            StageOutcome::Skipped { .. } => "skipped",
        }
    }
}

/// One finalized pipeline step, as recorded in the summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// Stage name (`ingest`, `standardize`, `aggregate`).
    pub name: String,
    #[serde(flatten)]
    pub outcome: StageOutcome,
    pub started_utc: DateTime<Utc>,
    pub ended_utc: DateTime<Utc>,
    pub duration_s: f64,
    /// Process exit code, when the stage was actually invoked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Failure detail or skip explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Stage-specific log artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Pipeline summary
// ---------------------------------------------------------------------------

/// Append-only record of one orchestrator invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Orchestration run id (distinct from per-layer run ids).
    pub run_id: RunId,
    pub started_utc: DateTime<Utc>,
    pub ended_utc: DateTime<Utc>,
    pub duration_s: f64,
    /// Ordered step results, one per stage in the fixed sequence.
    pub steps: Vec<StepResult>,
    /// Layer run ids produced by this invocation, for lineage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_run_id: Option<RunId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standardized_run_id: Option<RunId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marts_run_id: Option<RunId>,
    /// Whether ingestion reported that no file changed.
    pub no_new_data: bool,
    /// True iff every non-skipped step succeeded.
    pub success: bool,
}

impl PipelineSummary {
    /// Overall success rule: skipped steps never affect the outcome.
    pub fn overall_success(steps: &[StepResult]) -> bool {
        steps.iter().all(|s| !s.outcome.is_failed())
    }
}
