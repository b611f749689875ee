//! Error types for Strataflow.
//!
//! Library crates use [`StrataflowError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for all Strataflow operations.
#[derive(Debug, thiserror::Error)]
pub enum StrataflowError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Post-copy hash does not match the source hash. Never silently accepted.
    #[error("integrity mismatch for {file}: output hash {actual} != source hash {expected}")]
    IntegrityMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    /// Required directory/config missing before a stage starts. Fatal to that stage only.
    #[error("precondition failed: {message}")]
    Precondition { message: String },

    /// Stage exceeded its wall-clock budget.
    #[error("stage '{stage}' timed out after {limit:?}")]
    Timeout { stage: String, limit: Duration },

    /// Data validation error (bad run id, schema mismatch, invalid format).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Ingestion state store error.
    #[error("state store error: {0}")]
    State(String),

    /// CSV read/parse error for a specific table.
    #[error("CSV error in {file}: {message}")]
    Csv { file: String, message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, StrataflowError>;

impl StrataflowError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a precondition error from any displayable message.
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a CSV error tied to a table file.
    pub fn csv(file: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Csv {
            file: file.into(),
            message: msg.into(),
        }
    }

    /// Stable taxonomy label recorded in per-file and per-step metadata.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Io { .. } => "io_failure",
            Self::IntegrityMismatch { .. } => "integrity_mismatch",
            Self::Precondition { .. } => "precondition_failure",
            Self::Timeout { .. } => "timeout",
            Self::Validation { .. } => "validation",
            Self::State(_) => "state",
            Self::Csv { .. } => "csv",
        }
    }
}
