//! Run identity allocation and latest-run resolution.
//!
//! A run id is `YYYYMMDD_HHMMSS_#<hex suffix>` in UTC. The fixed-width,
//! zero-padded timestamp prefix makes byte-wise ordering equal to
//! chronological ordering, so "latest run" resolution is a plain string
//! max over a directory listing, with no registry needed.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, StrataflowError};

/// Strict run-id pattern: timestamp prefix, `_#`, 6–32 hex chars.
static RUN_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{8}_\d{6}_#[0-9a-fA-F]{6,32}$").expect("valid regex"));

/// Number of hex chars in a freshly allocated suffix.
const SUFFIX_LEN: usize = 8;

/// A unique, lexicographically-ordered run identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Allocate a new run id from the given UTC instant plus a random suffix.
    pub fn allocate(now: DateTime<Utc>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}_#{}",
            now.format("%Y%m%d_%H%M%S"),
            &suffix[..SUFFIX_LEN]
        ))
    }

    /// Allocate a run id that reuses the suffix of an upstream run.
    ///
    /// Downstream layer runs carry their upstream's suffix so lineage is
    /// visible in the directory name alone.
    pub fn derive(now: DateTime<Utc>, upstream: &RunId) -> Self {
        Self(format!(
            "{}_#{}",
            now.format("%Y%m%d_%H%M%S"),
            upstream.suffix()
        ))
    }

    /// The hex suffix after `_#`.
    pub fn suffix(&self) -> &str {
        self.0
            .rsplit_once("_#")
            .map(|(_, s)| s)
            .unwrap_or_default()
    }

    /// The run id as a string slice (also the directory name).
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolve the latest run id among the subdirectories of `root`.
    ///
    /// Entries that are not directories or do not match the strict run-id
    /// pattern (e.g. a `_state` directory) are ignored. Returns `None` when
    /// no runs exist yet.
    pub fn resolve_latest(root: &Path) -> Result<Option<RunId>> {
        if !root.is_dir() {
            return Ok(None);
        }
        let entries =
            std::fs::read_dir(root).map_err(|e| StrataflowError::io(root, e))?;

        let mut latest: Option<RunId> = None;
        for entry in entries {
            let entry = entry.map_err(|e| StrataflowError::io(root, e))?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Ok(id) = name.parse::<RunId>() {
                if latest.as_ref().is_none_or(|cur| id > *cur) {
                    latest = Some(id);
                }
            }
        }
        Ok(latest)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = StrataflowError;

    fn from_str(s: &str) -> Result<Self> {
        // Path-traversal guard: a run id becomes a directory name verbatim.
        if s.contains('/') || s.contains('\\') || s == "." || s == ".." {
            return Err(StrataflowError::validation(format!(
                "run id must not contain path separators: {s:?}"
            )));
        }
        if !RUN_ID_RE.is_match(s) {
            return Err(StrataflowError::validation(format!(
                "invalid run id format: {s:?}"
            )));
        }
        Ok(Self(s.to_string()))
    }
}
