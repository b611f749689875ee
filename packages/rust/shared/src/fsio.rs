//! Atomic file write helpers.
//!
//! Persisted documents (state store, run metadata, summaries) are written
//! to a temp file in the target directory, fsynced, then renamed over the
//! target so a concurrent reader never observes a torn write.

use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::error::{Result, StrataflowError};

/// Write `bytes` to `target` atomically (temp file + rename).
pub fn atomic_write_bytes(target: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            StrataflowError::validation(format!("invalid write target: {}", target.display()))
        })?;
    let temp = target.with_file_name(format!(".{file_name}.tmp"));

    let result = (|| -> Result<()> {
        let mut file =
            std::fs::File::create(&temp).map_err(|e| StrataflowError::io(&temp, e))?;
        file.write_all(bytes)
            .map_err(|e| StrataflowError::io(&temp, e))?;
        file.sync_all().map_err(|e| StrataflowError::io(&temp, e))?;
        std::fs::rename(&temp, target).map_err(|e| StrataflowError::io(target, e))?;
        Ok(())
    })();

    if result.is_err() && temp.exists() {
        let _ = std::fs::remove_file(&temp);
    }
    result
}

/// Write a string to `target` atomically.
pub fn atomic_write_text(target: &Path, text: &str) -> Result<()> {
    atomic_write_bytes(target, text.as_bytes())
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn atomic_write_json<T: Serialize>(target: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| StrataflowError::validation(format!("serialize {}: {e}", target.display())))?;
    atomic_write_bytes(target, json.as_bytes())
}

/// Create a directory and all parents, mapping the error to our taxonomy.
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| StrataflowError::io(path, e))
}
