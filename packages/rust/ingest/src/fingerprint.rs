//! Content fingerprint service.
//!
//! A fingerprint is the (modification time, content hash, size) triple used
//! for change detection. Hashing streams the file in fixed-size chunks so
//! peak memory stays bounded regardless of file size. Pure functions; no
//! caching; callers memoize via the state store.

use std::io::Read;
use std::path::Path;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use strataflow_shared::{Result, StrataflowError};

/// Streaming hash chunk size.
const CHUNK_SIZE: usize = 1024 * 1024;

/// Stable identity of a file's content at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub mtime_utc: DateTime<Utc>,
    pub sha256: String,
    pub size_bytes: u64,
}

/// Compute the fingerprint of a file.
///
/// An unreadable file is an [`StrataflowError::Io`], propagated without
/// retry; retrying is the caller's decision.
pub fn fingerprint(path: &Path) -> Result<Fingerprint> {
    let meta = std::fs::metadata(path).map_err(|e| StrataflowError::io(path, e))?;
    let mtime = meta
        .modified()
        .map_err(|e| StrataflowError::io(path, e))?;

    Ok(Fingerprint {
        mtime_utc: DateTime::<Utc>::from(mtime),
        sha256: sha256_file(path)?,
        size_bytes: meta.len(),
    })
}

/// SHA-256 of a file's full contents, streamed in 1 MiB chunks.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path).map_err(|e| StrataflowError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).map_err(|e| StrataflowError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
