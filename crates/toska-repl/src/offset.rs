//! Durable follower offset.
//!
//! The last byte offset successfully consumed from the leader AOF is kept in
//! `replica.offset` as decimal text, committed with the same tmp-then-rename
//! pattern as snapshots so a crash never leaves a half-written offset.

use std::fs;
use std::path::Path;

use tracing::warn;

use crate::error::Result;

/// Load the persisted offset. Absent or unparseable files read as `None`.
pub fn load_offset(path: &Path) -> Result<Option<u64>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    match contents.trim().parse::<u64>() {
        Ok(offset) => Ok(Some(offset)),
        Err(_) => {
            warn!(path = %path.display(), contents = %contents.trim(), "unparseable offset file, ignoring");
            Ok(None)
        }
    }
}

/// Persist the offset atomically.
pub fn store_offset(path: &Path, offset: u64) -> Result<()> {
    let tmp_path = path.with_extension("offset.tmp");
    fs::write(&tmp_path, offset.to_string())?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}
