//! Snapshot writer and loader.
//!
//! A snapshot is a full dump of the live index with an integrity checksum
//! over its `data` map. The file is committed by writing to a `.tmp` sibling
//! and renaming into place, so concurrent readers observe either the old or
//! the new file, never a partial one.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::canonical::checksum_hex;
use crate::error::Result;
use crate::index::Entry;
use crate::SCHEMA_VERSION;

/// On-disk snapshot structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotFile {
    /// Schema version.
    pub version: u32,
    /// Wall-clock ms at write time.
    pub created_at: u64,
    /// Hex SHA-256 of the canonical form of `data`.
    pub checksum: String,
    /// Full key → entry state.
    pub data: BTreeMap<String, Entry>,
}

/// Canonical-checksum input for a data map: each entry as an object with
/// `expires_at` omitted when absent, mirroring the wire encoding.
pub fn data_checksum(data: &BTreeMap<String, Entry>) -> String {
    let mut object = serde_json::Map::new();
    for (key, entry) in data {
        let mut fields = serde_json::Map::new();
        fields.insert("value".to_string(), json!(entry.value));
        if let Some(expires_at) = entry.expires_at {
            fields.insert("expires_at".to_string(), json!(expires_at));
        }
        object.insert(key.clone(), Value::Object(fields));
    }
    checksum_hex(&Value::Object(object))
}

/// Write a snapshot of `data` to `path` atomically. Entries already expired
/// at `now_ms` must have been filtered by the caller.
pub fn write_snapshot(path: &Path, data: &BTreeMap<String, Entry>, now_ms: u64) -> Result<String> {
    let checksum = data_checksum(data);
    let snapshot = SnapshotFile {
        version: SCHEMA_VERSION,
        created_at: now_ms,
        checksum: checksum.clone(),
        data: data.clone(),
    };

    let tmp_path = path.with_extension("json.tmp");
    let encoded = serde_json::to_vec_pretty(&snapshot)?;
    fs::write(&tmp_path, &encoded)?;
    let tmp = fs::File::open(&tmp_path)?;
    tmp.sync_all()?;
    fs::rename(&tmp_path, path)?;

    info!(
        path = %path.display(),
        keys = data.len(),
        bytes = encoded.len(),
        "wrote snapshot"
    );
    Ok(checksum)
}

/// Load a snapshot from disk.
///
/// Returns `Ok(None)` when the file is absent or fails its checksum (the
/// caller continues with AOF replay). A file with `data` but no usable
/// checksum is loaded optimistically. Entries expired at `now_ms` are
/// dropped.
pub fn load_snapshot(path: &Path, now_ms: u64) -> Result<Option<BTreeMap<String, Entry>>> {
    let contents = match fs::read(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let value: Value = match serde_json::from_slice(&contents) {
        Ok(value) => value,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "snapshot is not valid JSON, skipping");
            return Ok(None);
        }
    };

    let Some(data_value) = value.get("data") else {
        warn!(path = %path.display(), "snapshot has no data field, skipping");
        return Ok(None);
    };

    let data: BTreeMap<String, Entry> = match serde_json::from_value(data_value.clone()) {
        Ok(data) => data,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "snapshot data is malformed, skipping");
            return Ok(None);
        }
    };

    if let Some(expected) = value.get("checksum").and_then(Value::as_str) {
        let computed = data_checksum(&data);
        if computed != expected {
            warn!(
                path = %path.display(),
                expected,
                computed = %computed,
                "snapshot checksum mismatch, skipping load"
            );
            return Ok(None);
        }
    } else {
        warn!(path = %path.display(), "snapshot has no checksum, loading optimistically");
    }

    let live: BTreeMap<String, Entry> = data
        .into_iter()
        .filter(|(_, entry)| !entry.expired(now_ms))
        .collect();
    Ok(Some(live))
}
