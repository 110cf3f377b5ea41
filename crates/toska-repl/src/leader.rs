//! Leader-side replication reads.
//!
//! Thin functions over the files the store coordinator manages: the snapshot
//! file is streamed verbatim after a fresh write, and the AOF is served in
//! byte ranges. Appends and reads coexist because the store only ever appends
//! between truncations; a range read sees a prefix-consistent file.

use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use tracing::debug;

use toska_store::{ReplicationInfo, Store};

use crate::error::{ReplError, Result};

/// Default maximum bytes for one AOF range read (1 MiB).
pub const DEFAULT_MAX_BYTES: u64 = 1024 * 1024;
/// Upper bound any single range read is clamped to (4 MiB).
pub const CHUNK_CAP_BYTES: u64 = 4 * 1024 * 1024;

/// One successful AOF range read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AofChunk {
    /// Raw log bytes starting at `offset`.
    pub bytes: Vec<u8>,
    /// Byte offset the chunk starts at.
    pub offset: u64,
    /// Total AOF size at read time.
    pub aof_size: u64,
}

/// Outcome of an AOF range request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AofRead {
    /// Bytes were available at the requested offset.
    Data(AofChunk),
    /// The requested offset is at or past the end of the log.
    NoNewData {
        /// Total AOF size at read time.
        aof_size: u64,
    },
}

/// Leader replication endpoints over the store's files.
#[derive(Clone)]
pub struct LeaderFiles {
    store: Arc<Store>,
    chunk_cap: u64,
}

impl LeaderFiles {
    /// Build a leader view over `store` with the default chunk cap.
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            chunk_cap: CHUNK_CAP_BYTES,
        }
    }

    /// Override the per-request byte cap.
    pub fn with_chunk_cap(mut self, cap: u64) -> Self {
        self.chunk_cap = cap.max(1);
        self
    }

    /// Replication metadata for the info endpoint.
    pub async fn info(&self) -> Result<ReplicationInfo> {
        Ok(self.store.replication_info().await?)
    }

    /// Trigger a fresh snapshot, then return the file contents and the
    /// metadata a follower needs to validate them.
    pub async fn snapshot_bytes(&self) -> Result<(Vec<u8>, ReplicationInfo)> {
        self.store.snapshot().await?;
        let info = self.store.replication_info().await?;
        let bytes = std::fs::read(&info.snapshot_path)?;
        debug!(bytes = bytes.len(), "serving snapshot to follower");
        Ok((bytes, info))
    }

    /// Read up to `max_bytes` of the AOF starting at byte `since`.
    ///
    /// A negative `since` is an input error. An offset at or past the end of
    /// the log yields `NoNewData` carrying the current size, which is how a
    /// follower detects leader-side truncation (its stored offset will exceed
    /// the advertised size).
    pub async fn aof_chunk(&self, since: i64, max_bytes: Option<u64>) -> Result<AofRead> {
        if since < 0 {
            return Err(ReplError::InvalidOffset { offset: since });
        }
        let since = since as u64;
        let limit = max_bytes.unwrap_or(DEFAULT_MAX_BYTES).min(self.chunk_cap).max(1);

        let info = self.store.replication_info().await?;
        let aof_size = info.aof_size;
        if since >= aof_size {
            return Ok(AofRead::NoNewData { aof_size });
        }

        let mut file = std::fs::File::open(&info.aof_path)?;
        file.seek(SeekFrom::Start(since))?;
        let len = (aof_size - since).min(limit) as usize;
        let mut bytes = vec![0u8; len];
        file.read_exact(&mut bytes)?;

        debug!(since, len, aof_size, "serving AOF range");
        Ok(AofRead::Data(AofChunk {
            bytes,
            offset: since,
            aof_size,
        }))
    }
}
