//! Store coordinator.
//!
//! The single writer: every mutation flows through here in FIFO order so the
//! AOF byte order matches the order of visible index updates. Reads bypass
//! the coordinator and hit the index directly. The coordinator also drives
//! the maintenance timers (fsync, snapshot, TTL sweep, compaction).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::aof::AofLog;
use crate::config::{StoreConfig, SyncMode};
use crate::error::{Result, StoreError};
use crate::index::{Entry, Index};
use crate::record::{AofOp, AofRecord};
use crate::snapshot::{load_snapshot, write_snapshot};
use crate::{now_ms, SCHEMA_VERSION};

/// Serialized writer state: the AOF handle plus last-snapshot bookkeeping.
struct Writer {
    aof: AofLog,
    last_snapshot_at_ms: u64,
    last_snapshot_checksum: Option<String>,
}

#[derive(Default)]
struct Counters {
    puts: AtomicU64,
    deletes: AtomicU64,
    expired_removed: AtomicU64,
    compactions: AtomicU64,
}

/// Store statistics, as returned by `GET /stats`.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    /// Number of keys currently indexed (including not-yet-swept expired).
    pub keys: usize,
    /// Current AOF byte length.
    pub aof_bytes: u64,
    /// Current snapshot file byte length (0 when absent).
    pub snapshot_bytes: u64,
    /// Wall-clock ms of the last snapshot write, 0 if none this run.
    pub last_snapshot_at: u64,
    /// Checksum of the last written snapshot, if any.
    pub last_snapshot_checksum: Option<String>,
    /// Configured sync mode.
    pub sync_mode: String,
    /// Size threshold for compaction.
    pub compaction_aof_bytes: u64,
    /// Milliseconds since the store booted.
    pub uptime_ms: u64,
    /// Total successful put operations.
    pub puts: u64,
    /// Total delete operations.
    pub deletes: u64,
    /// Total entries removed by TTL expiry.
    pub expired_removed: u64,
    /// Total compactions performed.
    pub compactions: u64,
}

/// Replication metadata advertised by the leader endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ReplicationInfo {
    /// Path of the snapshot file.
    pub snapshot_path: PathBuf,
    /// Checksum of the last committed snapshot, if known.
    pub snapshot_checksum: Option<String>,
    /// Wall-clock ms of the last snapshot write.
    pub snapshot_created_at: u64,
    /// Snapshot schema version.
    pub snapshot_version: u32,
    /// Path of the AOF file.
    pub aof_path: PathBuf,
    /// Current AOF byte length.
    pub aof_size: u64,
    /// AOF record schema version.
    pub aof_version: u32,
}

/// The storage engine coordinator.
pub struct Store {
    config: StoreConfig,
    index: Index,
    writer: Mutex<Writer>,
    running: AtomicBool,
    started_at_ms: u64,
    counters: Counters,
    shutdown_tx: watch::Sender<bool>,
}

impl Store {
    /// Open the store: create the data directory, load the snapshot, replay
    /// the AOF on top of it, then open the AOF for appending.
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir)?;

        let boot_ms = now_ms();
        let index = Index::new();

        if let Some(entries) = load_snapshot(&config.snapshot_path(), boot_ms)? {
            info!(keys = entries.len(), "loaded snapshot");
            index.replace_all(entries);
        }

        let replayed = AofLog::replay(&config.aof_path(), boot_ms)?;
        if !replayed.is_empty() {
            info!(records = replayed.len(), "replaying AOF");
        }
        for record in &replayed {
            Self::apply_to_index(&index, record);
        }

        let aof = AofLog::open(&config.aof_path())?;
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            index,
            writer: Mutex::new(Writer {
                aof,
                last_snapshot_at_ms: 0,
                last_snapshot_checksum: None,
            }),
            running: AtomicBool::new(true),
            started_at_ms: boot_ms,
            counters: Counters::default(),
            shutdown_tx,
        })
    }

    /// The configuration this store was opened with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// True until `shutdown` has run.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(StoreError::NotRunning)
        }
    }

    fn validate_key(key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey);
        }
        Ok(())
    }

    fn apply_to_index(index: &Index, record: &AofRecord) {
        match record.op {
            AofOp::Set => {
                if let Some(value) = &record.value {
                    index.insert(&record.key, Entry::new(value, record.expires_at));
                }
            }
            AofOp::Del => {
                index.remove(&record.key);
            }
        }
    }

    /// Append a record, honoring the failure policy: an append or fsync
    /// failure is logged and the in-memory change stands.
    fn append_record(&self, writer: &mut Writer, record: &AofRecord) {
        if let Err(err) = writer.aof.append(record) {
            warn!(key = %record.key, error = %err, "AOF append failed, continuing in-memory");
            return;
        }
        if self.config.sync_mode == SyncMode::Always {
            if let Err(err) = writer.aof.sync() {
                warn!(error = %err, "AOF fsync failed");
            }
        }
    }

    /// Insert or overwrite a key, with optional TTL in milliseconds.
    ///
    /// A TTL of zero or less means the entry is already expired: the key is
    /// deleted and a `del` record is emitted instead of a `set`.
    pub async fn put(&self, key: &str, value: &str, ttl_ms: Option<i64>) -> Result<()> {
        self.ensure_running()?;
        Self::validate_key(key)?;

        match ttl_ms {
            Some(ttl) if ttl <= 0 => return self.delete(key).await,
            _ => {}
        }
        let expires_at = ttl_ms.map(|ttl| now_ms().saturating_add(ttl as u64));

        let mut writer = self.writer.lock().await;
        self.index.insert(key, Entry::new(value, expires_at));
        let record = AofRecord::set(key, value, expires_at);
        self.append_record(&mut writer, &record);
        drop(writer);

        self.counters.puts.fetch_add(1, Ordering::Relaxed);
        self.maybe_compact_on_size().await;
        Ok(())
    }

    /// Remove a key. Deleting an absent key is still ok (and still logged),
    /// so deletes are idempotent.
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.ensure_running()?;
        Self::validate_key(key)?;

        let mut writer = self.writer.lock().await;
        self.index.remove(key);
        let record = AofRecord::del(key);
        self.append_record(&mut writer, &record);
        drop(writer);

        self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Read one key. Bypasses the writer.
    pub fn get(&self, key: &str) -> Result<String> {
        self.ensure_running()?;
        Self::validate_key(key)?;
        self.index.get(key, now_ms()).ok_or(StoreError::NotFound)
    }

    /// Read many keys; unknown keys map to `None`. Bypasses the writer.
    pub fn mget(&self, keys: &[String]) -> Result<BTreeMap<String, Option<String>>> {
        self.ensure_running()?;
        Ok(self.index.mget(keys, now_ms()))
    }

    /// List keys by prefix. Bypasses the writer.
    pub fn list_keys(&self, prefix: &str, limit: usize) -> Result<Vec<String>> {
        self.ensure_running()?;
        Ok(self.index.list_keys(prefix, limit, now_ms()))
    }

    /// Write a snapshot of the live state, then truncate the AOF.
    pub async fn snapshot(&self) -> Result<String> {
        self.ensure_running()?;
        let mut writer = self.writer.lock().await;
        self.snapshot_locked(&mut writer)
    }

    fn snapshot_locked(&self, writer: &mut Writer) -> Result<String> {
        let now = now_ms();
        let entries = self.index.snapshot_entries(now);
        let checksum = write_snapshot(&self.config.snapshot_path(), &entries, now)?;
        writer.aof.truncate()?;
        writer.last_snapshot_at_ms = now;
        writer.last_snapshot_checksum = Some(checksum.clone());
        Ok(checksum)
    }

    /// Snapshot + truncate, counted as a compaction.
    pub async fn compact(&self) -> Result<String> {
        self.ensure_running()?;
        let mut writer = self.writer.lock().await;
        let checksum = self.snapshot_locked(&mut writer)?;
        self.counters.compactions.fetch_add(1, Ordering::Relaxed);
        info!("compaction complete");
        Ok(checksum)
    }

    /// Size-triggered compaction, checked after each put.
    async fn maybe_compact_on_size(&self) {
        if self.config.compaction_aof_bytes == 0 {
            return;
        }
        let mut writer = self.writer.lock().await;
        let size = match writer.aof.size() {
            Ok(size) => size,
            Err(_) => return,
        };
        if size < self.config.compaction_aof_bytes {
            return;
        }
        debug!(aof_bytes = size, threshold = self.config.compaction_aof_bytes, "size-triggered compaction");
        if let Err(err) = self.snapshot_locked(&mut writer) {
            warn!(error = %err, "size-triggered compaction failed");
        } else {
            self.counters.compactions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Replace the full store state from a replication snapshot payload.
    ///
    /// The payload must carry a `data` object; when a `checksum` is present
    /// it is verified first. On success the index is replaced, a fresh local
    /// snapshot is committed and the AOF truncated.
    pub async fn replace_snapshot(&self, payload: &Value) -> Result<()> {
        self.ensure_running()?;

        let Some(data_value) = payload.get("data") else {
            return Err(StoreError::InvalidSnapshot {
                msg: "missing data field".to_string(),
            });
        };
        let data: BTreeMap<String, Entry> = serde_json::from_value(data_value.clone())
            .map_err(|err| StoreError::InvalidSnapshot {
                msg: format!("malformed data: {err}"),
            })?;

        match payload.get("checksum").and_then(Value::as_str) {
            Some(expected) => {
                let computed = crate::snapshot::data_checksum(&data);
                if computed != expected {
                    return Err(StoreError::InvalidChecksum {
                        expected: expected.to_string(),
                        computed,
                    });
                }
            }
            None => {
                warn!("replication snapshot has no checksum, accepting optimistically");
            }
        }

        let now = now_ms();
        let live: BTreeMap<String, Entry> = data
            .into_iter()
            .filter(|(_, entry)| !entry.expired(now))
            .collect();

        let mut writer = self.writer.lock().await;
        self.index.replace_all(live);
        self.snapshot_locked(&mut writer)?;
        info!(keys = self.index.len(), "replaced state from leader snapshot");
        Ok(())
    }

    /// Apply a batch of replicated records in order. Records that do not
    /// decode or whose checksum does not verify are skipped, never fatal to
    /// the batch; records without a checksum are accepted. Returns the number
    /// of records applied.
    pub async fn apply_replication(&self, records: &[Value]) -> Result<usize> {
        self.ensure_running()?;

        let now = now_ms();
        let mut applied = 0usize;
        let mut writer = self.writer.lock().await;
        for value in records {
            let record = match AofRecord::from_value(value) {
                Ok(record) => record,
                Err(err) => {
                    warn!(error = %err, "skipping malformed replicated record");
                    continue;
                }
            };
            if !record.verify() {
                debug!(key = %record.key, "skipping replicated record with bad checksum");
                continue;
            }
            if record.op == AofOp::Set && record.expired(now) {
                debug!(key = %record.key, "skipping already-expired replicated set");
                continue;
            }
            Self::apply_to_index(&self.index, &record);
            self.append_record(&mut writer, &record);
            applied += 1;
        }
        Ok(applied)
    }

    /// fsync the AOF. Driven by the interval-sync timer.
    pub async fn sync(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.aof.sync()
    }

    /// Remove expired entries in bulk. Driven by the TTL sweeper timer.
    pub fn sweep_expired(&self) -> usize {
        let removed = self.index.sweep_expired(now_ms());
        if removed > 0 {
            debug!(removed, "TTL sweep removed entries");
            self.counters
                .expired_removed
                .fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    /// Current statistics.
    pub async fn stats(&self) -> Result<StoreStats> {
        self.ensure_running()?;
        let writer = self.writer.lock().await;
        let aof_bytes = writer.aof.size().unwrap_or(0);
        let snapshot_bytes = std::fs::metadata(self.config.snapshot_path())
            .map(|meta| meta.len())
            .unwrap_or(0);
        Ok(StoreStats {
            keys: self.index.len(),
            aof_bytes,
            snapshot_bytes,
            last_snapshot_at: writer.last_snapshot_at_ms,
            last_snapshot_checksum: writer.last_snapshot_checksum.clone(),
            sync_mode: self.config.sync_mode.to_string(),
            compaction_aof_bytes: self.config.compaction_aof_bytes,
            uptime_ms: now_ms().saturating_sub(self.started_at_ms),
            puts: self.counters.puts.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            expired_removed: self.counters.expired_removed.load(Ordering::Relaxed),
            compactions: self.counters.compactions.load(Ordering::Relaxed),
        })
    }

    /// Replication metadata for the leader endpoints.
    pub async fn replication_info(&self) -> Result<ReplicationInfo> {
        self.ensure_running()?;
        let writer = self.writer.lock().await;
        Ok(ReplicationInfo {
            snapshot_path: self.config.snapshot_path(),
            snapshot_checksum: writer.last_snapshot_checksum.clone(),
            snapshot_created_at: writer.last_snapshot_at_ms,
            snapshot_version: SCHEMA_VERSION,
            aof_path: self.config.aof_path(),
            aof_size: writer.aof.size().unwrap_or(0),
            aof_version: SCHEMA_VERSION,
        })
    }

    /// Subscribe to the shutdown signal. Maintenance loops and the follower
    /// watch this to drain cleanly.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Stop the store: signal the timers, flush and release the AOF. No
    /// snapshot is written at shutdown.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        let mut writer = self.writer.lock().await;
        if let Err(err) = writer.aof.sync() {
            warn!(error = %err, "final AOF flush failed");
        }
        info!("store shut down");
    }

    /// Spawn the maintenance timers: interval fsync, periodic snapshot, TTL
    /// sweep and periodic compaction. Each loop drains on shutdown.
    pub fn spawn_maintenance(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        if self.config.sync_mode == SyncMode::Interval {
            handles.push(spawn_timer(
                self.clone(),
                self.config.sync_interval_ms,
                "aof-sync",
                |store| async move {
                    if let Err(err) = store.sync().await {
                        warn!(error = %err, "interval fsync failed");
                    }
                },
            ));
        }

        handles.push(spawn_timer(
            self.clone(),
            self.config.snapshot_interval_ms,
            "snapshot",
            |store| async move {
                if let Err(err) = store.snapshot().await {
                    warn!(error = %err, "periodic snapshot failed");
                }
            },
        ));

        handles.push(spawn_timer(
            self.clone(),
            self.config.ttl_check_interval_ms,
            "ttl-sweep",
            |store| async move {
                store.sweep_expired();
            },
        ));

        handles.push(spawn_timer(
            self.clone(),
            self.config.compaction_interval_ms,
            "compaction",
            |store| async move {
                if let Err(err) = store.compact().await {
                    warn!(error = %err, "periodic compaction failed");
                }
            },
        ));

        handles
    }
}

fn spawn_timer<F, Fut>(
    store: Arc<Store>,
    period_ms: u64,
    name: &'static str,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn(Arc<Store>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let mut shutdown = store.shutdown_signal();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(period_ms.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick of tokio's interval fires immediately.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if !store.is_running() {
                        break;
                    }
                    tick(store.clone()).await;
                }
                _ = shutdown.changed() => {
                    debug!(timer = name, "maintenance timer draining");
                    break;
                }
            }
        }
    })
}

/// Normalize a loose JSON TTL into milliseconds.
///
/// Integers pass through; string integers are parsed; anything else (null,
/// invalid strings, floats, objects) behaves as absent.
pub fn normalize_ttl(raw: Option<&Value>) -> Option<i64> {
    match raw? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
