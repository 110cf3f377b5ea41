//! Read-only follower: snapshot bootstrap plus byte-offset AOF tailing.
//!
//! The follower is a single task driven by a poll timer. It bootstraps from
//! the leader snapshot, then tails the leader AOF from its persisted byte
//! offset. Any HTTP or decode failure parks the state machine in `Error`
//! without losing the phase; the failed step is retried on the next tick.
//! When the advertised AOF size drops below the stored offset the leader has
//! compacted, and the follower re-bootstraps from a fresh snapshot.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use toska_store::{now_ms, Store};

use crate::error::{ReplError, Result};
use crate::offset::{load_offset, store_offset};

/// Maximum bytes requested per tail poll.
const POLL_MAX_BYTES: u64 = 65_536;

/// Header carrying the leader's current AOF size.
pub const AOF_SIZE_HEADER: &str = "x-toska-aof-size";
/// Header carrying the offset a chunk starts at.
pub const AOF_OFFSET_HEADER: &str = "x-toska-aof-offset";

/// Observable follower state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FollowerState {
    /// Fetching and applying a full leader snapshot.
    Bootstrapping,
    /// Tailing the leader AOF by byte offset.
    Tailing,
    /// Last step failed; it will be retried on the next tick.
    Error,
}

/// Which step the follower performs next. Unlike the reported state, the
/// phase survives errors so the failed step is what gets retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Bootstrap,
    Tail,
}

/// Serializable follower status, served by `/replication/status`.
#[derive(Debug, Clone, Serialize)]
pub struct FollowerStatus {
    /// Current state machine state.
    pub state: FollowerState,
    /// Leader base URL (trailing slash trimmed).
    pub leader_url: String,
    /// Last byte offset successfully consumed.
    pub offset: u64,
    /// Wall-clock ms of the last successful snapshot bootstrap.
    pub last_snapshot_at: u64,
    /// Wall-clock ms of the last completed poll attempt.
    pub last_poll_at: u64,
    /// Message of the last failure, if any.
    pub last_error: Option<String>,
}

struct Inner {
    phase: Phase,
    state: FollowerState,
    offset: u64,
    last_snapshot_at: u64,
    last_poll_at: u64,
    last_error: Option<String>,
}

/// The replication follower.
pub struct Follower {
    store: Arc<Store>,
    client: reqwest::Client,
    base_url: String,
    offset_path: PathBuf,
    inner: std::sync::Mutex<Inner>,
}

impl Follower {
    /// Build a follower for `leader_url`, resuming from a persisted offset
    /// when one exists.
    pub fn new(store: Arc<Store>, leader_url: &str, http_timeout_ms: u64) -> Result<Self> {
        let timeout = Duration::from_millis(http_timeout_ms.max(1));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|err| ReplError::Http {
                msg: err.to_string(),
            })?;

        let offset_path = store.config().offset_path();
        let (phase, offset) = match load_offset(&offset_path)? {
            Some(offset) => {
                info!(offset, "resuming AOF tail from persisted offset");
                (Phase::Tail, offset)
            }
            None => (Phase::Bootstrap, 0),
        };
        let state = match phase {
            Phase::Bootstrap => FollowerState::Bootstrapping,
            Phase::Tail => FollowerState::Tailing,
        };

        Ok(Self {
            store,
            client,
            base_url: leader_url.trim_end_matches('/').to_string(),
            offset_path,
            inner: std::sync::Mutex::new(Inner {
                phase,
                state,
                offset,
                last_snapshot_at: 0,
                last_poll_at: 0,
                last_error: None,
            }),
        })
    }

    /// Current status snapshot.
    pub fn status(&self) -> FollowerStatus {
        let inner = self.inner.lock().unwrap();
        FollowerStatus {
            state: inner.state,
            leader_url: self.base_url.clone(),
            offset: inner.offset,
            last_snapshot_at: inner.last_snapshot_at,
            last_poll_at: inner.last_poll_at,
            last_error: inner.last_error.clone(),
        }
    }

    fn phase(&self) -> Phase {
        self.inner.lock().unwrap().phase
    }

    fn offset(&self) -> u64 {
        self.inner.lock().unwrap().offset
    }

    fn record_failure(&self, err: &ReplError) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = FollowerState::Error;
        inner.last_error = Some(err.to_string());
        inner.last_poll_at = now_ms();
    }

    fn commit_offset(&self, offset: u64) -> Result<()> {
        store_offset(&self.offset_path, offset)?;
        let mut inner = self.inner.lock().unwrap();
        inner.offset = offset;
        inner.last_poll_at = now_ms();
        inner.state = FollowerState::Tailing;
        inner.phase = Phase::Tail;
        inner.last_error = None;
        Ok(())
    }

    /// Run one step of the state machine: bootstrap or one tail poll.
    pub async fn poll_once(&self) {
        let result = match self.phase() {
            Phase::Bootstrap => self.bootstrap().await,
            Phase::Tail => self.tail_once().await,
        };
        if let Err(err) = result {
            warn!(error = %err, "follower step failed");
            self.record_failure(&err);
        }
    }

    /// Fetch the leader snapshot and replace local state with it.
    async fn bootstrap(&self) -> Result<()> {
        let url = format!("{}/replication/snapshot", self.base_url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ReplError::Http {
                msg: format!("snapshot fetch returned {}", response.status()),
            });
        }
        let payload: Value = response.json().await.map_err(|err| ReplError::Decode {
            msg: err.to_string(),
        })?;

        self.store.replace_snapshot(&payload).await?;
        self.commit_offset(0)?;
        {
            let mut inner = self.inner.lock().unwrap();
            inner.last_snapshot_at = now_ms();
        }
        info!("follower bootstrapped from leader snapshot");
        Ok(())
    }

    /// One tail poll: fetch a chunk at the current offset and apply it.
    async fn tail_once(&self) -> Result<()> {
        let offset = self.offset();
        let url = format!(
            "{}/replication/aof?since={}&max_bytes={}",
            self.base_url, offset, POLL_MAX_BYTES
        );
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let leader_size = header_u64(response.headers(), AOF_SIZE_HEADER);

        // Leader compacted beneath us: the stored offset points past the end
        // of a truncated log. Start over from a fresh snapshot.
        if let Some(size) = leader_size {
            if size < offset {
                info!(offset, leader_size = size, "leader AOF truncated, re-bootstrapping");
                {
                    let mut inner = self.inner.lock().unwrap();
                    inner.phase = Phase::Bootstrap;
                    inner.state = FollowerState::Bootstrapping;
                }
                self.bootstrap().await?;
                return Ok(());
            }
        }

        if status == reqwest::StatusCode::NO_CONTENT {
            let next = leader_size.unwrap_or(offset).max(offset);
            self.commit_offset(next)?;
            return Ok(());
        }
        if !status.is_success() {
            return Err(ReplError::Http {
                msg: format!("aof fetch returned {status}"),
            });
        }

        let body = response.bytes().await?;
        let records = decode_records(&body);
        let applied = self.store.apply_replication(&records).await?;
        debug!(applied, bytes = body.len(), offset, "applied replicated records");

        let next = (offset + body.len() as u64).max(leader_size.unwrap_or(0));
        self.commit_offset(next)?;
        Ok(())
    }

    /// Drive the poll loop until shutdown.
    pub async fn run(self: Arc<Self>, poll_interval_ms: u64, mut shutdown: watch::Receiver<bool>) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(poll_interval_ms.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if !self.store.is_running() {
                        break;
                    }
                    self.poll_once().await;
                }
                _ = shutdown.changed() => {
                    debug!("follower draining");
                    break;
                }
            }
        }
    }
}

fn header_u64(headers: &reqwest::header::HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}

/// Split a chunk into candidate records, skipping lines that do not decode.
fn decode_records(body: &[u8]) -> Vec<Value> {
    let text = String::from_utf8_lossy(body);
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(error = %err, "skipping undecodable replicated line");
                None
            }
        })
        .collect()
}
