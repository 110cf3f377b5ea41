//! In-memory index: a read-optimized map of key → entry with TTL expiry.
//!
//! Reads take the read side of the lock and may run in parallel; all writes
//! arrive serialized through the store coordinator. Expired entries are
//! removed lazily on lookup and in bulk by the periodic sweeper.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// One stored value with its optional expiry deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// The stored value.
    pub value: String,
    /// Absolute deadline in ms since the Unix epoch; absent means immortal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl Entry {
    /// Build an entry.
    pub fn new(value: &str, expires_at: Option<u64>) -> Self {
        Self {
            value: value.to_string(),
            expires_at,
        }
    }

    /// True when the deadline has passed.
    pub fn expired(&self, now_ms: u64) -> bool {
        matches!(self.expires_at, Some(deadline) if deadline <= now_ms)
    }
}

/// Concurrent key → entry map with single-writer, many-reader semantics.
#[derive(Default)]
pub struct Index {
    map: RwLock<HashMap<String, Entry>>,
}

impl Index {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a key. An expired entry reads as absent and is removed.
    pub fn get(&self, key: &str, now_ms: u64) -> Option<String> {
        {
            let map = self.map.read().unwrap();
            match map.get(key) {
                None => return None,
                Some(entry) if !entry.expired(now_ms) => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }
        // Lazy expiry: the entry was present but past its deadline.
        let mut map = self.map.write().unwrap();
        if map.get(key).is_some_and(|entry| entry.expired(now_ms)) {
            map.remove(key);
            debug!(key, "lazily expired entry on read");
        }
        None
    }

    /// Look up many keys at once; unknown or expired keys map to `None`.
    pub fn mget(&self, keys: &[String], now_ms: u64) -> BTreeMap<String, Option<String>> {
        let map = self.map.read().unwrap();
        keys.iter()
            .map(|key| {
                let value = map
                    .get(key)
                    .filter(|entry| !entry.expired(now_ms))
                    .map(|entry| entry.value.clone());
                (key.clone(), value)
            })
            .collect()
    }

    /// List up to `limit` keys matching `prefix` (empty prefix matches all).
    /// Expired entries encountered during iteration are removed. A `limit` of
    /// zero yields the empty list.
    pub fn list_keys(&self, prefix: &str, limit: usize, now_ms: u64) -> Vec<String> {
        let mut matched = Vec::new();
        let mut dead = Vec::new();
        {
            let map = self.map.read().unwrap();
            for (key, entry) in map.iter() {
                if !key.starts_with(prefix) {
                    continue;
                }
                if entry.expired(now_ms) {
                    dead.push(key.clone());
                } else if matched.len() < limit {
                    matched.push(key.clone());
                }
            }
        }
        if !dead.is_empty() {
            let mut map = self.map.write().unwrap();
            for key in &dead {
                if map.get(key).is_some_and(|entry| entry.expired(now_ms)) {
                    map.remove(key);
                }
            }
            debug!(removed = dead.len(), "expired entries removed during listing");
        }
        matched
    }

    /// Insert or overwrite a key. Writer-side only.
    pub fn insert(&self, key: &str, entry: Entry) {
        self.map.write().unwrap().insert(key.to_string(), entry);
    }

    /// Remove a key. Returns true when it was present. Writer-side only.
    pub fn remove(&self, key: &str) -> bool {
        self.map.write().unwrap().remove(key).is_some()
    }

    /// Remove every entry whose deadline is at or before `now_ms`.
    /// Returns the number of entries removed.
    pub fn sweep_expired(&self, now_ms: u64) -> usize {
        let mut map = self.map.write().unwrap();
        let before = map.len();
        map.retain(|_, entry| !entry.expired(now_ms));
        before - map.len()
    }

    /// Live (non-expired) state as a sorted map, for snapshot writes.
    pub fn snapshot_entries(&self, now_ms: u64) -> BTreeMap<String, Entry> {
        let map = self.map.read().unwrap();
        map.iter()
            .filter(|(_, entry)| !entry.expired(now_ms))
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }

    /// Replace the whole index contents. Used by snapshot reload and
    /// replication bootstrap.
    pub fn replace_all(&self, entries: BTreeMap<String, Entry>) {
        let mut map = self.map.write().unwrap();
        map.clear();
        map.extend(entries);
    }

    /// Number of entries currently held, expired or not.
    pub fn len(&self) -> usize {
        self.map.read().unwrap().len()
    }

    /// True when no entries are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
