//! Store configuration.
//!
//! A `StoreConfig` is loaded once at boot from a TOML or JSON file, then
//! overridden by `TOSKA_*` environment variables. The gateway keeps its own
//! hot-path cache of the handful of values read on every request.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Durability mode for AOF appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// fsync after every append (safest, slowest).
    Always,
    /// fsync on a timer (balanced).
    #[default]
    Interval,
    /// Leave flushing to the OS (fastest, risk of recent data loss).
    None,
}

impl FromStr for SyncMode {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "always" => Ok(SyncMode::Always),
            "interval" => Ok(SyncMode::Interval),
            "none" => Ok(SyncMode::None),
            other => Err(StoreError::InvalidPayload {
                msg: format!("unknown sync_mode: {other}"),
            }),
        }
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Always => write!(f, "always"),
            SyncMode::Interval => write!(f, "interval"),
            SyncMode::None => write!(f, "none"),
        }
    }
}

/// Full store configuration. Field names match the configuration surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory for all persisted files.
    pub data_dir: PathBuf,
    /// AOF file name within `data_dir`.
    pub aof_file: String,
    /// Snapshot file name within `data_dir`.
    pub snapshot_file: String,
    /// Durability mode for AOF appends.
    pub sync_mode: SyncMode,
    /// Period for `interval` fsync, in milliseconds.
    pub sync_interval_ms: u64,
    /// Periodic full snapshot interval, in milliseconds.
    pub snapshot_interval_ms: u64,
    /// TTL sweeper period, in milliseconds.
    pub ttl_check_interval_ms: u64,
    /// Periodic compaction interval, in milliseconds.
    pub compaction_interval_ms: u64,
    /// AOF size threshold for size-triggered compaction, in bytes.
    pub compaction_aof_bytes: u64,
    /// Leader base URL. Non-empty means this node runs in follower mode.
    pub replica_url: String,
    /// Follower poll interval, in milliseconds.
    pub replica_poll_interval_ms: u64,
    /// Follower HTTP timeout (connect and overall), in milliseconds.
    pub replica_http_timeout_ms: u64,
    /// Bearer token. Non-empty means authentication is required.
    pub auth_token: String,
    /// Rate limiter refill rate. Active only when both limits are > 0.
    pub rate_limit_per_sec: u64,
    /// Rate limiter burst capacity. Active only when both limits are > 0.
    pub rate_limit_burst: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            aof_file: String::from("toska.aof"),
            snapshot_file: String::from("toska_snapshot.json"),
            sync_mode: SyncMode::Interval,
            sync_interval_ms: 1000,
            snapshot_interval_ms: 300_000,
            ttl_check_interval_ms: 1000,
            compaction_interval_ms: 300_000,
            compaction_aof_bytes: 10 * 1024 * 1024,
            replica_url: String::new(),
            replica_poll_interval_ms: 1000,
            replica_http_timeout_ms: 5000,
            auth_token: String::new(),
            rate_limit_per_sec: 0,
            rate_limit_burst: 0,
        }
    }
}

impl StoreConfig {
    /// Load a configuration file, dispatching on extension (`.toml`, `.json`).
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents).map_err(|e| StoreError::InvalidPayload {
                msg: format!("config parse error: {e}"),
            })?,
            "json" => serde_json::from_str(&contents)?,
            other => {
                return Err(StoreError::InvalidPayload {
                    msg: format!("unsupported config extension: {other}"),
                })
            }
        };
        Ok(config)
    }

    /// Apply `TOSKA_*` environment variable overrides on top of the loaded
    /// values. Unparseable values are ignored with a warning.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("TOSKA_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("TOSKA_AOF_FILE") {
            self.aof_file = v;
        }
        if let Ok(v) = std::env::var("TOSKA_SNAPSHOT_FILE") {
            self.snapshot_file = v;
        }
        if let Ok(v) = std::env::var("TOSKA_SYNC_MODE") {
            match v.parse() {
                Ok(mode) => self.sync_mode = mode,
                Err(_) => tracing::warn!(value = %v, "ignoring invalid TOSKA_SYNC_MODE"),
            }
        }
        Self::env_u64("TOSKA_SYNC_INTERVAL_MS", &mut self.sync_interval_ms);
        Self::env_u64("TOSKA_SNAPSHOT_INTERVAL_MS", &mut self.snapshot_interval_ms);
        Self::env_u64("TOSKA_TTL_CHECK_INTERVAL_MS", &mut self.ttl_check_interval_ms);
        Self::env_u64("TOSKA_COMPACTION_INTERVAL_MS", &mut self.compaction_interval_ms);
        Self::env_u64("TOSKA_COMPACTION_AOF_BYTES", &mut self.compaction_aof_bytes);
        if let Ok(v) = std::env::var("TOSKA_REPLICA_URL") {
            self.replica_url = v;
        }
        Self::env_u64(
            "TOSKA_REPLICA_POLL_INTERVAL_MS",
            &mut self.replica_poll_interval_ms,
        );
        Self::env_u64(
            "TOSKA_REPLICA_HTTP_TIMEOUT_MS",
            &mut self.replica_http_timeout_ms,
        );
        if let Ok(v) = std::env::var("TOSKA_AUTH_TOKEN") {
            self.auth_token = v;
        }
        Self::env_u64("TOSKA_RATE_LIMIT_PER_SEC", &mut self.rate_limit_per_sec);
        Self::env_u64("TOSKA_RATE_LIMIT_BURST", &mut self.rate_limit_burst);
    }

    fn env_u64(name: &str, slot: &mut u64) {
        if let Ok(v) = std::env::var(name) {
            match v.parse() {
                Ok(parsed) => *slot = parsed,
                Err(_) => tracing::warn!(var = name, value = %v, "ignoring invalid env override"),
            }
        }
    }

    /// Absolute path of the AOF file.
    pub fn aof_path(&self) -> PathBuf {
        self.data_dir.join(&self.aof_file)
    }

    /// Absolute path of the snapshot file.
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(&self.snapshot_file)
    }

    /// Absolute path of the follower offset file.
    pub fn offset_path(&self) -> PathBuf {
        self.data_dir.join("replica.offset")
    }

    /// True when this node replicates a remote leader.
    pub fn follower_mode(&self) -> bool {
        !self.replica_url.is_empty()
    }

    /// Reject configurations that cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.aof_file.is_empty() || self.snapshot_file.is_empty() {
            return Err(StoreError::InvalidPayload {
                msg: "aof_file and snapshot_file must be non-empty".to_string(),
            });
        }
        if self.sync_mode == SyncMode::Interval && self.sync_interval_ms == 0 {
            return Err(StoreError::InvalidPayload {
                msg: "sync_interval_ms must be > 0 in interval mode".to_string(),
            });
        }
        if self.ttl_check_interval_ms == 0 {
            return Err(StoreError::InvalidPayload {
                msg: "ttl_check_interval_ms must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_values() {
        let config = StoreConfig::default();
        assert_eq!(config.aof_file, "toska.aof");
        assert_eq!(config.snapshot_file, "toska_snapshot.json");
        assert_eq!(config.sync_mode, SyncMode::Interval);
        assert_eq!(config.sync_interval_ms, 1000);
        assert_eq!(config.snapshot_interval_ms, 300_000);
        assert_eq!(config.ttl_check_interval_ms, 1000);
        assert_eq!(config.compaction_interval_ms, 300_000);
        assert_eq!(config.compaction_aof_bytes, 10 * 1024 * 1024);
        assert!(config.replica_url.is_empty());
        assert_eq!(config.replica_poll_interval_ms, 1000);
        assert_eq!(config.replica_http_timeout_ms, 5000);
        assert!(config.auth_token.is_empty());
        assert_eq!(config.rate_limit_per_sec, 0);
        assert_eq!(config.rate_limit_burst, 0);
    }

    #[test]
    fn test_sync_mode_parse() {
        assert_eq!("always".parse::<SyncMode>().unwrap(), SyncMode::Always);
        assert_eq!("interval".parse::<SyncMode>().unwrap(), SyncMode::Interval);
        assert_eq!("none".parse::<SyncMode>().unwrap(), SyncMode::None);
        assert!("fsync-maybe".parse::<SyncMode>().is_err());
    }

    #[test]
    fn test_sync_mode_display_round_trip() {
        for mode in [SyncMode::Always, SyncMode::Interval, SyncMode::None] {
            assert_eq!(mode.to_string().parse::<SyncMode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_from_file_toml() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            "data_dir = \"/tmp/toska\"\nsync_mode = \"always\"\nrate_limit_per_sec = 5"
        )
        .unwrap();

        let config = StoreConfig::from_file(file.path()).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/toska"));
        assert_eq!(config.sync_mode, SyncMode::Always);
        assert_eq!(config.rate_limit_per_sec, 5);
        // Unspecified keys keep defaults.
        assert_eq!(config.aof_file, "toska.aof");
    }

    #[test]
    fn test_from_file_json() {
        let mut file = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .unwrap();
        writeln!(file, "{{\"auth_token\": \"secret\", \"sync_mode\": \"none\"}}").unwrap();

        let config = StoreConfig::from_file(file.path()).unwrap();
        assert_eq!(config.auth_token, "secret");
        assert_eq!(config.sync_mode, SyncMode::None);
    }

    #[test]
    fn test_from_file_unknown_extension() {
        let file = NamedTempFile::new().unwrap();
        assert!(StoreConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_paths() {
        let mut config = StoreConfig::default();
        config.data_dir = PathBuf::from("/var/lib/toska");
        assert_eq!(config.aof_path(), PathBuf::from("/var/lib/toska/toska.aof"));
        assert_eq!(
            config.snapshot_path(),
            PathBuf::from("/var/lib/toska/toska_snapshot.json")
        );
        assert_eq!(
            config.offset_path(),
            PathBuf::from("/var/lib/toska/replica.offset")
        );
    }

    #[test]
    fn test_follower_mode() {
        let mut config = StoreConfig::default();
        assert!(!config.follower_mode());
        config.replica_url = String::from("http://leader:4000");
        assert!(config.follower_mode());
    }

    #[test]
    fn test_validate_rejects_zero_sync_interval() {
        let mut config = StoreConfig::default();
        config.sync_mode = SyncMode::Interval;
        config.sync_interval_ms = 0;
        assert!(config.validate().is_err());

        config.sync_mode = SyncMode::Always;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_file_names() {
        let mut config = StoreConfig::default();
        config.aof_file = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serialization_round_trip() {
        let config = StoreConfig {
            data_dir: PathBuf::from("/custom"),
            auth_token: String::from("t"),
            rate_limit_per_sec: 10,
            rate_limit_burst: 20,
            ..StoreConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let decoded: StoreConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.data_dir, config.data_dir);
        assert_eq!(decoded.auth_token, config.auth_token);
        assert_eq!(decoded.rate_limit_per_sec, 10);
        assert_eq!(decoded.rate_limit_burst, 20);
    }
}
