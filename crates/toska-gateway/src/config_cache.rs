//! Hot-path configuration cache.
//!
//! Four values are read on every request: the auth token, the two rate-limit
//! parameters, and the replica URL. They live in a small snapshot behind a
//! read-write lock so request handlers never touch the config store; writes
//! (config reload) take the slow path. Environment variables win over cached
//! values on every read, so an operator override takes effect immediately.

use std::sync::RwLock;

use toska_store::StoreConfig;

/// The cached hot-path values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CachedValues {
    /// Bearer token; empty disables authentication.
    pub auth_token: String,
    /// Token bucket refill rate; 0 disables rate limiting.
    pub rate_limit_per_sec: u64,
    /// Token bucket capacity; 0 disables rate limiting.
    pub rate_limit_burst: u64,
    /// Leader base URL; non-empty means follower mode.
    pub replica_url: String,
}

/// Contention-free reads of the request-path config subset.
#[derive(Debug, Default)]
pub struct ConfigCache {
    values: RwLock<CachedValues>,
}

impl ConfigCache {
    /// Build an empty cache (auth and rate limiting disabled).
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the cache from a loaded configuration.
    pub fn from_config(config: &StoreConfig) -> Self {
        let cache = Self::new();
        cache.update(CachedValues {
            auth_token: config.auth_token.clone(),
            rate_limit_per_sec: config.rate_limit_per_sec,
            rate_limit_burst: config.rate_limit_burst,
            replica_url: config.replica_url.clone(),
        });
        cache
    }

    /// Replace the cached snapshot. Writer-side (config reload) only.
    pub fn update(&self, values: CachedValues) {
        *self.values.write().unwrap() = values;
    }

    /// Effective auth token. `TOSKA_AUTH_TOKEN` wins when set.
    pub fn auth_token(&self) -> String {
        match std::env::var("TOSKA_AUTH_TOKEN") {
            Ok(token) => token,
            Err(_) => self.values.read().unwrap().auth_token.clone(),
        }
    }

    /// Effective refill rate. `TOSKA_RATE_LIMIT_PER_SEC` wins when parseable.
    pub fn rate_limit_per_sec(&self) -> u64 {
        env_u64("TOSKA_RATE_LIMIT_PER_SEC")
            .unwrap_or_else(|| self.values.read().unwrap().rate_limit_per_sec)
    }

    /// Effective burst capacity. `TOSKA_RATE_LIMIT_BURST` wins when parseable.
    pub fn rate_limit_burst(&self) -> u64 {
        env_u64("TOSKA_RATE_LIMIT_BURST")
            .unwrap_or_else(|| self.values.read().unwrap().rate_limit_burst)
    }

    /// Effective replica URL. `TOSKA_REPLICA_URL` wins when set.
    pub fn replica_url(&self) -> String {
        match std::env::var("TOSKA_REPLICA_URL") {
            Ok(url) => url,
            Err(_) => self.values.read().unwrap().replica_url.clone(),
        }
    }

    /// True when this node is configured as a follower.
    pub fn follower_mode(&self) -> bool {
        !self.replica_url().is_empty()
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|value| value.parse().ok())
}
