//! Token-bucket rate limiting per client identity.
//!
//! One bucket per client (source address string, or `"unknown"`). Buckets
//! refill continuously at `per_sec` up to `burst`; a request is accepted when
//! at least one whole token is available. Limits of zero disable the check.
//! Parameter changes keep existing bucket state; the new values apply from
//! the next refill.

use std::collections::HashMap;
use std::sync::Mutex;

/// Idle period after which a bucket becomes eligible for eviction (10 min).
pub const BUCKET_IDLE_MS: u64 = 10 * 60 * 1000;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill_ms: u64,
}

/// Per-client token buckets.
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    /// Create an empty limiter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check one request from `client`. Returns true when the request is
    /// admitted. Disabled (always true) when either parameter is zero.
    pub fn check(&self, client: &str, per_sec: u64, burst: u64, now_ms: u64) -> bool {
        if per_sec == 0 || burst == 0 {
            return true;
        }

        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets.entry(client.to_string()).or_insert(Bucket {
            tokens: burst as f64,
            last_refill_ms: now_ms,
        });

        let elapsed_ms = now_ms.saturating_sub(bucket.last_refill_ms);
        bucket.tokens =
            (bucket.tokens + per_sec as f64 * elapsed_ms as f64 / 1000.0).min(burst as f64);
        bucket.last_refill_ms = now_ms;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drop buckets idle for longer than `idle_ms`. Returns how many were
    /// removed.
    pub fn evict_idle(&self, now_ms: u64, idle_ms: u64) -> usize {
        let mut buckets = self.buckets.lock().unwrap();
        let before = buckets.len();
        buckets.retain(|_, bucket| now_ms.saturating_sub(bucket.last_refill_ms) <= idle_ms);
        before - buckets.len()
    }

    /// Number of tracked clients.
    pub fn active_clients(&self) -> usize {
        self.buckets.lock().unwrap().len()
    }
}
