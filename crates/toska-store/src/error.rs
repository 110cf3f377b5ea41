//! Error types for the storage engine.

use thiserror::Error;

/// Convenience result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced through the store API.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Key absent or expired.
    #[error("key not found")]
    NotFound,

    /// Store has been shut down or never initialized.
    #[error("store not running")]
    NotRunning,

    /// Key failed input validation (empty or non-UTF-8).
    #[error("invalid key")]
    InvalidKey,

    /// Request payload failed validation.
    #[error("invalid payload: {msg}")]
    InvalidPayload {
        /// What was wrong with the payload.
        msg: String,
    },

    /// The `keys` field of an mget request was not a list of strings.
    #[error("invalid keys")]
    InvalidKeys,

    /// Prefix parameter failed validation.
    #[error("invalid prefix")]
    InvalidPrefix,

    /// Replication snapshot payload was malformed.
    #[error("invalid snapshot: {msg}")]
    InvalidSnapshot {
        /// What was wrong with the snapshot payload.
        msg: String,
    },

    /// A checksum did not match the canonical hash of the covered fields.
    #[error("invalid checksum: expected {expected}, computed {computed}")]
    InvalidChecksum {
        /// Checksum carried by the payload.
        expected: String,
        /// Checksum recomputed over the payload.
        computed: String,
    },

    /// A replication record was not a JSON object of the expected shape.
    #[error("invalid replication record")]
    InvalidReplicationRecord,

    /// AOF stream range parameter was malformed.
    #[error("invalid offset")]
    InvalidOffset,

    /// Underlying I/O failure.
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode failure.
    #[error("JSON error")]
    Json(#[from] serde_json::Error),
}
