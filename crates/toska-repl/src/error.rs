//! Error types for the replication subsystem.

use thiserror::Error;

/// Convenience result alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplError>;

/// Errors that can occur in the replication subsystem.
#[derive(Debug, Error)]
pub enum ReplError {
    /// HTTP transport failure talking to the leader.
    #[error("http error: {msg}")]
    Http {
        /// Description of the transport failure.
        msg: String,
    },

    /// Response body could not be decoded.
    #[error("decode error: {msg}")]
    Decode {
        /// Description of the decode failure.
        msg: String,
    },

    /// AOF stream range parameter was malformed.
    #[error("invalid offset: {offset}")]
    InvalidOffset {
        /// The offending offset value.
        offset: i64,
    },

    /// Store-level failure while applying replicated state.
    #[error("store error")]
    Store(#[from] toska_store::StoreError),

    /// I/O failure reading leader files or persisting the offset.
    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ReplError {
    fn from(err: reqwest::Error) -> Self {
        ReplError::Http {
            msg: err.to_string(),
        }
    }
}
