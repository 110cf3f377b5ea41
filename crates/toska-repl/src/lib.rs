//! # toska-repl
//!
//! Replication for Toska: a leader serves its snapshot file and byte ranges
//! of its AOF over HTTP; a follower bootstraps from the snapshot, then tails
//! the AOF by byte offset, persisting its position between polls.
//!
//! The AOF is append-only between truncations, so a follower can resume at
//! any newline boundary. When the leader compacts (truncating its log), the
//! advertised size drops below the follower's stored offset and the follower
//! re-bootstraps from a fresh snapshot.

#![warn(missing_docs)]

pub mod error;
pub mod follower;
pub mod leader;
pub mod offset;

pub use error::{ReplError, Result};
pub use follower::{Follower, FollowerState, FollowerStatus};
pub use leader::{AofChunk, AofRead, LeaderFiles};
