//! # toska-gateway
//!
//! The HTTP surface of a Toska node: the KV API, the stats endpoint, the
//! replication endpoints a leader serves to its followers, and the access
//! middleware (bearer authentication, token-bucket rate limiting, and the
//! read-only gate for follower mode).
//!
//! KV paths and `/stats` pass through the middleware; `/health`,
//! `/replication/*` and the root do not.

#![warn(missing_docs)]

pub mod auth;
pub mod config_cache;
pub mod error;
pub mod ratelimit;
pub mod routes;
pub mod server;

pub use config_cache::ConfigCache;
pub use error::ApiError;
pub use ratelimit::RateLimiter;
pub use server::{AppState, build_router, serve};
