//! Durable response cache for offline support.
//!
//! This module provides a backend-agnostic key/value cache that:
//! - Stores JSON responses under the request path + query as the key
//! - Tracks an expiry per entry, computed from a configurable TTL
//! - Keeps expired entries around so reads can degrade to stale data
//!   when the backend is unreachable

mod storage;

pub use storage::{CacheStore, CachedEntry, NoopStore, SqliteStore};
