//! Versioned response cache backing the shell worker.
//!
//! This module provides:
//! - Named cache buckets keyed by request identity (URL without fragment)
//! - Atomic population of a bucket from a list of requests
//! - A network-first fetch strategy that falls back to cached responses
//!   when the network rejects

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{CacheStorage, SqliteStorage};
pub use traits::{CacheResult, CacheSource};
#[cfg(test)]
pub use traits::CachedResponse;
