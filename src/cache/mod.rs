//! Shared query cache for REST reads.
//!
//! This module provides a resource-agnostic cache that:
//! - Stores one JSON result per key (the endpoint path)
//! - De-duplicates concurrent fetches of the same key
//! - Marks entries stale on invalidation and broadcasts the event
//! - Persists entries in SQLite when the process wants them across runs

mod client;
mod error;
mod storage;
mod traits;

pub use client::QueryClient;
pub use error::CacheError;
pub use storage::{CacheStorage, MemoryStorage, NoopStorage, SqliteStorage, StoredEntry};
pub use traits::{CacheResult, CacheSource, Invalidation, RetryPolicy};
