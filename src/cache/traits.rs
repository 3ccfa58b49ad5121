//! Core types for the caching system.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Result from a cache lookup, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Fresh data from a request this caller started.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Data from a request another caller already had in flight.
  pub fn from_shared(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Shared,
      cached_at: None,
    }
  }

  /// Data served from the cache without a request.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where a read result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// This caller issued the request
  Network,
  /// Joined a request already in flight for the same key
  Shared,
  /// Fresh cached value, no request issued
  Cache,
}

/// Emitted once per successful `invalidate` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalidation {
  pub key: String,
}

/// Retry behaviour for reads.
///
/// Defaults to no retries: a failed read surfaces immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Additional attempts after the first failure
  pub max_retries: u32,
  /// Fixed delay between attempts
  pub backoff: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_retries: 0,
      backoff: Duration::from_millis(500),
    }
  }
}
