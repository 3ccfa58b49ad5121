use thiserror::Error;

/// Errors from a cache storage backend.
#[derive(Error, Debug)]
pub enum CacheError {
  #[error("SQLite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("Failed to (de)serialize cached value: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("Failed to create cache directory: {0}")]
  Io(#[from] std::io::Error),

  #[error("Failed to parse cached timestamp '{0}'")]
  Timestamp(String),

  #[error("Cache lock poisoned")]
  LockPoisoned,
}
