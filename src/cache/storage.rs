//! Cache storage trait and its memory, SQLite and no-op implementations.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use super::error::CacheError;

/// A cached read result.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
  pub value: Value,
  pub cached_at: DateTime<Utc>,
  /// Set by an invalidation; the next read refetches
  pub invalidated: bool,
}

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync {
  /// Get the entry stored under `key`, fresh or not.
  fn get(&self, key: &str) -> Result<Option<StoredEntry>, CacheError>;

  /// Store a value under `key`, replacing any previous entry.
  fn put(&self, key: &str, value: &Value) -> Result<(), CacheError>;

  /// Mark the entry stale. Returns whether an entry existed.
  fn invalidate(&self, key: &str) -> Result<bool, CacheError>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn get(&self, _key: &str) -> Result<Option<StoredEntry>, CacheError> {
    Ok(None) // Always miss
  }

  fn put(&self, _key: &str, _value: &Value) -> Result<(), CacheError> {
    Ok(()) // Discard
  }

  fn invalidate(&self, _key: &str) -> Result<bool, CacheError> {
    Ok(false)
  }
}

/// In-process storage; entries live as long as the process.
#[derive(Default)]
pub struct MemoryStorage {
  entries: Mutex<HashMap<String, StoredEntry>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CacheStorage for MemoryStorage {
  fn get(&self, key: &str) -> Result<Option<StoredEntry>, CacheError> {
    let entries = self.entries.lock().map_err(|_| CacheError::LockPoisoned)?;
    Ok(entries.get(key).cloned())
  }

  fn put(&self, key: &str, value: &Value) -> Result<(), CacheError> {
    let mut entries = self.entries.lock().map_err(|_| CacheError::LockPoisoned)?;
    entries.insert(
      key.to_string(),
      StoredEntry {
        value: value.clone(),
        cached_at: Utc::now(),
        invalidated: false,
      },
    );
    Ok(())
  }

  fn invalidate(&self, key: &str) -> Result<bool, CacheError> {
    let mut entries = self.entries.lock().map_err(|_| CacheError::LockPoisoned)?;
    Ok(match entries.get_mut(key) {
      Some(entry) => {
        entry.invalidated = true;
        true
      }
      None => false,
    })
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS query_cache (
    key_hash TEXT PRIMARY KEY,
    query_key TEXT NOT NULL,
    data BLOB NOT NULL,
    invalidated INTEGER NOT NULL DEFAULT 0,
    cached_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self, CacheError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    Self::with_connection(Connection::open(path)?)
  }

  /// Open a private in-memory database.
  pub fn in_memory() -> Result<Self, CacheError> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self, CacheError> {
    conn.execute_batch(CACHE_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }
}

impl CacheStorage for SqliteStorage {
  fn get(&self, key: &str) -> Result<Option<StoredEntry>, CacheError> {
    let conn = self.conn.lock().map_err(|_| CacheError::LockPoisoned)?;

    let row: Option<(Vec<u8>, bool, String)> = conn
      .query_row(
        "SELECT data, invalidated, cached_at FROM query_cache WHERE key_hash = ?",
        params![key_hash(key)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()?;

    match row {
      Some((data, invalidated, cached_at)) => Ok(Some(StoredEntry {
        value: serde_json::from_slice(&data)?,
        cached_at: parse_datetime(&cached_at)?,
        invalidated,
      })),
      None => Ok(None),
    }
  }

  fn put(&self, key: &str, value: &Value) -> Result<(), CacheError> {
    let conn = self.conn.lock().map_err(|_| CacheError::LockPoisoned)?;
    let data = serde_json::to_vec(value)?;

    conn.execute(
      "INSERT OR REPLACE INTO query_cache (key_hash, query_key, data, invalidated, cached_at)
       VALUES (?, ?, ?, 0, datetime('now'))",
      params![key_hash(key), key, data],
    )?;

    Ok(())
  }

  fn invalidate(&self, key: &str) -> Result<bool, CacheError> {
    let conn = self.conn.lock().map_err(|_| CacheError::LockPoisoned)?;
    let updated = conn.execute(
      "UPDATE query_cache SET invalidated = 1 WHERE key_hash = ?",
      params![key_hash(key)],
    )?;
    Ok(updated > 0)
  }
}

/// SHA256 of the key for stable, fixed-length row ids.
fn key_hash(key: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(key.as_bytes());
  hex::encode(hasher.finalize())
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, CacheError> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|_| CacheError::Timestamp(s.to_string()))
}
