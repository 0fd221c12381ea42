//! Cache row storage backends.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{AppError, AppResult, ErrorKind};

/// Persisted shape of one cache entry. Stable across versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRow {
  pub cache_key: String,
  pub payload: Vec<u8>,
  pub type_tag: String,
  pub expires_at_ms: i64,
}

impl CacheRow {
  pub fn is_expired(&self, now_ms: i64) -> bool {
    self.expires_at_ms <= now_ms
  }
}

/// Row-level storage for the cache table.
pub trait CacheBackend: Send + Sync {
  fn get_row(&self, cache_key: &str) -> AppResult<Option<CacheRow>>;

  /// Insert or replace the row with the same key.
  fn upsert_row(&self, row: &CacheRow) -> AppResult<()>;

  /// Returns whether a row was removed.
  fn delete_row(&self, cache_key: &str) -> AppResult<bool>;

  /// Remove the row only if it is still expired at `now_ms`.
  fn delete_row_if_expired(&self, cache_key: &str, now_ms: i64) -> AppResult<bool>;

  /// Remove every expired row, returning how many went.
  fn delete_expired(&self, now_ms: i64) -> AppResult<usize>;

  fn clear(&self) -> AppResult<usize>;
}

/// Backend used when caching is disabled - every read misses.
pub struct NoopCacheBackend;

impl CacheBackend for NoopCacheBackend {
  fn get_row(&self, _cache_key: &str) -> AppResult<Option<CacheRow>> {
    Ok(None) // Always miss
  }

  fn upsert_row(&self, _row: &CacheRow) -> AppResult<()> {
    Ok(()) // Discard
  }

  fn delete_row(&self, _cache_key: &str) -> AppResult<bool> {
    Ok(false)
  }

  fn delete_row_if_expired(&self, _cache_key: &str, _now_ms: i64) -> AppResult<bool> {
    Ok(false)
  }

  fn delete_expired(&self, _now_ms: i64) -> AppResult<usize> {
    Ok(0)
  }

  fn clear(&self) -> AppResult<usize> {
    Ok(0)
  }
}

/// Schema for the cache table.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_key TEXT PRIMARY KEY,
    payload BLOB NOT NULL,
    type_tag TEXT NOT NULL,
    expires_at_ms INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_expiry
    ON cache_entries(expires_at_ms);
"#;

/// SQLite-based cache table.
pub struct SqliteCacheBackend {
  conn: Mutex<Connection>,
}

impl SqliteCacheBackend {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> AppResult<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| AppError::database("failed to create cache directory", e))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      AppError::database(&format!("failed to open cache database at {}", path.display()), e)
    })?;
    Self::with_connection(conn)
  }

  /// Open an in-memory cache, lost when dropped.
  pub fn open_in_memory() -> AppResult<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| AppError::database("failed to open in-memory cache", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> AppResult<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| AppError::database("failed to run cache migrations", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn conn(&self) -> AppResult<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| AppError::new(ErrorKind::Database, format!("cache lock poisoned: {}", e)))
  }
}

impl CacheBackend for SqliteCacheBackend {
  fn get_row(&self, cache_key: &str) -> AppResult<Option<CacheRow>> {
    let conn = self.conn()?;
    conn
      .query_row(
        "SELECT cache_key, payload, type_tag, expires_at_ms FROM cache_entries
         WHERE cache_key = ?",
        params![cache_key],
        |row| {
          Ok(CacheRow {
            cache_key: row.get(0)?,
            payload: row.get(1)?,
            type_tag: row.get(2)?,
            expires_at_ms: row.get(3)?,
          })
        },
      )
      .optional()
      .map_err(|e| AppError::database("failed to read cache entry", e))
  }

  fn upsert_row(&self, row: &CacheRow) -> AppResult<()> {
    let conn = self.conn()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries (cache_key, payload, type_tag, expires_at_ms)
         VALUES (?, ?, ?, ?)",
        params![row.cache_key, row.payload, row.type_tag, row.expires_at_ms],
      )
      .map_err(|e| AppError::database("failed to store cache entry", e))?;
    Ok(())
  }

  fn delete_row(&self, cache_key: &str) -> AppResult<bool> {
    let conn = self.conn()?;
    let removed = conn
      .execute(
        "DELETE FROM cache_entries WHERE cache_key = ?",
        params![cache_key],
      )
      .map_err(|e| AppError::database("failed to delete cache entry", e))?;
    Ok(removed > 0)
  }

  fn delete_row_if_expired(&self, cache_key: &str, now_ms: i64) -> AppResult<bool> {
    let conn = self.conn()?;
    let removed = conn
      .execute(
        "DELETE FROM cache_entries WHERE cache_key = ? AND expires_at_ms <= ?",
        params![cache_key, now_ms],
      )
      .map_err(|e| AppError::database("failed to purge cache entry", e))?;
    Ok(removed > 0)
  }

  fn delete_expired(&self, now_ms: i64) -> AppResult<usize> {
    let conn = self.conn()?;
    conn
      .execute(
        "DELETE FROM cache_entries WHERE expires_at_ms <= ?",
        params![now_ms],
      )
      .map_err(|e| AppError::database("failed to purge expired cache entries", e))
  }

  fn clear(&self) -> AppResult<usize> {
    let conn = self.conn()?;
    conn
      .execute("DELETE FROM cache_entries", [])
      .map_err(|e| AppError::database("failed to clear cache", e))
  }
}
