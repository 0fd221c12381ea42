//! SQLite implementation of [`PersistentStore`].

use std::marker::PhantomData;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use super::notify::{ChangeNotifier, Subscription};
use super::{PersistentStore, Record};
use crate::error::{AppError, AppResult, ErrorKind};

/// Stores records of one type as JSON in a table of their own.
pub struct SqliteRecordStore<R> {
  conn: Mutex<Connection>,
  table: String,
  changes: ChangeNotifier<Option<R>>,
  _marker: PhantomData<fn() -> R>,
}

impl<R: Record> SqliteRecordStore<R> {
  /// Open (or create) the database at `path` and ensure `table` exists.
  pub fn open(path: &Path, table: &str) -> AppResult<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| AppError::database("failed to create store directory", e))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      AppError::database(&format!("failed to open store database at {}", path.display()), e)
    })?;
    Self::with_connection(conn, table)
  }

  pub fn open_in_memory(table: &str) -> AppResult<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| AppError::database("failed to open in-memory store", e))?;
    Self::with_connection(conn, table)
  }

  fn with_connection(conn: Connection, table: &str) -> AppResult<Self> {
    let table = table_name(table)?;
    conn
      .execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
             id TEXT PRIMARY KEY,
             data BLOB NOT NULL,
             stored_at TEXT NOT NULL
         );"
      ))
      .map_err(|e| AppError::database("failed to run store migrations", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
      table,
      changes: ChangeNotifier::new(),
      _marker: PhantomData,
    })
  }

  fn conn(&self) -> AppResult<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| AppError::new(ErrorKind::Database, format!("store lock poisoned: {}", e)))
  }

  /// Number of stored records.
  pub fn count(&self) -> AppResult<usize> {
    let conn = self.conn()?;
    conn
      .query_row(&format!("SELECT COUNT(*) FROM {}", self.table), [], |row| {
        row.get::<_, i64>(0)
      })
      .map(|n| n.max(0) as usize)
      .map_err(|e| AppError::database("failed to count records", e))
  }
}

impl<R: Record> SqliteRecordStore<R> {
  fn read(&self, conn: &Connection, id: &str) -> AppResult<Option<R>> {
    let data: Option<Vec<u8>> = conn
      .query_row(
        &format!("SELECT data FROM {} WHERE id = ?", self.table),
        params![id],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| AppError::database("failed to read record", e))?;

    data
      .map(|bytes| {
        serde_json::from_slice(&bytes)
          .map_err(|e| AppError::database(&format!("failed to decode record {}", id), e))
      })
      .transpose()
  }
}

impl<R: Record> PersistentStore<R> for SqliteRecordStore<R> {
  fn get(&self, id: &str) -> AppResult<Option<R>> {
    let conn = self.conn()?;
    self.read(&conn, id)
  }

  fn put(&self, record: &R) -> AppResult<()> {
    let data =
      serde_json::to_vec(record).map_err(|e| AppError::database("failed to encode record", e))?;

    // Notify under the connection lock so observers see writes in commit order.
    let conn = self.conn()?;
    conn
      .execute(
        &format!(
          "INSERT OR REPLACE INTO {} (id, data, stored_at) VALUES (?, ?, ?)",
          self.table
        ),
        params![record.record_id(), data, Utc::now().to_rfc3339()],
      )
      .map_err(|e| AppError::database("failed to store record", e))?;
    self
      .changes
      .notify(record.record_id(), Some(record.clone()));
    drop(conn);

    debug!(table = %self.table, id = record.record_id(), "stored record");
    Ok(())
  }

  fn delete(&self, id: &str) -> AppResult<bool> {
    let conn = self.conn()?;
    let removed = conn
      .execute(&format!("DELETE FROM {} WHERE id = ?", self.table), params![id])
      .map_err(|e| AppError::database("failed to delete record", e))?;
    if removed > 0 {
      self.changes.notify(id, None);
    }
    drop(conn);

    if removed > 0 {
      debug!(table = %self.table, id, "deleted record");
    }
    Ok(removed > 0)
  }

  /// Blocks on the initial read. The row is read and the listener
  /// registered under the connection lock, so no write can land between
  /// the two.
  fn observe(&self, id: &str) -> Subscription<Option<R>> {
    let conn = match self.conn() {
      Ok(conn) => conn,
      Err(e) => {
        warn!(error = %e, id, "failed to read initial value for observer");
        return self.changes.subscribe(id);
      }
    };
    let current = match self.read(&conn, id) {
      Ok(current) => Some(current),
      Err(e) => {
        warn!(error = %e, id, "failed to read initial value for observer");
        None
      }
    };
    self.changes.subscribe_with(id, current)
  }
}

/// Table names are interpolated into SQL, so only identifiers are allowed.
fn table_name(name: &str) -> AppResult<String> {
  let valid = !name.is_empty()
    && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    && !name.starts_with(|c: char| c.is_ascii_digit());
  if valid {
    Ok(format!("records_{}", name))
  } else {
    Err(AppError::new(
      ErrorKind::Validation,
      format!("invalid entity table name: {:?}", name),
    ))
  }
}
