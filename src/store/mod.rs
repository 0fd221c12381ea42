//! Local persistent store tier.
//!
//! One table per entity type. The store only stores and returns copies of
//! records; it never mutates them on its own.

mod notify;
mod sqlite;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::AppResult;

pub use notify::{ChangeNotifier, Subscription};
pub use sqlite::SqliteRecordStore;

/// A local record with a stable identifier.
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  fn record_id(&self) -> &str;
}

/// Narrow CRUD contract of the local store.
///
/// Calls may block on disk; callers dispatch them to a worker pool.
pub trait PersistentStore<R>: Send + Sync {
  fn get(&self, id: &str) -> AppResult<Option<R>>;

  /// Insert or replace the record with the same id.
  fn put(&self, record: &R) -> AppResult<()>;

  /// Returns whether a record was removed.
  fn delete(&self, id: &str) -> AppResult<bool>;

  /// Current value of `id` followed by every later change (`None` once deleted).
  fn observe(&self, id: &str) -> Subscription<Option<R>>;
}
