//! TTL key/value cache over a [`CacheBackend`].

use std::sync::Arc;

use tracing::{debug, warn};

use super::adapter::PayloadAdapter;
use super::backend::{CacheBackend, CacheRow};
use super::clock::{Clock, SystemClock};
use super::key::CacheKey;
use crate::error::AppResult;

/// Time-to-live cache shared by every repository.
///
/// Reads are fail-silent: storage errors and undecodable rows are logged and
/// reported as a miss. Writes are fail-loud and hand the error back to the
/// caller. Expired rows are purged lazily by the read that finds them.
#[derive(Clone)]
pub struct CacheStore {
  backend: Arc<dyn CacheBackend>,
  clock: Arc<dyn Clock>,
}

impl CacheStore {
  pub fn new(backend: impl CacheBackend + 'static) -> Self {
    Self::with_clock(Arc::new(backend), Arc::new(SystemClock))
  }

  pub fn with_clock(backend: Arc<dyn CacheBackend>, clock: Arc<dyn Clock>) -> Self {
    Self { backend, clock }
  }

  /// Look up a live value. `None` on miss, expiry, tag mismatch or storage error.
  pub fn get<K, V, A>(&self, key: &K, adapter: &A) -> Option<V>
  where
    K: CacheKey + ?Sized,
    A: PayloadAdapter<V> + ?Sized,
  {
    let cache_key = key.cache_key();
    let row = match self.backend.get_row(&cache_key) {
      Ok(Some(row)) => row,
      Ok(None) => return None,
      Err(e) => {
        warn!(error = %e, "cache read failed, treating as miss");
        return None;
      }
    };

    let now = self.clock.now_ms();
    if row.is_expired(now) {
      debug!(key = %cache_key, "cache entry expired");
      if let Err(e) = self.backend.delete_row_if_expired(&cache_key, now) {
        warn!(error = %e, "failed to purge expired cache entry");
      }
      return None;
    }

    if row.type_tag != adapter.type_tag() {
      warn!(
        key = %cache_key,
        stored = %row.type_tag,
        expected = adapter.type_tag(),
        "cache entry has a different type tag"
      );
      return None;
    }

    match adapter.decode(&row.payload) {
      Ok(value) => Some(value),
      Err(e) => {
        warn!(error = %e, key = %cache_key, "dropping undecodable cache entry");
        if let Err(e) = self.backend.delete_row(&cache_key) {
          warn!(error = %e, "failed to drop undecodable cache entry");
        }
        None
      }
    }
  }

  /// Store `value` for `ttl_millis`. A non-positive TTL is a tombstone: any
  /// existing entry is removed and nothing is stored.
  pub fn put<K, V, A>(&self, key: &K, value: &V, ttl_millis: i64, adapter: &A) -> AppResult<()>
  where
    K: CacheKey + ?Sized,
    A: PayloadAdapter<V> + ?Sized,
  {
    let cache_key = key.cache_key();
    if ttl_millis <= 0 {
      self.backend.delete_row(&cache_key)?;
      return Ok(());
    }

    // Encode before touching the table so a failure leaves the old row intact.
    let payload = adapter.encode(value)?;
    let row = CacheRow {
      cache_key,
      payload,
      type_tag: adapter.type_tag().to_string(),
      expires_at_ms: self.clock.now_ms().saturating_add(ttl_millis),
    };
    self.backend.upsert_row(&row)
  }

  /// Tombstone the entry for `key`.
  pub fn invalidate<K>(&self, key: &K) -> AppResult<()>
  where
    K: CacheKey + ?Sized,
  {
    self.backend.delete_row(&key.cache_key())?;
    Ok(())
  }

  /// Sweep every expired row; returns the number removed.
  pub fn purge_expired(&self) -> AppResult<usize> {
    let removed = self.backend.delete_expired(self.clock.now_ms())?;
    debug!(removed, "purged expired cache entries");
    Ok(removed)
  }

  pub fn clear(&self) -> AppResult<usize> {
    self.backend.clear()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::adapter::JsonAdapter;
  use crate::cache::backend::SqliteCacheBackend;
  use crate::cache::clock::ManualClock;
  use crate::error::{AppError, ErrorKind};

  const NOTES: JsonAdapter<Vec<String>> = JsonAdapter::new("notes");
  const COUNT: JsonAdapter<u32> = JsonAdapter::new("count");

  fn store() -> (CacheStore, Arc<ManualClock>, Arc<SqliteCacheBackend>) {
    let clock = Arc::new(ManualClock::at(1_000));
    let backend = Arc::new(SqliteCacheBackend::open_in_memory().unwrap());
    let store = CacheStore::with_clock(backend.clone(), clock.clone());
    (store, clock, backend)
  }

  /// Backend whose every call fails.
  struct BrokenBackend;

  impl CacheBackend for BrokenBackend {
    fn get_row(&self, _: &str) -> AppResult<Option<CacheRow>> {
      Err(AppError::new(ErrorKind::Database, "disk gone"))
    }
    fn upsert_row(&self, _: &CacheRow) -> AppResult<()> {
      Err(AppError::new(ErrorKind::Database, "disk gone"))
    }
    fn delete_row(&self, _: &str) -> AppResult<bool> {
      Err(AppError::new(ErrorKind::Database, "disk gone"))
    }
    fn delete_row_if_expired(&self, _: &str, _: i64) -> AppResult<bool> {
      Err(AppError::new(ErrorKind::Database, "disk gone"))
    }
    fn delete_expired(&self, _: i64) -> AppResult<usize> {
      Err(AppError::new(ErrorKind::Database, "disk gone"))
    }
    fn clear(&self) -> AppResult<usize> {
      Err(AppError::new(ErrorKind::Database, "disk gone"))
    }
  }

  #[test]
  fn test_ttl_round_trip() {
    let (store, clock, _) = store();
    let value = vec!["a".to_string(), "b".to_string()];

    store.put("k", &value, 500, &NOTES).unwrap();
    assert_eq!(store.get("k", &NOTES), Some(value));

    clock.advance(499);
    assert!(store.get("k", &NOTES).is_some());

    clock.advance(1);
    assert_eq!(store.get("k", &NOTES), None);
  }

  #[test]
  fn test_expired_row_is_purged_on_read() {
    let (store, clock, backend) = store();
    store.put("k", &7, 10, &COUNT).unwrap();
    clock.advance(10);

    assert_eq!(store.get("k", &COUNT), None);
    assert!(backend.get_row("k").unwrap().is_none());
  }

  #[test]
  fn test_tombstone_put_invalidates() {
    let (store, _, backend) = store();
    store.put("k", &7, 10_000, &COUNT).unwrap();

    store.put("k", &8, 0, &COUNT).unwrap();
    assert_eq!(store.get("k", &COUNT), None);
    assert!(backend.get_row("k").unwrap().is_none());

    store.put("k", &9, -5, &COUNT).unwrap();
    assert_eq!(store.get("k", &COUNT), None);
  }

  #[test]
  fn test_invalidate_on_missing_key_is_ok() {
    let (store, _, _) = store();
    store.invalidate("missing").unwrap();
    assert_eq!(store.get("missing", &COUNT), None);
  }

  #[test]
  fn test_type_tag_mismatch_is_a_miss() {
    let (store, _, backend) = store();
    store.put("k", &7, 10_000, &COUNT).unwrap();

    assert_eq!(store.get("k", &NOTES), None);
    // The row belongs to another type and stays put.
    assert!(backend.get_row("k").unwrap().is_some());
    assert_eq!(store.get("k", &COUNT), Some(7));
  }

  #[test]
  fn test_undecodable_row_is_dropped() {
    let (store, _, backend) = store();
    backend
      .upsert_row(&CacheRow {
        cache_key: "k".to_string(),
        payload: b"not json".to_vec(),
        type_tag: "count".to_string(),
        expires_at_ms: i64::MAX,
      })
      .unwrap();

    assert_eq!(store.get("k", &COUNT), None);
    assert!(backend.get_row("k").unwrap().is_none());
  }

  #[test]
  fn test_purge_expired_sweeps_everything_stale() {
    let (store, clock, _) = store();
    store.put("a", &1, 10, &COUNT).unwrap();
    store.put("b", &2, 20, &COUNT).unwrap();
    store.put("c", &3, 1_000, &COUNT).unwrap();
    clock.advance(50);

    assert_eq!(store.purge_expired().unwrap(), 2);
    assert_eq!(store.get("c", &COUNT), Some(3));
  }

  #[test]
  fn test_reads_fail_silent_writes_fail_loud() {
    let store = CacheStore::with_clock(Arc::new(BrokenBackend), Arc::new(ManualClock::at(0)));
    assert_eq!(store.get("k", &COUNT), None);

    let err = store.put("k", &1, 100, &COUNT).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Database);
    assert!(store.invalidate("k").is_err());
  }
}
