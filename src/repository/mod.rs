//! Tiered repository over cache, local store and remote transport.
//!
//! Reads go cache -> local store -> transport and stop at the first tier
//! that has the value, copying it into the faster tiers on the way back.
//! Writes treat the transport as the source of truth and mirror its answer
//! locally. Failures while mirroring are logged and never change the
//! outcome of the operation that triggered them.

mod gate;
mod mapping;

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tracing::{debug, info, warn};

use crate::cache::{CacheStore, EntityKey};
use crate::error::{map_error, map_error_with_body, AppError, AppResult};
use crate::events::{RefreshCoordinator, RefreshEvent};
use crate::pool::WorkerPool;
use crate::store::{PersistentStore, Subscription};
use crate::transport::{Method, TransportClient, TransportResponse};

use gate::WriteGate;
pub use mapping::{encode_segment, EntityMapping};

/// TTL applied when promoting or mirroring into the cache.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Per-entity orchestrator of the three data tiers.
pub struct DataRepository<M: EntityMapping> {
  mapping: Arc<M>,
  cache: CacheStore,
  store: Arc<dyn PersistentStore<M::Local>>,
  transport: Arc<dyn TransportClient>,
  pool: WorkerPool,
  gate: WriteGate,
  ttl: Duration,
  coordinator: Option<RefreshCoordinator>,
}

impl<M: EntityMapping> DataRepository<M> {
  pub fn new(
    mapping: M,
    cache: CacheStore,
    store: Arc<dyn PersistentStore<M::Local>>,
    transport: Arc<dyn TransportClient>,
  ) -> Self {
    Self {
      mapping: Arc::new(mapping),
      cache,
      store,
      transport,
      pool: WorkerPool::default(),
      gate: WriteGate::new(),
      ttl: DEFAULT_TTL,
      coordinator: None,
    }
  }

  /// Share a worker pool with other repositories.
  pub fn with_pool(mut self, pool: WorkerPool) -> Self {
    self.pool = pool;
    self
  }

  /// Set the TTL used when values are copied into the cache.
  pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  /// Publish refresh events after successful writes.
  pub fn with_coordinator(mut self, coordinator: RefreshCoordinator) -> Self {
    self.coordinator = Some(coordinator);
    self
  }

  pub fn mapping(&self) -> &M {
    &self.mapping
  }

  fn key<'a>(&'a self, id: &'a str) -> EntityKey<'a> {
    EntityKey::new(self.mapping.entity_type(), id)
  }

  fn ttl_millis(&self) -> i64 {
    i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX)
  }

  /// Cache tier only. Never touches the store or the transport.
  pub fn cached(&self, id: &str) -> Option<M::Domain> {
    self.cache.get(&self.key(id), self.mapping.cache_adapter())
  }

  /// Tiered lookup of one entity.
  pub async fn get(&self, id: &str) -> AppResult<M::Domain> {
    if let Some(item) = self.cached(id) {
      debug!(entity = self.mapping.entity_type(), id, "cache hit");
      return Ok(item);
    }

    let seen = self.gate.generation(id);
    let storage_error = match self.load_local(id).await {
      Ok(Some(local)) => {
        debug!(entity = self.mapping.entity_type(), id, "local store hit");
        let item = self.mapping.local_to_domain(local);
        self.promote(id, &item, seen).await;
        return Ok(item);
      }
      Ok(None) => None,
      Err(e) => {
        warn!(error = %e, id, "local store read failed, falling back to network");
        Some(e)
      }
    };

    debug!(entity = self.mapping.entity_type(), id, "fetching from network");
    match self.fetch_remote(id).await {
      Ok(item) => {
        self.mirror(id, &item, seen).await;
        Ok(item)
      }
      // The store was the only other source of truth
      Err(e) => Err(storage_error.unwrap_or(e)),
    }
  }

  /// Fetch from the transport regardless of what the local tiers hold.
  pub async fn refresh(&self, id: &str) -> AppResult<M::Domain> {
    let seen = self.gate.generation(id);
    let item = self.fetch_remote(id).await?;
    self.mirror(id, &item, seen).await;
    Ok(item)
  }

  /// Create remotely, then store the server's representation locally.
  ///
  /// A caller-supplied id is locked before the request, like `update`.
  /// Server-assigned ids are only known, and locked, once the response
  /// arrives.
  pub async fn create(&self, item: &M::Domain) -> AppResult<M::Domain> {
    let requested = self.mapping.id_of(item);
    let early_guard = if requested.is_empty() {
      None
    } else {
      Some(self.gate.write(&requested).await)
    };

    let body = self.mapping.encode_remote(item)?;
    let response = self
      .send(Method::Post, &self.mapping.collection_path(), Some(body))
      .await?;
    let created = self.decode_item(response)?;

    let id = self.mapping.id_of(&created);
    let _guard = match early_guard {
      Some(guard) if id == requested => guard,
      early => {
        drop(early);
        self.gate.write(&id).await
      }
    };
    self.write_local(&id, &created).await;
    info!(entity = self.mapping.entity_type(), id = %id, "created");

    self.publish(RefreshEvent::Upserted {
      entity_type: self.mapping.entity_type().to_string(),
      id,
    });
    Ok(created)
  }

  /// Update remotely, then replace the local copies.
  pub async fn update(&self, item: &M::Domain) -> AppResult<M::Domain> {
    let id = self.mapping.id_of(item);
    let _guard = self.gate.write(&id).await;

    let body = self.mapping.encode_remote(item)?;
    let response = self
      .send(Method::Put, &self.mapping.item_path(&id), Some(body))
      .await?;
    let updated = self.decode_item(response)?;

    // Nothing may serve the old value while the store is being rewritten.
    if let Err(e) = self.cache.invalidate(&self.key(&id)) {
      warn!(error = %e, id = %id, "failed to invalidate cache before update");
    }
    self.write_local(&id, &updated).await;
    info!(entity = self.mapping.entity_type(), id = %id, "updated");

    self.publish(RefreshEvent::Upserted {
      entity_type: self.mapping.entity_type().to_string(),
      id,
    });
    Ok(updated)
  }

  /// Delete remotely and locally. Already-absent remote entities count as
  /// deleted.
  pub async fn delete(&self, id: &str) -> AppResult<()> {
    let _guard = self.gate.write(id).await;

    match self
      .send(Method::Delete, &self.mapping.item_path(id), None)
      .await
    {
      Ok(_) => {}
      Err(e) if e.is_not_found() => {
        debug!(entity = self.mapping.entity_type(), id, "already absent remotely");
      }
      Err(e) => return Err(e),
    }

    let store = Arc::clone(&self.store);
    let owned_id = id.to_string();
    match self
      .pool
      .run_blocking(move || store.delete(&owned_id))
      .await
      .and_then(|r| r)
    {
      Ok(_) => {}
      Err(e) => warn!(error = %e, id, "failed to remove local record"),
    }
    if let Err(e) = self.cache.invalidate(&self.key(id)) {
      warn!(error = %e, id, "failed to invalidate cache entry");
    }
    info!(entity = self.mapping.entity_type(), id, "deleted");

    self.publish(RefreshEvent::Removed {
      entity_type: self.mapping.entity_type().to_string(),
      id: id.to_string(),
    });
    Ok(())
  }

  /// Follow the local store's value for `id`. Dropping the observation
  /// releases the store listener.
  pub fn observe(&self, id: &str) -> Observation<M> {
    Observation {
      inner: self.store.observe(id),
      mapping: Arc::clone(&self.mapping),
    }
  }

  async fn load_local(&self, id: &str) -> AppResult<Option<M::Local>> {
    let store = Arc::clone(&self.store);
    let id = id.to_string();
    self
      .pool
      .run_blocking(move || store.get(&id))
      .await
      .and_then(|r| r)
  }

  async fn fetch_remote(&self, id: &str) -> AppResult<M::Domain> {
    let response = self
      .send(Method::Get, &self.mapping.item_path(id), None)
      .await?;
    self.decode_item(response)
  }

  /// One transport round trip. Non-2xx statuses come back as errors.
  async fn send(
    &self,
    method: Method,
    path: &str,
    body: Option<Vec<u8>>,
  ) -> AppResult<TransportResponse> {
    let response = self
      .pool
      .run(self.transport.request(method, path, body))
      .await?
      .map_err(|e| map_error(None, Some(&e)))?;

    if response.is_success() {
      Ok(response)
    } else {
      Err(map_error_with_body(
        Some(response.status),
        None,
        response.error_body.as_deref(),
      ))
    }
  }

  fn decode_item(&self, response: TransportResponse) -> AppResult<M::Domain> {
    let body = response
      .body
      .filter(|b| !b.is_empty())
      .ok_or_else(|| AppError::unknown("empty response body").with_code(response.status))?;
    let remote = self.mapping.decode_remote(&body)?;
    Ok(self.mapping.remote_to_domain(remote))
  }

  /// Copy a store hit into the cache, unless a write raced the read.
  async fn promote(&self, id: &str, item: &M::Domain, seen: u64) {
    let Some(_guard) = self.gate.mirror(id, seen).await else {
      debug!(id, "skipping promotion, entity was written meanwhile");
      return;
    };
    if let Err(e) = self
      .cache
      .put(&self.key(id), item, self.ttl_millis(), self.mapping.cache_adapter())
    {
      warn!(error = %e, id, "failed to promote into cache");
    }
  }

  /// Copy a network read into both local tiers, unless a write raced it.
  async fn mirror(&self, id: &str, item: &M::Domain, seen: u64) {
    let Some(_guard) = self.gate.mirror(id, seen).await else {
      debug!(id, "skipping mirror, entity was written meanwhile");
      return;
    };
    self.write_local(id, item).await;
  }

  /// Best-effort store + cache write. Caller holds the id's gate.
  async fn write_local(&self, id: &str, item: &M::Domain) {
    let store = Arc::clone(&self.store);
    let local = self.mapping.domain_to_local(item);
    if let Err(e) = self
      .pool
      .run_blocking(move || store.put(&local))
      .await
      .and_then(|r| r)
    {
      warn!(error = %e, id, "failed to mirror into local store");
    }

    if let Err(e) = self
      .cache
      .put(&self.key(id), item, self.ttl_millis(), self.mapping.cache_adapter())
    {
      warn!(error = %e, id, "failed to mirror into cache");
    }
  }

  fn publish(&self, event: RefreshEvent) {
    if let Some(coordinator) = &self.coordinator {
      coordinator.publish(event);
    }
  }
}

/// Domain-typed view of a store subscription.
pub struct Observation<M: EntityMapping> {
  inner: Subscription<Option<M::Local>>,
  mapping: Arc<M>,
}

impl<M: EntityMapping> Observation<M> {
  /// Wait for the next value. `None` once the store is gone.
  pub async fn recv(&mut self) -> Option<Option<M::Domain>> {
    let next = self.inner.recv().await?;
    Some(next.map(|local| self.mapping.local_to_domain(local)))
  }

  /// Stop observing and release the store listener.
  pub fn unsubscribe(self) {
    self.inner.unsubscribe();
  }
}

impl<M: EntityMapping> Stream for Observation<M> {
  type Item = Option<M::Domain>;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    let this = self.get_mut();
    Pin::new(&mut this.inner)
      .poll_next(cx)
      .map(|next| next.map(|value| value.map(|local| this.mapping.local_to_domain(local))))
  }
}
