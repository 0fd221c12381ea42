//! Ephemeral TTL cache tier.
//!
//! This module provides an entity-agnostic cache that:
//! - Stores serialized payloads with a type tag and an absolute expiry
//! - Treats expired rows as absent and purges them on the next read
//! - Uses non-positive TTL writes as tombstones to force invalidation
//! - Can be disabled entirely with [`NoopCacheBackend`]

mod adapter;
mod backend;
pub(crate) mod clock;
mod key;
mod store;

pub use adapter::{JsonAdapter, PayloadAdapter};
pub use backend::{CacheBackend, CacheRow, NoopCacheBackend, SqliteCacheBackend};
pub use clock::{Clock, SystemClock};
pub use key::{CacheKey, EntityKey};
pub use store::CacheStore;
