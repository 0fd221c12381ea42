//! Per-type payload adapters.
//!
//! Each cached type gets an explicit adapter at construction time; the cache
//! never inspects types at runtime. The adapter's tag is stored next to the
//! payload so a row written for one type is never decoded as another.

use std::marker::PhantomData;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{AppError, AppResult};

/// Encodes and decodes one value type for the cache table.
pub trait PayloadAdapter<V>: Send + Sync {
  fn type_tag(&self) -> &str;

  fn encode(&self, value: &V) -> AppResult<Vec<u8>>;

  fn decode(&self, payload: &[u8]) -> AppResult<V>;
}

/// JSON adapter for any serde type.
pub struct JsonAdapter<V> {
  tag: &'static str,
  _marker: PhantomData<fn() -> V>,
}

impl<V> JsonAdapter<V> {
  pub const fn new(tag: &'static str) -> Self {
    Self {
      tag,
      _marker: PhantomData,
    }
  }
}

impl<V> PayloadAdapter<V> for JsonAdapter<V>
where
  V: Serialize + DeserializeOwned,
{
  fn type_tag(&self) -> &str {
    self.tag
  }

  fn encode(&self, value: &V) -> AppResult<Vec<u8>> {
    serde_json::to_vec(value)
      .map_err(|e| AppError::database(&format!("failed to encode {} payload", self.tag), e))
  }

  fn decode(&self, payload: &[u8]) -> AppResult<V> {
    serde_json::from_slice(payload)
      .map_err(|e| AppError::database(&format!("failed to decode {} payload", self.tag), e))
  }
}
