//! Cache key derivation.

use sha2::{Digest, Sha256};

/// Anything that names a cache row.
pub trait CacheKey {
  /// Stable row key. Must be identical across process restarts.
  fn cache_key(&self) -> String;
}

impl CacheKey for str {
  fn cache_key(&self) -> String {
    self.to_string()
  }
}

impl CacheKey for String {
  fn cache_key(&self) -> String {
    self.clone()
  }
}

/// Key of a single entity: its type plus its id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey<'a> {
  pub entity_type: &'a str,
  pub id: &'a str,
}

impl<'a> EntityKey<'a> {
  pub fn new(entity_type: &'a str, id: &'a str) -> Self {
    Self { entity_type, id }
  }
}

impl CacheKey for EntityKey<'_> {
  fn cache_key(&self) -> String {
    // SHA256 hash for stable, fixed-length keys. The type is length-prefixed
    // so that no (type, id) pair can collide with another.
    let mut hasher = Sha256::new();
    hasher.update((self.entity_type.len() as u64).to_le_bytes());
    hasher.update(self.entity_type.as_bytes());
    hasher.update(self.id.as_bytes());
    hex::encode(hasher.finalize())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_entity_key_is_stable_and_fixed_length() {
    let a = EntityKey::new("note", "42").cache_key();
    let b = EntityKey::new("note", "42").cache_key();
    assert_eq!(a, b);
    assert_eq!(a.len(), 64);
  }

  #[test]
  fn test_entity_key_separates_types() {
    assert_ne!(
      EntityKey::new("note", "42").cache_key(),
      EntityKey::new("user", "42").cache_key()
    );
    assert_ne!(
      EntityKey::new("a:b", "c").cache_key(),
      EntityKey::new("a", "b:c").cache_key()
    );
  }
}
