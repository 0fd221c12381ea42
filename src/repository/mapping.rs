//! Mapping set between the remote, local and domain representations.

use url::form_urlencoded;

use crate::cache::PayloadAdapter;
use crate::error::AppResult;

/// Everything a repository needs to know about one entity type.
///
/// The core never assumes a wire format: encoding request bodies and
/// decoding response bodies is the mapping's job.
pub trait EntityMapping: Send + Sync + 'static {
  /// Type handed to callers
  type Domain: Clone + Send + Sync + 'static;
  /// Representation received from the transport
  type Remote;
  /// Representation kept in the persistent store
  type Local: Send + 'static;

  /// Stable name, used for cache keys and refresh events.
  fn entity_type(&self) -> &str;

  /// Path of the collection, e.g. `/notes`.
  fn collection_path(&self) -> String;

  /// Path of one entity.
  fn item_path(&self, id: &str) -> String {
    format!(
      "{}/{}",
      self.collection_path().trim_end_matches('/'),
      encode_segment(id)
    )
  }

  fn id_of(&self, item: &Self::Domain) -> String;

  fn encode_remote(&self, item: &Self::Domain) -> AppResult<Vec<u8>>;

  fn decode_remote(&self, body: &[u8]) -> AppResult<Self::Remote>;

  fn remote_to_domain(&self, remote: Self::Remote) -> Self::Domain;

  fn local_to_domain(&self, local: Self::Local) -> Self::Domain;

  fn domain_to_local(&self, item: &Self::Domain) -> Self::Local;

  /// Adapter used to store domain values in the cache tier.
  fn cache_adapter(&self) -> &dyn PayloadAdapter<Self::Domain>;
}

/// Percent-encode one path segment.
pub fn encode_segment(segment: &str) -> String {
  // form encoding writes spaces as '+'; a literal '+' is already %2B
  form_urlencoded::byte_serialize(segment.as_bytes())
    .collect::<String>()
    .replace('+', "%20")
}
