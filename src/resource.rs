//! Schema-less JSON entity for driving arbitrary REST collections.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cache::{JsonAdapter, PayloadAdapter};
use crate::error::{AppError, AppResult, ErrorKind};
use crate::paging::{PagePosition, PageStyle, PagedMapping, RemotePage};
use crate::repository::EntityMapping;
use crate::store::Record;

/// A remote JSON object and the id it was found under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
  pub id: String,
  pub body: Value,
}

impl Resource {
  /// Build from a JSON object, reading the id from `id_field`.
  pub fn from_json(body: Value, id_field: &str) -> Self {
    let id = match body.get(id_field) {
      Some(Value::String(s)) => s.clone(),
      Some(Value::Number(n)) => n.to_string(),
      _ => String::new(),
    };
    Self { id, body }
  }
}

/// Local row for a [`Resource`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
  pub id: String,
  pub body: Value,
}

impl Record for ResourceRecord {
  fn record_id(&self) -> &str {
    &self.id
  }
}

/// Mapping for one collection of JSON resources, e.g. `/projects`.
pub struct ResourceMapping {
  collection: String,
  entity_type: String,
  id_field: String,
  style: PageStyle,
  adapter: JsonAdapter<Resource>,
}

impl ResourceMapping {
  pub fn new(collection: &str, style: PageStyle) -> Self {
    let trimmed = collection.trim_matches('/');
    Self {
      collection: format!("/{}", trimmed),
      entity_type: trimmed.to_string(),
      id_field: "id".to_string(),
      style,
      adapter: JsonAdapter::new("resource"),
    }
  }

  pub fn with_id_field(mut self, id_field: &str) -> Self {
    self.id_field = id_field.to_string();
    self
  }

  /// SQLite table suffix for this collection.
  pub fn table_name(&self) -> String {
    let name: String = self
      .entity_type
      .chars()
      .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
      .collect();
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
      format!("r_{}", name)
    } else {
      name
    }
  }
}

fn invalid_body(what: &str, e: impl std::fmt::Display) -> AppError {
  AppError::new(ErrorKind::Unknown, format!("invalid {}: {}", what, e))
}

impl EntityMapping for ResourceMapping {
  type Domain = Resource;
  type Remote = Value;
  type Local = ResourceRecord;

  fn entity_type(&self) -> &str {
    &self.entity_type
  }

  fn collection_path(&self) -> String {
    self.collection.clone()
  }

  fn id_of(&self, item: &Resource) -> String {
    item.id.clone()
  }

  fn encode_remote(&self, item: &Resource) -> AppResult<Vec<u8>> {
    let mut body = item.body.clone();
    if let Value::Object(map) = &mut body {
      if !item.id.is_empty() {
        map.insert(self.id_field.clone(), Value::String(item.id.clone()));
      }
    }
    serde_json::to_vec(&body).map_err(|e| invalid_body("request body", e))
  }

  fn decode_remote(&self, body: &[u8]) -> AppResult<Value> {
    serde_json::from_slice(body).map_err(|e| invalid_body("response body", e))
  }

  fn remote_to_domain(&self, remote: Value) -> Resource {
    Resource::from_json(remote, &self.id_field)
  }

  fn local_to_domain(&self, local: ResourceRecord) -> Resource {
    Resource {
      id: local.id,
      body: local.body,
    }
  }

  fn domain_to_local(&self, item: &Resource) -> ResourceRecord {
    ResourceRecord {
      id: item.id.clone(),
      body: item.body.clone(),
    }
  }

  fn cache_adapter(&self) -> &dyn PayloadAdapter<Resource> {
    &self.adapter
  }
}

impl PagedMapping for ResourceMapping {
  fn page_style(&self) -> PageStyle {
    self.style
  }

  /// Accepts a bare array, or an object with the items under `items` or
  /// `data`. Position comes from `page`/`total_pages` when both are present,
  /// otherwise from `prev`/`next` tokens. A bare array is a single page.
  fn decode_page(&self, body: &[u8]) -> AppResult<RemotePage<Value>> {
    let value: Value = serde_json::from_slice(body).map_err(|e| invalid_body("page body", e))?;

    let (items, meta) = match value {
      Value::Array(items) => (items, Map::new()),
      Value::Object(mut map) => {
        let items = match map.remove("items").or_else(|| map.remove("data")) {
          Some(Value::Array(items)) => items,
          Some(other) => return Err(invalid_body("page body", format!("items is {}", other))),
          None => Vec::new(),
        };
        (items, map)
      }
      other => return Err(invalid_body("page body", format!("unexpected {}", other))),
    };

    let number = |key: &str| -> AppResult<Option<u32>> {
      meta
        .get(key)
        .and_then(Value::as_u64)
        .map(|n| {
          u32::try_from(n)
            .map_err(|_| invalid_body("page body", format!("{} {} out of range", key, n)))
        })
        .transpose()
    };
    let token = |key: &str| meta.get(key).and_then(Value::as_str).map(str::to_string);

    let position = match (number("page")?, number("total_pages")?) {
      (Some(page), Some(total_pages)) => PagePosition::Indexed { page, total_pages },
      _ => PagePosition::Token {
        prev: token("prev"),
        next: token("next"),
      },
    };

    Ok(RemotePage { items, position })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_paths_and_table() {
    let mapping = ResourceMapping::new("/v1/projects/", PageStyle::Index);
    assert_eq!(mapping.collection_path(), "/v1/projects");
    assert_eq!(mapping.item_path("a b"), "/v1/projects/a%20b");
    assert_eq!(mapping.table_name(), "v1_projects");
    assert_eq!(ResourceMapping::new("2024", PageStyle::Index).table_name(), "r_2024");
  }

  #[test]
  fn test_numeric_and_custom_ids() {
    let mapping = ResourceMapping::new("users", PageStyle::Index);
    let r = mapping.remote_to_domain(json!({"id": 7, "name": "x"}));
    assert_eq!(r.id, "7");

    let mapping = ResourceMapping::new("users", PageStyle::Index).with_id_field("uuid");
    let r = mapping.remote_to_domain(json!({"uuid": "u-1"}));
    assert_eq!(r.id, "u-1");
  }

  #[test]
  fn test_encode_carries_id() {
    let mapping = ResourceMapping::new("users", PageStyle::Index);
    let body = mapping
      .encode_remote(&Resource {
        id: "u1".to_string(),
        body: json!({"name": "x"}),
      })
      .unwrap();
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value, json!({"id": "u1", "name": "x"}));

    let body = mapping
      .encode_remote(&Resource {
        id: String::new(),
        body: json!({"name": "new"}),
      })
      .unwrap();
    let value: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value, json!({"name": "new"}));
  }

  #[test]
  fn test_decode_page_shapes() {
    let mapping = ResourceMapping::new("users", PageStyle::Index);

    let page = mapping
      .decode_page(br#"{"data":[{"id":1}],"page":2,"total_pages":3}"#)
      .unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(
      page.position,
      PagePosition::Indexed {
        page: 2,
        total_pages: 3
      }
    );

    let page = mapping
      .decode_page(br#"{"items":[{"id":1},{"id":2}],"next":"abc"}"#)
      .unwrap();
    assert_eq!(page.items.len(), 2);
    assert_eq!(
      page.position,
      PagePosition::Token {
        prev: None,
        next: Some("abc".to_string())
      }
    );

    let page = mapping.decode_page(br#"[{"id":1}]"#).unwrap();
    assert_eq!(
      page.position,
      PagePosition::Token {
        prev: None,
        next: None
      }
    );

    let err = mapping.decode_page(b"42").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Unknown);
  }

  #[test]
  fn test_page_numbers_beyond_u32_are_rejected() {
    let mapping = ResourceMapping::new("users", PageStyle::Index);
    let err = mapping
      .decode_page(br#"{"items":[{"id":1}],"page":4294967297,"total_pages":4294967298}"#)
      .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Unknown);
    assert!(err.message.contains("out of range"));

    let page = mapping
      .decode_page(br#"{"items":[],"page":4294967295,"total_pages":4294967295}"#)
      .unwrap();
    assert_eq!(
      page.position,
      PagePosition::Indexed {
        page: u32::MAX,
        total_pages: u32::MAX
      }
    );
  }
}
