//! Cursor-based incremental fetch of large collections.

mod loader;
mod source;

use serde::{Deserialize, Serialize};

pub use loader::{LoadDirection, PagedLoader};
pub use source::{refresh_key, PageSource, PageStyle, PagedMapping};

/// First page number of index-paged collections.
pub const FIRST_PAGE: u32 = 1;

/// Opaque position in a remote collection.
///
/// Callers hand cursors back to the page source as they received them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cursor {
  /// Page number of a collection that reports total pages
  Index(u32),
  /// Token issued by a collection that reports only the next position
  Token(String),
}

/// One loaded page.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
  pub items: Vec<T>,
  pub prev_cursor: Option<Cursor>,
  /// `None` iff the collection is exhausted
  pub next_cursor: Option<Cursor>,
}

impl<T> Page<T> {
  /// Terminal page with no items.
  pub fn empty() -> Self {
    Self {
      items: Vec::new(),
      prev_cursor: None,
      next_cursor: None,
    }
  }

  pub fn is_last(&self) -> bool {
    self.next_cursor.is_none()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

/// Where a remote page sits in its collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagePosition {
  /// `page` is 1-based; `total_pages` may be 0 for an empty collection
  Indexed { page: u32, total_pages: u32 },
  Token {
    prev: Option<String>,
    next: Option<String>,
  },
}

/// A page as decoded from the transport, before domain mapping.
#[derive(Debug, Clone)]
pub struct RemotePage<R> {
  pub items: Vec<R>,
  pub position: PagePosition,
}
