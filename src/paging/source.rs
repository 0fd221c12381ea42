//! Page source over the transport.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;
use url::form_urlencoded;

use super::{Cursor, Page, PagePosition, RemotePage, FIRST_PAGE};
use crate::error::{map_error, map_error_with_body, AppError, AppResult, ErrorKind};
use crate::pool::WorkerPool;
use crate::repository::EntityMapping;
use crate::transport::{Method, TransportClient};

/// How a collection addresses its pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageStyle {
  /// `?page=N&per_page=S`, response reports total pages
  #[default]
  Index,
  /// `?cursor=T&limit=S`, response reports the next token
  Token,
}

/// Entity mapping that can also read paged collection responses.
pub trait PagedMapping: EntityMapping {
  fn page_style(&self) -> PageStyle {
    PageStyle::Index
  }

  /// Path requesting the page at `cursor` (`None` for the first page).
  fn page_path(&self, cursor: Option<&Cursor>, page_size: u32) -> String {
    let mut query = form_urlencoded::Serializer::new(String::new());
    match (self.page_style(), cursor) {
      (_, Some(Cursor::Index(page))) => {
        query.append_pair("page", &page.to_string());
        query.append_pair("per_page", &page_size.to_string());
      }
      (_, Some(Cursor::Token(token))) => {
        query.append_pair("cursor", token);
        query.append_pair("limit", &page_size.to_string());
      }
      (PageStyle::Index, None) => {
        query.append_pair("page", &FIRST_PAGE.to_string());
        query.append_pair("per_page", &page_size.to_string());
      }
      (PageStyle::Token, None) => {
        query.append_pair("limit", &page_size.to_string());
      }
    }
    format!("{}?{}", self.collection_path(), query.finish())
  }

  fn decode_page(&self, body: &[u8]) -> AppResult<RemotePage<Self::Remote>>;
}

/// Loads pages of one collection. Talks to the transport only.
pub struct PageSource<M: PagedMapping> {
  mapping: Arc<M>,
  transport: Arc<dyn TransportClient>,
  pool: WorkerPool,
}

impl<M: PagedMapping> PageSource<M> {
  pub fn new(mapping: Arc<M>, transport: Arc<dyn TransportClient>) -> Self {
    Self {
      mapping,
      transport,
      pool: WorkerPool::default(),
    }
  }

  pub fn with_pool(mut self, pool: WorkerPool) -> Self {
    self.pool = pool;
    self
  }

  pub fn entity_type(&self) -> &str {
    self.mapping.entity_type()
  }

  /// Load the page at `cursor`; `None` requests the first page.
  ///
  /// Dropping the returned future cancels the request and frees its worker.
  pub async fn load(&self, cursor: Option<&Cursor>, page_size: u32) -> AppResult<Page<M::Domain>> {
    if page_size == 0 {
      return Err(AppError::new(
        ErrorKind::Validation,
        "page size must be positive",
      ));
    }

    let path = self.mapping.page_path(cursor, page_size);
    debug!(entity = self.mapping.entity_type(), %path, "loading page");

    let response = self
      .pool
      .run(self.transport.request(Method::Get, &path, None))
      .await?
      .map_err(|e| map_error(None, Some(&e)))?;

    if !response.is_success() {
      return Err(map_error_with_body(
        Some(response.status),
        None,
        response.error_body.as_deref(),
      ));
    }

    let body = match response.body {
      Some(body) if !body.is_empty() => body,
      // An empty successful response is the end of the collection
      _ => return Ok(Page::empty()),
    };

    let remote = self.mapping.decode_page(&body)?;
    let (prev_cursor, next_cursor) = cursors(&remote.position, remote.items.is_empty());
    let items = remote
      .items
      .into_iter()
      .map(|r| self.mapping.remote_to_domain(r))
      .collect();

    Ok(Page {
      items,
      prev_cursor,
      next_cursor,
    })
  }

  /// Walk the whole collection from the first page.
  ///
  /// Fails if the server hands back a cursor it already returned, since
  /// following it would never end.
  pub async fn load_all(&self, page_size: u32) -> AppResult<Vec<Page<M::Domain>>> {
    let mut pages = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor = None;
    loop {
      let page = self.load(cursor.as_ref(), page_size).await?;
      cursor = page.next_cursor.clone();
      pages.push(page);
      match &cursor {
        None => return Ok(pages),
        Some(next) if !seen.insert(next.clone()) => {
          return Err(AppError::new(
            ErrorKind::Unknown,
            format!(
              "{} page source repeated cursor {:?} after {} pages",
              self.mapping.entity_type(),
              next,
              pages.len()
            ),
          ));
        }
        Some(_) => {}
      }
    }
  }

  /// See [`refresh_key`].
  pub fn refresh_key(
    &self,
    anchor_position: Option<usize>,
    loaded_pages: &[Page<M::Domain>],
  ) -> Option<Cursor> {
    refresh_key(anchor_position, loaded_pages)
  }
}

impl<M: PagedMapping> Clone for PageSource<M> {
  fn clone(&self) -> Self {
    Self {
      mapping: Arc::clone(&self.mapping),
      transport: Arc::clone(&self.transport),
      pool: self.pool.clone(),
    }
  }
}

fn cursors(position: &PagePosition, empty: bool) -> (Option<Cursor>, Option<Cursor>) {
  match position {
    PagePosition::Indexed { page, total_pages } => {
      let prev = (*page > FIRST_PAGE).then(|| Cursor::Index(page - 1));
      let next = (!empty && *page < *total_pages).then(|| Cursor::Index(page + 1));
      (prev, next)
    }
    PagePosition::Token { prev, next } => {
      let prev = prev.clone().filter(|t| !t.is_empty()).map(Cursor::Token);
      let next = next
        .clone()
        .filter(|t| !empty && !t.is_empty())
        .map(Cursor::Token);
      (prev, next)
    }
  }
}

/// Cursor to reload so that a refresh resumes near `anchor_position`.
///
/// Picks the loaded page holding the anchor (the last page if the anchor is
/// past the end) and returns the cursor that addresses that page: `prev + 1`
/// or else `next - 1` for indexed pages, the previous page's next token for
/// token pages. `None` means start over from the first page.
pub fn refresh_key<T>(anchor_position: Option<usize>, loaded_pages: &[Page<T>]) -> Option<Cursor> {
  let anchor = anchor_position?;
  let index = closest_page(anchor, loaded_pages)?;
  let page = loaded_pages.get(index)?;

  match (&page.prev_cursor, &page.next_cursor) {
    (Some(Cursor::Index(prev)), _) => Some(Cursor::Index(prev.saturating_add(1))),
    (_, Some(Cursor::Index(next))) => Some(Cursor::Index(next.saturating_sub(1).max(FIRST_PAGE))),
    _ => index
      .checked_sub(1)
      .and_then(|i| loaded_pages.get(i))
      .and_then(|before| before.next_cursor.clone()),
  }
}

fn closest_page<T>(anchor: usize, pages: &[Page<T>]) -> Option<usize> {
  let mut start = 0;
  for (index, page) in pages.iter().enumerate() {
    let end = start + page.items.len();
    if anchor < end {
      return Some(index);
    }
    start = end;
  }
  pages.len().checked_sub(1)
}
