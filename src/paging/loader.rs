//! Incremental page loading driven from an event loop.
//!
//! ```ignore
//! let mut loader = PagedLoader::new(source, 25);
//! loader.load_first();
//!
//! // In the event loop tick
//! if loader.poll() {
//!     render(loader.items());
//! }
//! ```

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{refresh_key, Cursor, Page, PageSource, PagedMapping};
use crate::error::{AppError, AppResult, ErrorKind};

/// Where a loaded page goes relative to the pages already held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadDirection {
  Append,
  Prepend,
  /// Drop everything held and keep only the new page
  Replace,
}

struct Pending<T> {
  direction: LoadDirection,
  receiver: mpsc::UnboundedReceiver<AppResult<Page<T>>>,
  handle: JoinHandle<()>,
}

/// Holds the pages loaded so far and at most one in-flight page request.
pub struct PagedLoader<M: PagedMapping> {
  source: PageSource<M>,
  page_size: u32,
  pages: Vec<Page<M::Domain>>,
  pending: Option<Pending<M::Domain>>,
  error: Option<AppError>,
}

impl<M: PagedMapping> PagedLoader<M> {
  pub fn new(source: PageSource<M>, page_size: u32) -> Self {
    Self {
      source,
      page_size,
      pages: Vec::new(),
      pending: None,
      error: None,
    }
  }

  pub fn pages(&self) -> &[Page<M::Domain>] {
    &self.pages
  }

  /// All loaded items, in collection order.
  pub fn items(&self) -> impl Iterator<Item = &M::Domain> {
    self.pages.iter().flat_map(|p| p.items.iter())
  }

  /// Error of the most recent load, cleared by the next successful one.
  pub fn error(&self) -> Option<&AppError> {
    self.error.as_ref()
  }

  pub fn is_loading(&self) -> bool {
    self.pending.is_some()
  }

  /// True once the last loaded page reports no next cursor.
  pub fn is_exhausted(&self) -> bool {
    self.pages.last().is_some_and(Page::is_last)
  }

  /// Start over from the first page, cancelling anything in flight.
  pub fn load_first(&mut self) {
    self.cancel();
    self.start(None, LoadDirection::Replace);
  }

  /// Load the page after the last one held.
  ///
  /// Returns `false` if a load is already running or the collection is
  /// exhausted. With nothing loaded yet this loads the first page.
  pub fn load_next(&mut self) -> bool {
    if self.is_loading() {
      return false;
    }
    match self.pages.last() {
      None => {
        self.start(None, LoadDirection::Replace);
        true
      }
      Some(last) => match last.next_cursor.clone() {
        Some(cursor) => {
          self.start(Some(cursor), LoadDirection::Append);
          true
        }
        None => false,
      },
    }
  }

  /// Load the page before the first one held.
  pub fn load_prev(&mut self) -> bool {
    if self.is_loading() {
      return false;
    }
    match self.pages.first().and_then(|p| p.prev_cursor.clone()) {
      Some(cursor) => {
        self.start(Some(cursor), LoadDirection::Prepend);
        true
      }
      None => false,
    }
  }

  /// Reload around `anchor_position` (an index into [`Self::items`]) and
  /// replace everything held with the result.
  pub fn refresh(&mut self, anchor_position: Option<usize>) {
    let cursor = refresh_key(anchor_position, &self.pages);
    self.cancel();
    self.start(cursor, LoadDirection::Replace);
  }

  /// Abort the in-flight request. Its result never reaches this loader.
  pub fn cancel(&mut self) {
    if let Some(pending) = self.pending.take() {
      debug!(entity = self.source_entity(), "cancelling page load");
      pending.handle.abort();
    }
  }

  /// Apply a finished load, if any. Returns `true` if state changed.
  pub fn poll(&mut self) -> bool {
    let Some(pending) = self.pending.as_mut() else {
      return false;
    };
    let direction = pending.direction;
    let result = match pending.receiver.try_recv() {
      Ok(result) => Some(result),
      Err(mpsc::error::TryRecvError::Empty) => return false,
      Err(mpsc::error::TryRecvError::Disconnected) => None,
    };
    self.pending = None;
    self.apply(direction, result);
    true
  }

  /// Wait for the in-flight load and apply it. Returns `false` if nothing
  /// was loading.
  pub async fn wait(&mut self) -> bool {
    let Some(pending) = self.pending.as_mut() else {
      return false;
    };
    let direction = pending.direction;
    let result = pending.receiver.recv().await;
    self.pending = None;
    self.apply(direction, result);
    true
  }

  fn start(&mut self, cursor: Option<Cursor>, direction: LoadDirection) {
    let (tx, rx) = mpsc::unbounded_channel();
    let source = self.source.clone();
    let page_size = self.page_size;

    let handle = tokio::spawn(async move {
      let result = source.load(cursor.as_ref(), page_size).await;
      // Receiver is gone if the load was cancelled
      let _ = tx.send(result);
    });

    self.pending = Some(Pending {
      direction,
      receiver: rx,
      handle,
    });
  }

  fn apply(&mut self, direction: LoadDirection, result: Option<AppResult<Page<M::Domain>>>) {
    match result {
      Some(Ok(page)) => {
        self.error = None;
        match direction {
          LoadDirection::Append => self.pages.push(page),
          LoadDirection::Prepend => self.pages.insert(0, page),
          LoadDirection::Replace => self.pages = vec![page],
        }
      }
      // Earlier pages stay valid after a failed load
      Some(Err(e)) => {
        debug!(error = %e, "page load failed");
        self.error = Some(e);
      }
      None => {
        self.error = Some(AppError::new(
          ErrorKind::Unknown,
          "page load ended without a result",
        ));
      }
    }
  }

  fn source_entity(&self) -> &str {
    self.source.entity_type()
  }
}

impl<M: PagedMapping> Drop for PagedLoader<M> {
  fn drop(&mut self) {
    if let Some(pending) = self.pending.take() {
      pending.handle.abort();
    }
  }
}
