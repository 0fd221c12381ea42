//! Tiered data access: an expiring cache, a local persistent store and a
//! remote transport behind one repository per entity type, plus cursor-based
//! paging of remote collections.

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod paging;
pub mod pool;
pub mod repository;
pub mod resource;
pub mod store;
pub mod transport;

#[cfg(test)]
mod testing;

pub use cache::{CacheStore, NoopCacheBackend, SqliteCacheBackend};
pub use error::{map_error, AppError, AppResult, ErrorKind, ResultExt};
pub use events::{RefreshCoordinator, RefreshEvent};
pub use paging::{Cursor, Page, PageSource, PagedLoader};
pub use pool::WorkerPool;
pub use repository::{DataRepository, EntityMapping};
pub use store::{PersistentStore, SqliteRecordStore};
pub use transport::{HttpTransport, TransportClient};
