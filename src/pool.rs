//! Bounded pool for I/O-bound work.
//!
//! Network calls and blocking store calls each hold one permit while they
//! run, so at most `size` of them are in flight per pool. Dropping a pending
//! future releases its permit.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::{AppError, AppResult, ErrorKind};

#[derive(Clone)]
pub struct WorkerPool {
  permits: Arc<Semaphore>,
  size: usize,
}

impl WorkerPool {
  pub fn new(size: usize) -> Self {
    let size = size.max(1);
    Self {
      permits: Arc::new(Semaphore::new(size)),
      size,
    }
  }

  pub fn size(&self) -> usize {
    self.size
  }

  /// Number of permits currently free.
  pub fn available(&self) -> usize {
    self.permits.available_permits()
  }

  /// Run an async task while holding a permit.
  pub async fn run<F, T>(&self, task: F) -> AppResult<T>
  where
    F: Future<Output = T>,
  {
    let _permit = self
      .permits
      .acquire()
      .await
      .map_err(|e| AppError::new(ErrorKind::Unknown, format!("worker pool closed: {}", e)))?;
    Ok(task.await)
  }

  /// Run a blocking closure on the blocking thread pool while holding a permit.
  pub async fn run_blocking<F, T>(&self, task: F) -> AppResult<T>
  where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
  {
    let permit = self
      .permits
      .clone()
      .acquire_owned()
      .await
      .map_err(|e| AppError::new(ErrorKind::Unknown, format!("worker pool closed: {}", e)))?;

    tokio::task::spawn_blocking(move || {
      let _permit = permit;
      task()
    })
    .await
    .map_err(|e| AppError::new(ErrorKind::Unknown, format!("worker task failed: {}", e)))
  }
}

impl Default for WorkerPool {
  fn default() -> Self {
    Self::new(8)
  }
}
