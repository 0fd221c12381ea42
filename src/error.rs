//! Error taxonomy shared by every tier of the data layer.
//!
//! Transport and storage failures are translated into [`AppError`] once, at
//! the boundary where they are caught. Higher layers only pass the error
//! along through [`AppResult`] combinators.

use std::fmt;
use std::sync::Arc;

use crate::transport::TransportError;

/// Maximum number of characters of an error body carried into a message.
const MAX_BODY_MESSAGE: usize = 512;

/// Closed set of failure categories surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
  Network,
  Auth,
  NotFound,
  Validation,
  Database,
  Unknown,
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ErrorKind::Network => "network",
      ErrorKind::Auth => "auth",
      ErrorKind::NotFound => "not found",
      ErrorKind::Validation => "validation",
      ErrorKind::Database => "database",
      ErrorKind::Unknown => "unknown",
    };
    f.write_str(name)
  }
}

/// Error returned by every repository operation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct AppError {
  pub kind: ErrorKind,
  pub message: String,
  /// Transport status code, when one was received.
  pub code: Option<u16>,
  #[source]
  pub cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
  pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
      code: None,
      cause: None,
    }
  }

  pub fn with_code(mut self, code: u16) -> Self {
    self.code = Some(code);
    self
  }

  pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
    self.cause = Some(Arc::new(cause));
    self
  }

  /// Wrap a local storage failure (cache table or persistent store).
  pub fn database(context: &str, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::new(ErrorKind::Database, format!("{}: {}", context, cause)).with_cause(cause)
  }

  /// A response that arrived fine at the transport level but could not be used.
  pub fn unknown(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Unknown, message)
  }

  pub fn is_not_found(&self) -> bool {
    self.kind == ErrorKind::NotFound
  }
}

/// Result type returned by every operation of the data layer.
pub type AppResult<T> = std::result::Result<T, AppError>;

/// Side-effect combinators for [`AppResult`].
///
/// `map` and `and_then` come from `std`; these two run a closure against one
/// variant and hand the result back untouched.
pub trait ResultExt<T> {
  fn on_success<F: FnOnce(&T)>(self, f: F) -> Self;
  fn on_error<F: FnOnce(&AppError)>(self, f: F) -> Self;
}

impl<T> ResultExt<T> for AppResult<T> {
  fn on_success<F: FnOnce(&T)>(self, f: F) -> Self {
    if let Ok(value) = &self {
      f(value);
    }
    self
  }

  fn on_error<F: FnOnce(&AppError)>(self, f: F) -> Self {
    if let Err(err) = &self {
      f(err);
    }
    self
  }
}

/// Translate a transport outcome into an [`AppError`].
///
/// Precedence is fixed: auth statuses, not-found, validation statuses,
/// server errors, then status-less I/O failures. Everything else is
/// [`ErrorKind::Unknown`]. Never panics.
pub fn map_error(status: Option<u16>, transport_error: Option<&TransportError>) -> AppError {
  map_error_with_body(status, transport_error, None)
}

/// Same as [`map_error`], using the response's error body for the message.
pub fn map_error_with_body(
  status: Option<u16>,
  transport_error: Option<&TransportError>,
  error_body: Option<&[u8]>,
) -> AppError {
  let kind = match status {
    Some(401) | Some(403) => ErrorKind::Auth,
    Some(404) => ErrorKind::NotFound,
    Some(409) | Some(422) => ErrorKind::Validation,
    Some(500..=599) => ErrorKind::Network,
    Some(_) => ErrorKind::Unknown,
    None => match transport_error {
      Some(err) if err.is_io() => ErrorKind::Network,
      _ => ErrorKind::Unknown,
    },
  };

  let message = error_body
    .and_then(body_message)
    .or_else(|| transport_error.map(|e| e.to_string()))
    .or_else(|| status.map(status_reason))
    .unwrap_or_else(|| "unexpected transport outcome".to_string());

  let mut err = AppError::new(kind, message);
  err.code = status;
  if let Some(cause) = transport_error {
    err = err.with_cause(cause.clone());
  }
  err
}

fn body_message(body: &[u8]) -> Option<String> {
  let text = String::from_utf8_lossy(body);
  let text = text.trim();
  if text.is_empty() {
    return None;
  }
  Some(text.chars().take(MAX_BODY_MESSAGE).collect())
}

fn status_reason(status: u16) -> String {
  reqwest::StatusCode::from_u16(status)
    .ok()
    .and_then(|s| s.canonical_reason())
    .map(|reason| format!("{} {}", status, reason))
    .unwrap_or_else(|| format!("HTTP status {}", status))
}
