//! Remote request contract consumed by the repository and page source.
//!
//! Implementations perform exactly one attempt per call. Status codes are
//! returned as data; only failures that produced no response at all are
//! reported as [`TransportError`].

mod http;

use async_trait::async_trait;

pub use http::{CredentialSource, EnvToken, HttpTransport, StaticToken};

/// HTTP-style request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Post,
  Put,
  Patch,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
    }
  }
}

/// Tagged response of a single remote request.
#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
  pub status: u16,
  /// Body of a successful (2xx) response
  pub body: Option<Vec<u8>>,
  /// Body of a non-2xx response
  pub error_body: Option<Vec<u8>>,
}

impl TransportResponse {
  pub fn ok(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      body: Some(body.into()),
      error_body: None,
    }
  }

  pub fn failed(status: u16, error_body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      body: None,
      error_body: Some(error_body.into()),
    }
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Failure that prevented a response from being received.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
  #[error("request timed out")]
  Timeout,
  #[error("connection failed: {0}")]
  Connect(String),
  #[error("I/O error: {0}")]
  Io(String),
  #[error("invalid request: {0}")]
  InvalidRequest(String),
  #[error("transport error: {0}")]
  Other(String),
}

impl TransportError {
  /// True for failures at the connection / socket level.
  pub fn is_io(&self) -> bool {
    matches!(
      self,
      TransportError::Timeout | TransportError::Connect(_) | TransportError::Io(_)
    )
  }
}

/// Issues remote requests. No retry logic of its own.
#[async_trait]
pub trait TransportClient: Send + Sync {
  async fn request(
    &self,
    method: Method,
    path: &str,
    body: Option<Vec<u8>>,
  ) -> Result<TransportResponse, TransportError>;
}
