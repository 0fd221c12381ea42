//! reqwest-backed [`TransportClient`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use tracing::debug;
use url::Url;

use super::{Method, TransportClient, TransportError, TransportResponse};

/// Supplies the bearer credential attached to each request.
///
/// Acquiring or refreshing the token is someone else's job.
pub trait CredentialSource: Send + Sync {
  fn bearer_token(&self) -> Option<String>;
}

/// A fixed token, or none at all.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<String>);

impl CredentialSource for StaticToken {
  fn bearer_token(&self) -> Option<String> {
    self.0.clone()
  }
}

/// Reads the token from the environment on every request.
///
/// Checks TIERSTORE_API_TOKEN first, then API_TOKEN as fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvToken;

impl CredentialSource for EnvToken {
  fn bearer_token(&self) -> Option<String> {
    std::env::var("TIERSTORE_API_TOKEN")
      .or_else(|_| std::env::var("API_TOKEN"))
      .ok()
      .filter(|t| !t.is_empty())
  }
}

/// JSON-over-HTTP transport rooted at a base URL.
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
  credentials: Box<dyn CredentialSource>,
}

impl HttpTransport {
  pub fn new(
    base_url: &str,
    timeout: Duration,
    credentials: impl CredentialSource + 'static,
  ) -> Result<Self, TransportError> {
    // A trailing slash keeps the last path segment when joining.
    let normalized = format!("{}/", base_url.trim_end_matches('/'));
    let base_url = Url::parse(&normalized)
      .map_err(|e| TransportError::InvalidRequest(format!("bad base url {}: {}", base_url, e)))?;

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {}", e)))?;

    Ok(Self {
      client,
      base_url,
      credentials: Box::new(credentials),
    })
  }

  fn resolve(&self, path: &str) -> Result<Url, TransportError> {
    self
      .base_url
      .join(path.trim_start_matches('/'))
      .map_err(|e| TransportError::InvalidRequest(format!("bad path {}: {}", path, e)))
  }
}

#[async_trait]
impl TransportClient for HttpTransport {
  async fn request(
    &self,
    method: Method,
    path: &str,
    body: Option<Vec<u8>>,
  ) -> Result<TransportResponse, TransportError> {
    let url = self.resolve(path)?;
    debug!(method = method.as_str(), %url, "sending request");

    let mut builder = self
      .client
      .request(to_reqwest(method), url)
      .header(ACCEPT, HeaderValue::from_static("application/json"));

    if let Some(token) = self.credentials.bearer_token() {
      builder = builder.bearer_auth(token);
    }

    if let Some(body) = body {
      builder = builder
        .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
        .body(body);
    }

    let response = builder.send().await.map_err(classify)?;
    let status = response.status().as_u16();
    let bytes = response.bytes().await.map_err(classify)?.to_vec();
    debug!(status, len = bytes.len(), "received response");

    Ok(if (200..300).contains(&status) {
      TransportResponse {
        status,
        body: Some(bytes),
        error_body: None,
      }
    } else {
      TransportResponse {
        status,
        body: None,
        error_body: Some(bytes),
      }
    })
  }
}

fn to_reqwest(method: Method) -> reqwest::Method {
  match method {
    Method::Get => reqwest::Method::GET,
    Method::Post => reqwest::Method::POST,
    Method::Put => reqwest::Method::PUT,
    Method::Patch => reqwest::Method::PATCH,
    Method::Delete => reqwest::Method::DELETE,
  }
}

/// Sort a reqwest failure into the transport error buckets.
fn classify(error: reqwest::Error) -> TransportError {
  if error.is_timeout() {
    TransportError::Timeout
  } else if error.is_connect() {
    TransportError::Connect(error.to_string())
  } else if error.is_builder() {
    TransportError::InvalidRequest(error.to_string())
  } else if error.is_request() || error.is_body() {
    TransportError::Io(error.to_string())
  } else {
    TransportError::Other(error.to_string())
  }
}
