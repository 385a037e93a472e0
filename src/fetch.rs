//! Typed HTTP client used as the producer side of the cache layer.
//!
//! Thin wrapper over `reqwest`: every call resolves with decoded JSON or
//! rejects with a [`FetchError`] carrying the HTTP status and response body.
//! The cache layer above imposes no additional timeout of its own.

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::trace;
use url::Url;

use crate::error::FetchError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Typed JSON-over-HTTP client for one API base URL.
#[derive(Clone)]
pub struct FetchClient {
  http: reqwest::Client,
  base: Url,
}

impl FetchClient {
  /// Create a client for the given base URL with a 30s request timeout.
  pub fn new(base_url: &str) -> Result<Self, FetchError> {
    Self::with_timeout(base_url, DEFAULT_TIMEOUT)
  }

  /// Create a client with an explicit request timeout.
  pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
    let base = Url::parse(base_url)
      .map_err(|e| FetchError::Network(format!("invalid base url {}: {}", base_url, e)))?;

    let http = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| FetchError::Network(format!("failed to build http client: {}", e)))?;

    Ok(Self { http, base })
  }

  /// GET `path` and decode the JSON response.
  pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
    self.request::<T, ()>(Method::GET, path, None).await
  }

  /// POST `body` as JSON to `path` and decode the response.
  pub async fn post<T: DeserializeOwned, B: Serialize>(
    &self,
    path: &str,
    body: &B,
  ) -> Result<T, FetchError> {
    self.request(Method::POST, path, Some(body)).await
  }

  /// PATCH `body` as JSON to `path` and decode the response.
  pub async fn patch<T: DeserializeOwned, B: Serialize>(
    &self,
    path: &str,
    body: &B,
  ) -> Result<T, FetchError> {
    self.request(Method::PATCH, path, Some(body)).await
  }

  /// DELETE `path` and decode the response.
  pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
    self.request::<T, ()>(Method::DELETE, path, None).await
  }

  async fn request<T: DeserializeOwned, B: Serialize>(
    &self,
    method: Method,
    path: &str,
    body: Option<&B>,
  ) -> Result<T, FetchError> {
    let url = join_url(&self.base, path)?;
    trace!(%method, %url, "issuing request");

    let mut builder = self.http.request(method, url);
    if let Some(body) = body {
      builder = builder.json(body);
    }

    let response = builder.send().await.map_err(map_transport_error)?;
    let status = response.status();

    if !status.is_success() {
      // Surface the response body as the error message; fall back to the
      // canonical reason phrase when the body is empty or unreadable.
      let message = response.text().await.unwrap_or_default();
      let message = if message.is_empty() {
        reason_phrase(status)
      } else {
        message
      };
      return Err(FetchError::Http {
        status: status.as_u16(),
        message,
      });
    }

    response
      .json::<T>()
      .await
      .map_err(|e| FetchError::Decode(e.to_string()))
  }
}

/// Resolve `path` against the base URL.
fn join_url(base: &Url, path: &str) -> Result<Url, FetchError> {
  base
    .join(path)
    .map_err(|e| FetchError::Network(format!("invalid request path {}: {}", path, e)))
}

fn reason_phrase(status: StatusCode) -> String {
  status
    .canonical_reason()
    .unwrap_or("request failed")
    .to_string()
}

fn map_transport_error(e: reqwest::Error) -> FetchError {
  if e.is_timeout() {
    FetchError::Timeout
  } else {
    FetchError::Network(e.to_string())
  }
}
