//! Error types for the cache layer.

use thiserror::Error;

/// Error produced by a fetch producer or the HTTP client.
///
/// Cloneable so it can flow through a shared in-flight future to every
/// caller waiting on the same key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
  /// The request never reached the server or the connection dropped.
  #[error("network error: {0}")]
  Network(String),

  /// The request timed out before a response arrived.
  #[error("request timed out")]
  Timeout,

  /// The server answered with a non-2xx status.
  #[error("HTTP {status}: {message}")]
  Http { status: u16, message: String },

  /// The response body could not be decoded into the expected type.
  #[error("failed to decode response: {0}")]
  Decode(String),
}

impl FetchError {
  /// HTTP status code, if this error carries one.
  pub fn status(&self) -> Option<u16> {
    match self {
      FetchError::Http { status, .. } => Some(*status),
      _ => None,
    }
  }

  /// Whether a retry has a chance of succeeding.
  ///
  /// Network failures, timeouts, 5xx responses, and 408 are retryable;
  /// other application errors and decode failures are not.
  pub fn is_retryable(&self) -> bool {
    match self {
      FetchError::Network(_) | FetchError::Timeout => true,
      FetchError::Http { status, .. } => *status >= 500 || *status == 408,
      FetchError::Decode(_) => false,
    }
  }
}

/// Error from a cache store operation that violates its contract.
#[derive(Debug, Error)]
pub enum StoreError {
  /// `evict` was called while a fetch for the key is still in flight.
  /// Eviction must wait for settlement so waiters keep a live entry.
  #[error("cannot evict {key}: a fetch is in flight")]
  FetchInFlight { key: String },
}
