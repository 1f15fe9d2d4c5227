//! Errors returned by the backend and the query cache.

use thiserror::Error;

/// Result type for data-access operations.
pub type ApiResult<T> = Result<T, ApiError>;

/// Error surfaced to callers of the API and cache layers.
///
/// `Display` yields the human-readable message shown in notifications.
/// The type is `Clone` so one in-flight fetch can hand its result to every
/// caller waiting on the same cache key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
  /// The request never produced a response (DNS, TLS, connection reset...)
  #[error("Network error: {0}")]
  Transport(String),

  /// The backend answered with a non-success status
  #[error("{message}")]
  Backend {
    status: u16,
    code: Option<String>,
    message: String,
    details: Option<String>,
    hint: Option<String>,
  },

  /// A lookup by id matched no row
  #[error("{resource} {id} not found")]
  NotFound { resource: &'static str, id: String },

  /// An id-addressed operation was called with an empty id
  #[error("{resource}: an id is required")]
  MissingId { resource: &'static str },

  /// The response body did not match the expected shape
  #[error("Unexpected response: {0}")]
  Decode(String),

  /// Backend settings are missing or malformed
  #[error("Configuration error: {0}")]
  Config(String),

  /// The fetch task ended without producing a result
  #[error("Request was cancelled")]
  Cancelled,
}

impl ApiError {
  pub fn config(message: impl Into<String>) -> Self {
    Self::Config(message.into())
  }

  pub fn decode(message: impl Into<String>) -> Self {
    Self::Decode(message.into())
  }

  /// HTTP status for backend errors.
  pub fn status(&self) -> Option<u16> {
    match self {
      Self::Backend { status, .. } => Some(*status),
      _ => None,
    }
  }
}

impl From<reqwest::Error> for ApiError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_decode() {
      Self::Decode(e.to_string())
    } else {
      Self::Transport(e.to_string())
    }
  }
}

impl From<serde_json::Error> for ApiError {
  fn from(e: serde_json::Error) -> Self {
    Self::Decode(e.to_string())
  }
}
