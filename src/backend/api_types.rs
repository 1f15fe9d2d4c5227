//! Wire-level types of the REST backend.

use serde::Deserialize;

use crate::error::ApiError;

/// Error body returned by the backend on non-2xx responses.
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
  pub code: Option<String>,
  #[serde(default)]
  pub message: String,
  pub details: Option<String>,
  pub hint: Option<String>,
}

impl ApiErrorBody {
  pub fn into_error(self, status: u16) -> ApiError {
    ApiError::Backend {
      status,
      code: self.code,
      message: self.message,
      details: self.details,
      hint: self.hint,
    }
  }
}

/// Build an error from a failed response's status and raw body.
pub fn error_from_body(status: u16, reason: Option<&str>, body: &str) -> ApiError {
  match serde_json::from_str::<ApiErrorBody>(body) {
    Ok(parsed) if !parsed.message.is_empty() => parsed.into_error(status),
    _ => {
      let message = if body.trim().is_empty() {
        reason
          .map(String::from)
          .unwrap_or_else(|| format!("Request failed with status {}", status))
      } else {
        body.trim().to_string()
      };
      ApiError::Backend {
        status,
        code: None,
        message,
        details: None,
        hint: None,
      }
    }
  }
}

/// Parse the total row count from a `Content-Range` header
/// (`0-24/3573`, `*/0`). Returns `None` when the total is unknown (`*`).
pub fn parse_content_range_total(value: &str) -> Option<u64> {
  let (_, total) = value.rsplit_once('/')?;
  total.trim().parse().ok()
}
