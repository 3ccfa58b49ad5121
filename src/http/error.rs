//! REST client error types.

use thiserror::Error;

/// Errors surfaced by a [`Transport`](super::Transport).
///
/// Network failures and non-success statuses are both terminal for the call
/// that produced them; nothing here is retried implicitly.
#[derive(Error, Debug)]
pub enum ApiError {
  #[error("HTTP request failed: {0}")]
  Transport(#[from] reqwest::Error),

  #[error("Server returned {status}: {message}")]
  Status { status: u16, message: String },

  #[error("Invalid JSON: {0}")]
  Decode(#[from] serde_json::Error),

  #[error("Invalid URL: {0}")]
  Url(#[from] url::ParseError),
}

impl ApiError {
  /// Whether the request never produced an HTTP response.
  pub fn is_transport(&self) -> bool {
    matches!(self, ApiError::Transport(_))
  }

  /// HTTP status of a non-success response.
  pub fn status(&self) -> Option<u16> {
    match self {
      ApiError::Status { status, .. } => Some(*status),
      _ => None,
    }
  }
}
