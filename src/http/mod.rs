//! Generic REST client used by the resource layer.
//!
//! The [`Transport`] trait is the seam between the cache/resource layers and
//! the network: [`RestClient`] talks to a real server over `reqwest`, tests
//! plug in their own implementation.

mod client;
mod error;
#[cfg(test)]
pub(crate) mod fake;

pub use client::RestClient;
pub use error::ApiError;

use async_trait::async_trait;
use serde_json::Value;

/// JSON-over-HTTP operations the resource layer needs.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
  /// `GET path`, returning the decoded JSON body of a 2xx response.
  async fn get_json(&self, path: &str) -> Result<Value, ApiError>;

  /// `POST path` with a JSON body, returning the decoded JSON body of a 2xx response.
  async fn post_json(&self, path: &str, body: Value) -> Result<Value, ApiError>;
}
