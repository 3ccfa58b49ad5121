use std::time::Duration;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::{ApiError, Transport};
use crate::config::Config;

/// REST client for the communications API
#[derive(Debug, Clone)]
pub struct RestClient {
  client: reqwest::Client,
  base_url: Url,
  token: Option<String>,
}

impl RestClient {
  pub fn new(
    base_url: &str,
    token: Option<String>,
    timeout: Option<Duration>,
  ) -> std::result::Result<Self, ApiError> {
    let base_url = Url::parse(base_url)?;

    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
      builder = builder.timeout(timeout);
    }
    let client = builder.build()?;

    Ok(Self {
      client,
      base_url,
      token,
    })
  }

  /// Build a client from the loaded configuration and `COMMS_API_TOKEN`.
  pub fn from_config(config: &Config) -> Result<Self> {
    let timeout = config.api.timeout_secs.map(Duration::from_secs);
    Self::new(&config.api.base_url, Config::get_api_token(), timeout)
      .map_err(|e| eyre!("Failed to create REST client for {}: {}", config.api.base_url, e))
  }

  /// Resolve an endpoint path against the base URL, keeping any base path prefix.
  fn url(&self, path: &str) -> std::result::Result<Url, ApiError> {
    let base = self.base_url.as_str().trim_end_matches('/');
    let path = path.trim_start_matches('/');
    Ok(Url::parse(&format!("{}/{}", base, path))?)
  }

  fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    match &self.token {
      Some(token) => request.bearer_auth(token),
      None => request,
    }
  }

  async fn send(&self, request: reqwest::RequestBuilder) -> std::result::Result<Value, ApiError> {
    let response = self.authorize(request).send().await.map_err(|e| {
      warn!(error = %e, "request failed before a response arrived");
      ApiError::from(e)
    })?;
    let status = response.status();
    let body = response.text().await?;
    decode_response(status, &body)
  }
}

/// Map a status and raw body into the JSON value or an [`ApiError`].
fn decode_response(status: StatusCode, body: &str) -> std::result::Result<Value, ApiError> {
  if status.is_success() {
    if body.trim().is_empty() {
      return Ok(Value::Null);
    }
    return Ok(serde_json::from_str(body)?);
  }

  warn!(status = status.as_u16(), "server returned a non-success status");
  let message = if body.is_empty() {
    status
      .canonical_reason()
      .unwrap_or("Unknown error")
      .to_string()
  } else {
    body.to_string()
  };
  Err(ApiError::Status {
    status: status.as_u16(),
    message,
  })
}

#[async_trait]
impl Transport for RestClient {
  async fn get_json(&self, path: &str) -> std::result::Result<Value, ApiError> {
    let url = self.url(path)?;
    debug!(%url, "GET");
    self.send(self.client.get(url)).await
  }

  async fn post_json(&self, path: &str, body: Value) -> std::result::Result<Value, ApiError> {
    let url = self.url(path)?;
    debug!(%url, "POST");
    self.send(self.client.post(url).json(&body)).await
  }
}
