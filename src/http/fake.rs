//! In-memory [`Transport`] for tests.
//!
//! Behaves like a tiny collection endpoint: GET returns every record created
//! so far, POST assigns `id`, `profileId` and `createdAt` and stores the
//! record. Failures, delays and canned responses can be switched on per test.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{ApiError, Transport};

pub const PROFILE_ID: &str = "p1";
pub const CREATED_AT: &str = "2024-01-01T00:00:00Z";

#[derive(Default)]
pub struct FakeServer {
  records: Mutex<Vec<Value>>,
  gets: AtomicUsize,
  posts: AtomicUsize,
  get_delay: Mutex<Duration>,
  get_failure: Mutex<Option<u16>>,
  post_failure: Mutex<Option<u16>>,
  get_response: Mutex<Option<Value>>,
  post_response: Mutex<Option<Value>>,
  last_path: Mutex<Option<String>>,
  last_post_body: Mutex<Option<Value>>,
}

impl FakeServer {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of GET requests served.
  pub fn gets(&self) -> usize {
    self.gets.load(Ordering::SeqCst)
  }

  /// Number of POST requests received, failed ones included.
  pub fn posts(&self) -> usize {
    self.posts.load(Ordering::SeqCst)
  }

  pub fn set_get_delay(&self, delay: Duration) {
    *self.get_delay.lock().unwrap() = delay;
  }

  pub fn fail_gets(&self, status: Option<u16>) {
    *self.get_failure.lock().unwrap() = status;
  }

  pub fn fail_posts(&self, status: Option<u16>) {
    *self.post_failure.lock().unwrap() = status;
  }

  pub fn set_get_response(&self, value: Value) {
    *self.get_response.lock().unwrap() = Some(value);
  }

  /// Go back to serving the stored records.
  pub fn clear_get_response(&self) {
    *self.get_response.lock().unwrap() = None;
  }

  pub fn set_post_response(&self, value: Value) {
    *self.post_response.lock().unwrap() = Some(value);
  }

  pub fn last_path(&self) -> Option<String> {
    self.last_path.lock().unwrap().clone()
  }

  pub fn last_post_body(&self) -> Option<Value> {
    self.last_post_body.lock().unwrap().clone()
  }

  fn status_error(status: u16) -> ApiError {
    ApiError::Status {
      status,
      message: "fake failure".to_string(),
    }
  }
}

#[async_trait]
impl Transport for FakeServer {
  async fn get_json(&self, path: &str) -> Result<Value, ApiError> {
    self.gets.fetch_add(1, Ordering::SeqCst);
    *self.last_path.lock().unwrap() = Some(path.to_string());

    let delay = *self.get_delay.lock().unwrap();
    if !delay.is_zero() {
      tokio::time::sleep(delay).await;
    }

    if let Some(status) = *self.get_failure.lock().unwrap() {
      return Err(Self::status_error(status));
    }
    if let Some(value) = self.get_response.lock().unwrap().clone() {
      return Ok(value);
    }
    Ok(Value::Array(self.records.lock().unwrap().clone()))
  }

  async fn post_json(&self, path: &str, body: Value) -> Result<Value, ApiError> {
    self.posts.fetch_add(1, Ordering::SeqCst);
    *self.last_path.lock().unwrap() = Some(path.to_string());
    *self.last_post_body.lock().unwrap() = Some(body.clone());

    if let Some(status) = *self.post_failure.lock().unwrap() {
      return Err(Self::status_error(status));
    }
    if let Some(value) = self.post_response.lock().unwrap().clone() {
      return Ok(value);
    }

    let mut records = self.records.lock().unwrap();
    let mut record = body;
    if let Value::Object(fields) = &mut record {
      fields.insert("id".to_string(), json!(records.len() + 1));
      fields.insert("profileId".to_string(), json!(PROFILE_ID));
      fields.insert("createdAt".to_string(), json!(CREATED_AT));
    }
    records.push(record.clone());
    Ok(record)
  }
}
