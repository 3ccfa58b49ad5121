//! Typed read/write handle for one REST collection.
//!
//! A [`Resource`] binds a record type to its collection path and to a shared
//! [`QueryClient`]. Reads go through the cache under the path as key; a
//! successful create invalidates that key so the next read refetches.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::QueryClient;
use crate::http::{ApiError, Transport};
use crate::query::{Mutation, Query};

/// A record exposed by a REST collection endpoint.
pub trait ResourceRecord: DeserializeOwned + Clone + Send + Sync + 'static {
  /// Create payload. Server-assigned fields have no place on it.
  type Create: Serialize + Send + Sync + 'static;

  /// Collection endpoint path, also the cache key.
  const PATH: &'static str;
}

#[derive(Error, Debug)]
pub enum ResourceError {
  #[error(transparent)]
  Request(#[from] Arc<ApiError>),

  #[error("Failed to encode request body: {0}")]
  Encode(#[source] serde_json::Error),

  #[error("Unexpected response shape: {0}")]
  Decode(#[source] serde_json::Error),
}

impl From<ApiError> for ResourceError {
  fn from(e: ApiError) -> Self {
    ResourceError::Request(Arc::new(e))
  }
}

impl ResourceError {
  /// HTTP status of a non-success response.
  pub fn status(&self) -> Option<u16> {
    match self {
      ResourceError::Request(e) => e.status(),
      _ => None,
    }
  }
}

pub type Result<T> = std::result::Result<T, ResourceError>;

/// Read and write operations for one collection endpoint.
pub struct Resource<R, C> {
  transport: Arc<C>,
  cache: QueryClient,
  path: String,
  _record: PhantomData<fn() -> R>,
}

impl<R: ResourceRecord, C: Transport> Resource<R, C> {
  /// Bind to `R::PATH`.
  pub fn new(transport: Arc<C>, cache: QueryClient) -> Self {
    Self::at_path(transport, cache, R::PATH)
  }

  /// Bind to an explicit collection path.
  pub fn at_path(transport: Arc<C>, cache: QueryClient, path: impl Into<String>) -> Self {
    Self {
      transport,
      cache,
      path: path.into(),
      _record: PhantomData,
    }
  }

  /// The cache key this resource reads and invalidates.
  pub fn key(&self) -> &str {
    &self.path
  }

  /// Fetch the collection, shared with every other reader of the same path.
  ///
  /// A body that does not decode as `Vec<R>` fails the fetch, so it is
  /// never cached.
  pub async fn list(&self) -> Result<Vec<R>> {
    let transport = Arc::clone(&self.transport);
    let path = self.path.clone();

    let result = self
      .cache
      .fetch_query(&self.path, move || {
        let transport = Arc::clone(&transport);
        let path = path.clone();
        async move {
          let value = transport.get_json(&path).await?;
          Vec::<R>::deserialize(&value)?;
          Ok::<_, ApiError>(value)
        }
      })
      .await?;

    debug!(path = %self.path, source = ?result.source, "listed");
    serde_json::from_value(result.data).map_err(|e| {
      // Only a value persisted by an older build can get here
      warn!(path = %self.path, error = %e, "dropping undecodable cached list");
      self.invalidate();
      ResourceError::Decode(e)
    })
  }

  /// Create a record and invalidate the cached list on success.
  ///
  /// On failure the cache is left untouched. Writes are never retried.
  pub async fn create(&self, payload: R::Create) -> Result<R> {
    let created = self.send_create(&payload).await?;
    // The server accepted the write even if we cannot decode its echo
    self.invalidate();
    serde_json::from_value(created).map_err(ResourceError::Decode)
  }

  /// Send the create request without touching the cache.
  pub async fn send_create(&self, payload: &R::Create) -> Result<serde_json::Value> {
    let body = serde_json::to_value(payload).map_err(ResourceError::Encode)?;
    self
      .transport
      .post_json(&self.path, body)
      .await
      .map_err(|e| {
        warn!(path = %self.path, error = %e, "create failed");
        ResourceError::from(e)
      })
  }

  /// Mark the cached list stale.
  pub fn invalidate(&self) {
    self.cache.invalidate(&self.path);
  }

  /// Observable form of [`Resource::list`], refetching after invalidation.
  pub fn query(&self) -> Query<Vec<R>> {
    let resource = self.clone();
    Query::new(&self.cache, self.path.clone(), move || {
      let resource = resource.clone();
      async move { resource.list().await.map_err(|e| e.to_string()) }
    })
  }

  /// Observable form of [`Resource::create`].
  pub fn mutation(&self) -> Mutation<R::Create, R> {
    let resource = self.clone();
    Mutation::new(move |payload: R::Create| {
      let resource = resource.clone();
      async move { resource.create(payload).await.map_err(|e| e.to_string()) }
    })
  }
}

impl<R, C> Clone for Resource<R, C> {
  fn clone(&self) -> Self {
    Self {
      transport: Arc::clone(&self.transport),
      cache: self.cache.clone(),
      path: self.path.clone(),
      _record: PhantomData,
    }
  }
}
