//! Query client that orchestrates caching, de-duplication and invalidation.

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::storage::{CacheStorage, MemoryStorage, StoredEntry};
use super::traits::{CacheResult, Invalidation, RetryPolicy};
use crate::http::ApiError;

type FetchResult = Result<Value, Arc<ApiError>>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

/// Per-key bookkeeping that never leaves the client.
#[derive(Default)]
struct KeyState {
  /// Bumped by every invalidation; a fetch only stores its result if the
  /// generation it started under is still current.
  generation: u64,
  in_flight: Option<SharedFetch>,
}

static GLOBAL: OnceLock<QueryClient> = OnceLock::new();

/// Shared, process-wide cache of read results keyed by endpoint path.
///
/// Cloning is cheap; clones share storage, in-flight requests and the
/// invalidation channel.
pub struct QueryClient {
  storage: Arc<dyn CacheStorage>,
  keys: Arc<Mutex<HashMap<String, KeyState>>>,
  events: broadcast::Sender<Invalidation>,
  /// Age after which an entry is refetched; `None` keeps it until invalidated
  stale_time: Option<Duration>,
  retry: RetryPolicy,
}

impl QueryClient {
  /// Create a new query client with the given storage backend.
  pub fn new(storage: impl CacheStorage + 'static) -> Self {
    let (events, _) = broadcast::channel(64);
    Self {
      storage: Arc::new(storage),
      keys: Arc::new(Mutex::new(HashMap::new())),
      events,
      stale_time: None,
      retry: RetryPolicy::default(),
    }
  }

  /// The process-wide client, backed by memory unless one was installed
  /// with [`QueryClient::init_global`] first.
  pub fn global() -> QueryClient {
    GLOBAL
      .get_or_init(|| QueryClient::new(MemoryStorage::new()))
      .clone()
  }

  /// Install the process-wide client. Fails (returning the client) if the
  /// global was already initialized.
  pub fn init_global(client: QueryClient) -> Result<(), QueryClient> {
    GLOBAL.set(client)
  }

  pub fn with_stale_time(mut self, stale_time: Option<Duration>) -> Self {
    self.stale_time = stale_time;
    self
  }

  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  /// Subscribe to invalidation events for every key.
  pub fn subscribe(&self) -> broadcast::Receiver<Invalidation> {
    self.events.subscribe()
  }

  fn lock_keys(&self) -> MutexGuard<'_, HashMap<String, KeyState>> {
    // Critical sections never panic midway, so the map is consistent
    self.keys.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn is_fresh(&self, entry: &StoredEntry) -> bool {
    if entry.invalidated {
      return false;
    }
    match self.stale_time {
      Some(stale_time) => match chrono::Duration::from_std(stale_time) {
        Ok(stale_time) => Utc::now() - entry.cached_at <= stale_time,
        Err(_) => true,
      },
      None => true,
    }
  }

  /// Read the stored entry for `key`, fresh or stale.
  ///
  /// Storage failures are logged and treated as a miss.
  pub fn get_cached(&self, key: &str) -> Option<StoredEntry> {
    match self.storage.get(key) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(key, error = %e, "cache read failed");
        None
      }
    }
  }

  /// Seed or overwrite the stored value for `key`.
  pub fn set_cached(&self, key: &str, value: &Value) {
    if let Err(e) = self.storage.put(key, value) {
      warn!(key, error = %e, "cache write failed");
    }
  }

  /// Fetch with cache-first strategy.
  ///
  /// 1. Fresh cached value - return it without calling `fetcher`
  /// 2. Request for `key` already in flight - wait for that one
  /// 3. Otherwise start a request, retrying reads per the retry policy
  ///
  /// Only successful results are stored, and only if `key` was not
  /// invalidated while the request was in flight.
  pub async fn fetch_query<F, Fut>(
    &self,
    key: &str,
    fetcher: F,
  ) -> Result<CacheResult<Value>, Arc<ApiError>>
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ApiError>> + Send + 'static,
  {
    // Storage may block on disk; keep it out of the key lock
    if let Some(entry) = self.get_cached(key) {
      if self.is_fresh(&entry) {
        debug!(key, "cache hit");
        return Ok(CacheResult::from_cache(entry.value, entry.cached_at));
      }
    }

    let (fetch, generation, joined) = {
      let mut keys = self.lock_keys();
      let state = keys.entry(key.to_string()).or_default();
      match &state.in_flight {
        Some(fetch) => {
          debug!(key, "joining in-flight request");
          (fetch.clone(), state.generation, true)
        }
        None => {
          debug!(key, "cache miss, fetching");
          let fetch = fetch_with_retry(self.retry, fetcher).boxed().shared();
          state.in_flight = Some(fetch.clone());
          (fetch, state.generation, false)
        }
      }
    };

    let result = fetch.clone().await;
    self.finish_fetch(key, generation, &fetch, &result);

    result.map(|data| {
      if joined {
        CacheResult::from_shared(data)
      } else {
        CacheResult::from_network(data)
      }
    })
  }

  /// Record the outcome of an in-flight request. Every waiter calls this;
  /// only the first one to see its own request still registered acts.
  fn finish_fetch(&self, key: &str, generation: u64, fetch: &SharedFetch, result: &FetchResult) {
    let mut keys = self.lock_keys();
    let Some(state) = keys.get_mut(key) else {
      return;
    };

    let is_current = state
      .in_flight
      .as_ref()
      .is_some_and(|current| current.ptr_eq(fetch));
    if !is_current {
      return;
    }
    state.in_flight = None;

    if state.generation != generation {
      debug!(key, "discarding result fetched before invalidation");
      return;
    }
    if let Ok(value) = result {
      self.set_cached(key, value);
    }
  }

  /// Mark `key` stale so the next read refetches.
  ///
  /// Detaches any in-flight request for the key, so reads that start after
  /// this call never join a request that began before it.
  pub fn invalidate(&self, key: &str) {
    {
      let mut keys = self.lock_keys();
      let state = keys.entry(key.to_string()).or_default();
      state.generation += 1;
      state.in_flight = None;

      if let Err(e) = self.storage.invalidate(key) {
        warn!(key, error = %e, "failed to mark cache entry stale");
      }
    }

    debug!(key, "invalidated");
    // No subscribers is fine
    let _ = self.events.send(Invalidation {
      key: key.to_string(),
    });
  }
}

impl Clone for QueryClient {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      keys: Arc::clone(&self.keys),
      events: self.events.clone(),
      stale_time: self.stale_time,
      retry: self.retry,
    }
  }
}

impl std::fmt::Debug for QueryClient {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QueryClient")
      .field("stale_time", &self.stale_time)
      .field("retry", &self.retry)
      .finish_non_exhaustive()
  }
}

async fn fetch_with_retry<F, Fut>(policy: RetryPolicy, fetcher: F) -> FetchResult
where
  F: Fn() -> Fut + Send + Sync,
  Fut: Future<Output = Result<Value, ApiError>> + Send,
{
  let mut attempt = 0;
  loop {
    match fetcher().await {
      Ok(value) => return Ok(value),
      Err(e) if attempt < policy.max_retries => {
        attempt += 1;
        warn!(error = %e, attempt, "read failed, retrying");
        tokio::time::sleep(policy.backoff).await;
      }
      Err(e) => return Err(Arc::new(e)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, NoopStorage};
  use serde_json::json;
  use std::sync::atomic::{AtomicUsize, Ordering};

  const KEY: &str = "/api/communications";

  fn counting_fetcher(
    calls: Arc<AtomicUsize>,
    value: Value,
    delay: Duration,
  ) -> impl Fn() -> BoxFuture<'static, Result<Value, ApiError>> + Send + Sync + 'static {
    move || {
      let calls = Arc::clone(&calls);
      let value = value.clone();
      async move {
        calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(delay).await;
        Ok(value)
      }
      .boxed()
    }
  }

  fn server_error() -> ApiError {
    ApiError::Status {
      status: 500,
      message: "boom".to_string(),
    }
  }

  #[tokio::test]
  async fn test_second_read_is_served_from_cache() {
    let client = QueryClient::new(MemoryStorage::new());
    let calls = Arc::new(AtomicUsize::new(0));

    let first = client
      .fetch_query(KEY, counting_fetcher(calls.clone(), json!([]), Duration::ZERO))
      .await
      .unwrap();
    assert_eq!(first.source, CacheSource::Network);

    let second = client
      .fetch_query(KEY, counting_fetcher(calls.clone(), json!([]), Duration::ZERO))
      .await
      .unwrap();
    assert_eq!(second.source, CacheSource::Cache);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_concurrent_reads_share_one_request() {
    let client = QueryClient::new(MemoryStorage::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher = || counting_fetcher(calls.clone(), json!([1, 2]), Duration::from_millis(50));

    let (a, b, c) = tokio::join!(
      client.fetch_query(KEY, fetcher()),
      client.fetch_query(KEY, fetcher()),
      client.fetch_query(KEY, fetcher()),
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in [a, b, c] {
      assert_eq!(result.unwrap().data, json!([1, 2]));
    }
  }

  #[tokio::test]
  async fn test_concurrent_readers_share_failure() {
    let client = QueryClient::new(MemoryStorage::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher = || {
      let calls = calls.clone();
      move || {
        let calls = calls.clone();
        async move {
          calls.fetch_add(1, Ordering::SeqCst);
          tokio::time::sleep(Duration::from_millis(20)).await;
          Err::<Value, _>(server_error())
        }
      }
    };

    let (a, b) = tokio::join!(
      client.fetch_query(KEY, fetcher()),
      client.fetch_query(KEY, fetcher())
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(a.unwrap_err().status(), Some(500));
    assert_eq!(b.unwrap_err().status(), Some(500));
    // Failures are not cached
    assert!(client.get_cached(KEY).is_none());
  }

  #[tokio::test]
  async fn test_invalidate_forces_refetch() {
    let client = QueryClient::new(MemoryStorage::new());
    let calls = Arc::new(AtomicUsize::new(0));

    client
      .fetch_query(KEY, counting_fetcher(calls.clone(), json!([]), Duration::ZERO))
      .await
      .unwrap();
    client.invalidate(KEY);
    assert!(client.get_cached(KEY).unwrap().invalidated);

    let result = client
      .fetch_query(KEY, counting_fetcher(calls.clone(), json!([1]), Duration::ZERO))
      .await
      .unwrap();
    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data, json!([1]));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(!client.get_cached(KEY).unwrap().invalidated);
  }

  #[tokio::test]
  async fn test_invalidate_broadcasts_event() {
    let client = QueryClient::new(MemoryStorage::new());
    let mut events = client.subscribe();

    client.invalidate(KEY);

    assert_eq!(
      events.try_recv().unwrap(),
      Invalidation {
        key: KEY.to_string()
      }
    );
    assert!(events.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_read_after_invalidation_does_not_join_older_request() {
    let client = QueryClient::new(MemoryStorage::new());
    let calls = Arc::new(AtomicUsize::new(0));

    let slow = {
      let client = client.clone();
      let fetcher = counting_fetcher(calls.clone(), json!(["old"]), Duration::from_millis(80));
      tokio::spawn(async move { client.fetch_query(KEY, fetcher).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    client.invalidate(KEY);
    let fresh = client
      .fetch_query(KEY, counting_fetcher(calls.clone(), json!(["new"]), Duration::ZERO))
      .await
      .unwrap();
    assert_eq!(fresh.data, json!(["new"]));

    // The older request still resolves for its own caller...
    assert_eq!(slow.await.unwrap().unwrap().data, json!(["old"]));
    // ...but does not overwrite the newer cached value
    assert_eq!(client.get_cached(KEY).unwrap().value, json!(["new"]));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_stale_time_expires_entries() {
    let client = QueryClient::new(MemoryStorage::new()).with_stale_time(Some(Duration::ZERO));
    let calls = Arc::new(AtomicUsize::new(0));

    client
      .fetch_query(KEY, counting_fetcher(calls.clone(), json!([]), Duration::ZERO))
      .await
      .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    client
      .fetch_query(KEY, counting_fetcher(calls.clone(), json!([]), Duration::ZERO))
      .await
      .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_retry_policy_retries_reads() {
    let client = QueryClient::new(MemoryStorage::new()).with_retry(RetryPolicy {
      max_retries: 2,
      backoff: Duration::from_millis(1),
    });
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let result = client
      .fetch_query(KEY, move || {
        let counter = counter.clone();
        async move {
          if counter.fetch_add(1, Ordering::SeqCst) < 2 {
            Err(server_error())
          } else {
            Ok(json!(["ok"]))
          }
        }
      })
      .await
      .unwrap();

    assert_eq!(result.data, json!(["ok"]));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn test_default_policy_does_not_retry() {
    let client = QueryClient::new(MemoryStorage::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let result = client
      .fetch_query(KEY, move || {
        let counter = counter.clone();
        async move {
          counter.fetch_add(1, Ordering::SeqCst);
          Err::<Value, _>(server_error())
        }
      })
      .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_noop_storage_always_fetches() {
    let client = QueryClient::new(NoopStorage);
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
      client
        .fetch_query(KEY, counting_fetcher(calls.clone(), json!([]), Duration::ZERO))
        .await
        .unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[test]
  fn test_global_client_is_shared() {
    let a = QueryClient::global();
    let b = QueryClient::global();
    let key = "/api/global-test";

    a.set_cached(key, &json!([42]));
    assert_eq!(b.get_cached(key).unwrap().value, json!([42]));
  }
}
