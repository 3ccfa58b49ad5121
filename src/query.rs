//! Observable query and mutation state for UI layers.
//!
//! Inspired by TanStack Query, this module provides a `Query<T>` type that
//! encapsulates async data fetching, loading states and error handling, and
//! refetches on its own when its cache key is invalidated.
//!
//! # Example
//!
//! ```ignore
//! let mut query = communications.query();
//!
//! // Start fetching
//! query.fetch();
//!
//! // In event loop tick
//! if query.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! // In render
//! match query.state() {
//!     QueryState::Loading => render_spinner(),
//!     QueryState::Success(data) => render_data(data),
//!     QueryState::Error(e) => render_error(e),
//!     QueryState::Idle => {}
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};

use crate::cache::{Invalidation, QueryClient};

/// Lifecycle of a [`Query`]: `Idle` until the first fetch, `Loading` while a
/// request is outstanding, then the last outcome.
///
/// A refetch after invalidation goes back through `Loading`, so a view never
/// shows a list that predates the write.
#[derive(Debug, Clone)]
pub enum QueryState<T> {
  Idle,
  Loading,
  Success(T),
  Error(String),
}

impl<T> Default for QueryState<T> {
  fn default() -> Self {
    Self::Idle
  }
}

impl<T> QueryState<T> {
  pub fn is_idle(&self) -> bool {
    matches!(self, Self::Idle)
  }

  pub fn is_loading(&self) -> bool {
    matches!(self, Self::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, Self::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, Self::Error(_))
  }

  /// Whether the latest fetch has resolved, either way.
  pub fn is_settled(&self) -> bool {
    self.is_success() || self.is_error()
  }

  pub fn data(&self) -> Option<&T> {
    if let Self::Success(data) = self {
      Some(data)
    } else {
      None
    }
  }

  pub fn error(&self) -> Option<&str> {
    if let Self::Error(message) = self {
      Some(message.as_str())
    } else {
      None
    }
  }
}

/// A boxed future that returns a Result<T, String>
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T, String>> + Send>>;

/// A factory function that creates futures for fetching data
type FetcherFn<T> = Box<dyn Fn() -> BoxFuture<T> + Send + Sync>;

/// Async query for data fetching with state management.
///
/// Query<T> encapsulates:
/// - The fetching logic (via a closure)
/// - Loading/success/error states
/// - Async result handling via channels
/// - Automatic refetch when its key is invalidated
pub struct Query<T> {
  key: String,
  state: QueryState<T>,
  fetcher: FetcherFn<T>,
  receiver: Option<mpsc::UnboundedReceiver<Result<T, String>>>,
  invalidations: broadcast::Receiver<Invalidation>,
  fetched_at: Option<Instant>,
}

impl<T: Send + 'static> Query<T> {
  /// Create a new query observing `key` on `client`.
  ///
  /// The fetcher is a closure that returns a future. It will be called
  /// each time `fetch()` or `refetch()` is invoked, and after `key` is
  /// invalidated.
  pub fn new<F, Fut>(client: &QueryClient, key: impl Into<String>, fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, String>> + Send + 'static,
  {
    Self {
      key: key.into(),
      state: QueryState::default(),
      fetcher: Box::new(move || -> BoxFuture<T> { Box::pin(fetcher()) }),
      receiver: None,
      invalidations: client.subscribe(),
      fetched_at: None,
    }
  }

  pub fn key(&self) -> &str {
    &self.key
  }

  /// Get the current state of the query.
  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  /// Get the data if the query succeeded.
  pub fn data(&self) -> Option<&T> {
    self.state.data()
  }

  pub fn is_loading(&self) -> bool {
    self.state.is_loading()
  }

  pub fn is_success(&self) -> bool {
    self.state.is_success()
  }

  pub fn is_error(&self) -> bool {
    self.state.is_error()
  }

  /// Get the error message if the query failed.
  pub fn error(&self) -> Option<&str> {
    self.state.error()
  }

  /// When the current data arrived.
  pub fn fetched_at(&self) -> Option<Instant> {
    self.fetched_at
  }

  /// Start fetching data if not already loading.
  pub fn fetch(&mut self) {
    if self.state.is_loading() {
      return;
    }
    self.start_fetch();
  }

  /// Force a refetch, even if already loading or data exists.
  pub fn refetch(&mut self) {
    // Dropping the receiver discards the pending result
    self.receiver = None;
    self.start_fetch();
  }

  /// Poll for results and invalidations.
  ///
  /// Returns `true` if the state changed (data arrived, an error occurred,
  /// or an invalidation started a refetch). Call this in your event loop
  /// tick handler.
  pub fn poll(&mut self) -> bool {
    let mut changed = self.poll_result();

    if self.take_invalidation() && !self.state.is_idle() {
      self.refetch();
      changed = true;
    }

    changed
  }

  fn poll_result(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    match receiver.try_recv() {
      Ok(Ok(data)) => {
        self.state = QueryState::Success(data);
        self.fetched_at = Some(Instant::now());
        self.receiver = None;
        true
      }
      Ok(Err(error)) => {
        self.state = QueryState::Error(error);
        self.receiver = None;
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        // Sender dropped without sending - treat as error
        self.state = QueryState::Error("Query was cancelled".to_string());
        self.receiver = None;
        true
      }
    }
  }

  /// Drain pending invalidation events, reporting whether one hit our key.
  fn take_invalidation(&mut self) -> bool {
    let mut hit = false;
    loop {
      match self.invalidations.try_recv() {
        Ok(event) => hit |= event.key == self.key,
        // Missed events may have included ours
        Err(broadcast::error::TryRecvError::Lagged(_)) => hit = true,
        Err(broadcast::error::TryRecvError::Empty)
        | Err(broadcast::error::TryRecvError::Closed) => return hit,
      }
    }
  }

  fn start_fetch(&mut self) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.state = QueryState::Loading;

    let future = (self.fetcher)();
    tokio::spawn(async move {
      let result = future.await;
      // Ignore send errors - receiver may have been dropped
      let _ = tx.send(result);
    });
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("key", &self.key)
      .field("state", &self.state)
      .field("fetched_at", &self.fetched_at)
      .finish_non_exhaustive()
  }
}

/// The state of a mutation
#[derive(Debug, Clone)]
pub enum MutationState<T> {
  Idle,
  Pending,
  Success(T),
  Error(String),
}

impl<T> MutationState<T> {
  pub fn is_pending(&self) -> bool {
    matches!(self, MutationState::Pending)
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      MutationState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      MutationState::Error(e) => Some(e),
      _ => None,
    }
  }
}

type MutateFn<P, T> = Box<dyn Fn(P) -> BoxFuture<T> + Send + Sync>;

/// Observable write. Each `mutate` call runs once; there is no retry.
pub struct Mutation<P, T> {
  state: MutationState<T>,
  mutate: MutateFn<P, T>,
  receiver: Option<mpsc::UnboundedReceiver<Result<T, String>>>,
}

impl<P: 'static, T: Send + 'static> Mutation<P, T> {
  pub fn new<F, Fut>(mutate: F) -> Self
  where
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, String>> + Send + 'static,
  {
    Self {
      state: MutationState::Idle,
      mutate: Box::new(move |payload: P| -> BoxFuture<T> { Box::pin(mutate(payload)) }),
      receiver: None,
    }
  }

  pub fn state(&self) -> &MutationState<T> {
    &self.state
  }

  /// Start the write. A previous pending result is discarded.
  pub fn mutate(&mut self, payload: P) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.state = MutationState::Pending;

    let future = (self.mutate)(payload);
    tokio::spawn(async move {
      let _ = tx.send(future.await);
    });
  }

  /// Poll for the result. Returns `true` if the state changed.
  pub fn poll(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    match receiver.try_recv() {
      Ok(Ok(data)) => self.state = MutationState::Success(data),
      Ok(Err(error)) => self.state = MutationState::Error(error),
      Err(mpsc::error::TryRecvError::Empty) => return false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        self.state = MutationState::Error("Mutation was cancelled".to_string());
      }
    }
    self.receiver = None;
    true
  }

  /// Return to `Idle`, discarding any pending result.
  pub fn reset(&mut self) {
    self.receiver = None;
    self.state = MutationState::Idle;
  }
}
