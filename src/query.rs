//! Observed queries: the consumer-facing side of the cache.
//!
//! Inspired by TanStack Query, a `Query<T>` binds a cache key, a fetcher
//! and a freshness policy. It reads through the shared [`QueryClient`], so
//! two queries with the same key share data and in-flight requests.
//!
//! # Example
//!
//! ```ignore
//! let crm = crm.clone();
//! let mut query = Query::new(client, keys::stats(), options, move || {
//!     let crm = crm.clone();
//!     async move { crm.api().dashboard().stats().await }
//! });
//!
//! // Start fetching
//! query.fetch();
//!
//! // In event loop tick
//! query.tick();
//! if query.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! // In render
//! match query.state() {
//!     QueryState::Loading => render_spinner(),
//!     QueryState::Success(data) => render_data(data),
//!     QueryState::Error { error, data } => render_error(error, data.as_ref()),
//!     QueryState::Idle => {}
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use crate::cache::{CacheEvent, Cacheable, QueryClient, QueryKey, QueryOptions};
use crate::error::{ApiError, ApiResult};

/// The state of a query
#[derive(Debug, Clone, PartialEq)]
pub enum QueryState<T> {
  /// Query has not been started (or is disabled)
  Idle,
  /// First fetch in progress, nothing to show yet
  Loading,
  /// Data is available (a background refetch may be running)
  Success(T),
  /// The last fetch failed; `data` is the last known value, if any
  Error { error: ApiError, data: Option<T> },
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error { .. })
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Success(data) => Some(data),
      QueryState::Error { data, .. } => data.as_ref(),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&ApiError> {
    match self {
      QueryState::Error { error, .. } => Some(error),
      _ => None,
    }
  }
}

/// A boxed future that returns an ApiResult<T>
type BoxFuture<T> = Pin<Box<dyn Future<Output = ApiResult<T>> + Send>>;

/// A factory function that creates futures for fetching data
type FetcherFn<T> = Box<dyn Fn() -> BoxFuture<T> + Send + Sync>;

/// Observed, cache-backed query.
///
/// Query<T> encapsulates:
/// - The fetching logic (via a closure)
/// - Loading/success/error states, keeping the last value across refetches
/// - Async result handling via channels
/// - Polling (`refetch_interval`) and refetch-on-invalidation via `tick()`
/// - The `enabled` gate: a disabled query never touches the network
pub struct Query<T> {
  client: QueryClient,
  key: QueryKey,
  options: QueryOptions,
  state: QueryState<T>,
  fetcher: FetcherFn<T>,
  receiver: Option<mpsc::UnboundedReceiver<ApiResult<T>>>,
  events: broadcast::Receiver<CacheEvent>,
  last_fetch: Option<Instant>,
}

impl<T: Cacheable> Query<T> {
  /// Create a query observing `key`. Data already in the cache is exposed
  /// immediately.
  pub fn new<F, Fut>(client: QueryClient, key: QueryKey, options: QueryOptions, fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ApiResult<T>> + Send + 'static,
  {
    client.add_observer(&key);
    let events = client.subscribe();
    let state = if options.enabled {
      client
        .get_query_data::<T>(&key)
        .map(QueryState::Success)
        .unwrap_or(QueryState::Idle)
    } else {
      QueryState::Idle
    };

    Self {
      client,
      key,
      options,
      state,
      fetcher: Box::new(move || Box::pin(fetcher())),
      receiver: None,
      events,
      last_fetch: None,
    }
  }

  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  pub fn options(&self) -> &QueryOptions {
    &self.options
  }

  /// Get the current state of the query.
  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  /// Get the last known data.
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

  pub fn error(&self) -> Option<&ApiError> {
    self.state.error()
  }

  /// Whether a request for this query is in flight.
  pub fn is_fetching(&self) -> bool {
    self.receiver.is_some()
  }

  pub fn is_enabled(&self) -> bool {
    self.options.enabled
  }

  /// Whether cached data is older than the stale time or invalidated.
  pub fn is_stale(&self) -> bool {
    self.client.is_stale(&self.key, self.options.stale_time)
  }

  /// Start fetching if enabled and not already fetching. Fresh cached
  /// data is used without a request.
  pub fn fetch(&mut self) {
    if !self.options.enabled || self.receiver.is_some() {
      return;
    }
    self.start_fetch(false);
  }

  /// Fetch even if cached data is fresh.
  pub fn refetch(&mut self) {
    if !self.options.enabled {
      return;
    }
    // Drop interest in any pending result
    self.receiver = None;
    self.start_fetch(true);
  }

  /// Turn the enabled gate on or off. Disabling abandons a pending result
  /// without aborting the request.
  pub fn set_enabled(&mut self, enabled: bool) {
    self.options.enabled = enabled;
    if !enabled {
      self.receiver = None;
      if self.state.is_loading() {
        self.state = QueryState::Idle;
      }
    }
  }

  /// Refetch when the polling interval has elapsed, the cache entry was
  /// invalidated or the shown data outlived `stale_time`, and start the
  /// first fetch of an idle query. Stale data is retried at most once per
  /// `stale_time`. Returns true if a fetch was started.
  pub fn tick(&mut self) -> bool {
    if !self.options.enabled || self.receiver.is_some() {
      return false;
    }

    let interval_elapsed = match (self.options.refetch_interval, self.last_fetch) {
      (Some(interval), Some(last)) => last.elapsed() >= interval,
      _ => false,
    };
    let stale = self.state.data().is_some()
      && self
        .last_fetch
        .map_or(true, |last| last.elapsed() >= self.options.stale_time)
      && self.is_stale();

    if interval_elapsed || stale || self.client.is_invalidated(&self.key) {
      self.start_fetch(true);
      return true;
    }
    if matches!(self.state, QueryState::Idle) {
      self.start_fetch(false);
      return true;
    }
    false
  }

  /// Poll for results from a pending fetch and for writes made to the
  /// cache by others.
  ///
  /// Returns `true` if the state changed.
  /// Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    let mut changed = self.poll_events();

    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return changed,
    };

    match receiver.try_recv() {
      Ok(Ok(data)) => {
        self.state = QueryState::Success(data);
        self.receiver = None;
        changed = true;
      }
      Ok(Err(error)) => {
        let data = self.state.data().cloned();
        self.state = QueryState::Error { error, data };
        self.receiver = None;
        changed = true;
      }
      Err(mpsc::error::TryRecvError::Empty) => {}
      Err(mpsc::error::TryRecvError::Disconnected) => {
        // Sender dropped without sending - treat as error
        let data = self.state.data().cloned();
        self.state = QueryState::Error {
          error: ApiError::Cancelled,
          data,
        };
        self.receiver = None;
        changed = true;
      }
    }
    changed
  }

  /// Pick up write-through updates to this key while no fetch is pending.
  fn poll_events(&mut self) -> bool {
    let mut updated = false;
    loop {
      match self.events.try_recv() {
        Ok(CacheEvent::Updated(key)) if key == self.key => updated = true,
        Ok(_) => {}
        Err(broadcast::error::TryRecvError::Lagged(_)) => updated = true,
        Err(_) => break,
      }
    }

    if !updated || self.receiver.is_some() || !self.options.enabled {
      return false;
    }
    let data = match self.client.get_query_data::<T>(&self.key) {
      Some(data) => data,
      None => return false,
    };
    if self.state.data().map(serde_json::to_value).and_then(Result::ok)
      == serde_json::to_value(&data).ok()
    {
      return false;
    }
    self.state = QueryState::Success(data);
    true
  }

  /// Internal: start the fetch operation
  fn start_fetch(&mut self, force: bool) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.last_fetch = Some(Instant::now());
    if self.state.data().is_none() {
      self.state = QueryState::Loading;
    }

    let client = self.client.clone();
    let key = self.key.clone();
    let stale_time = self.options.stale_time;
    // Not polled unless the cache decides to fetch
    let future = (self.fetcher)();
    tokio::spawn(async move {
      let result = if force {
        client.refetch_query(&key, move || future).await
      } else {
        client.fetch_query(&key, stale_time, move || future).await
      };
      // Ignore send errors - receiver may have been dropped
      let _ = tx.send(result);
    });
  }
}

impl<T> Drop for Query<T> {
  fn drop(&mut self) {
    self.client.remove_observer(&self.key);
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("key", &self.key)
      .field("state", &self.state)
      .field("options", &self.options)
      .field("last_fetch", &self.last_fetch)
      .finish_non_exhaustive()
  }
}
