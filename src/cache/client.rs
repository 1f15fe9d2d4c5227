//! Process-scoped query cache with deduplicated fetching, staleness
//! tracking and prefix invalidation.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::key::QueryKey;
use super::options::{CacheConfig, QueryOptions};
use super::storage::{CacheStorage, NoopStorage, PersistedQuery};
use super::traits::{CacheEvent, Cacheable, FetchStatus, QuerySnapshot};
use crate::error::{ApiError, ApiResult};

type SharedFetch = Shared<BoxFuture<'static, ApiResult<Value>>>;

struct Entry {
  data: Option<Value>,
  data_updated_at: Option<Instant>,
  data_updated_wall: Option<DateTime<Utc>>,
  status: FetchStatus,
  error: Option<ApiError>,
  invalidated: bool,
  /// Bumped on every invalidation so a fetch can tell whether one
  /// happened while it was in flight
  invalidations: u64,
  in_flight: Option<(u64, SharedFetch)>,
  observers: usize,
  last_accessed: Instant,
}

impl Entry {
  fn new() -> Self {
    Self {
      data: None,
      data_updated_at: None,
      data_updated_wall: None,
      status: FetchStatus::Idle,
      error: None,
      invalidated: false,
      invalidations: 0,
      in_flight: None,
      observers: 0,
      last_accessed: Instant::now(),
    }
  }

  fn is_stale(&self, stale_time: Duration) -> bool {
    match self.data_updated_at {
      Some(updated) => self.invalidated || updated.elapsed() >= stale_time,
      None => true,
    }
  }

  fn write(&mut self, data: Value) -> DateTime<Utc> {
    let wall = Utc::now();
    self.data = Some(data);
    self.data_updated_at = Some(Instant::now());
    self.data_updated_wall = Some(wall);
    self.invalidated = false;
    self.error = None;
    if self.in_flight.is_none() {
      self.status = FetchStatus::Idle;
    }
    wall
  }
}

struct Inner {
  entries: Mutex<HashMap<QueryKey, Entry>>,
  config: CacheConfig,
  storage: Arc<dyn CacheStorage>,
  events: broadcast::Sender<CacheEvent>,
  fetch_seq: AtomicU64,
}

impl Inner {
  fn emit(&self, event: CacheEvent) {
    // No subscribers is fine
    let _ = self.events.send(event);
  }

  fn persist(&self, key: &QueryKey, data: Value, updated_at: DateTime<Utc>) {
    let query = PersistedQuery {
      key: key.clone(),
      data,
      updated_at,
    };
    if let Err(e) = self.storage.save(&query) {
      warn!(key = %key, error = %e, "failed to persist query result");
    }
  }

  fn complete_fetch(&self, key: &QueryKey, fetch_id: u64, started_at: u64, result: &ApiResult<Value>) {
    let mut entries = self.entries.lock();
    let Some(entry) = entries.get_mut(key) else {
      debug!(key = %key, "dropping result for removed query");
      return;
    };
    if !matches!(entry.in_flight, Some((id, _)) if id == fetch_id) {
      debug!(key = %key, "dropping superseded fetch result");
      return;
    }
    entry.in_flight = None;

    match result {
      Ok(data) => {
        let wall = entry.write(data.clone());
        entry.invalidated = entry.invalidations != started_at;
        drop(entries);
        debug!(key = %key, "query fetched");
        self.persist(key, data.clone(), wall);
        self.emit(CacheEvent::Updated(key.clone()));
      }
      Err(e) => {
        entry.status = FetchStatus::Error;
        entry.error = Some(e.clone());
        warn!(key = %key, error = %e, "query fetch failed");
      }
    }
  }
}

fn decode<T: Cacheable>(value: Value) -> ApiResult<T> {
  serde_json::from_value(value).map_err(ApiError::from)
}

/// Query cache shared by every consumer in the process.
///
/// Construct one at startup and pass clones around; clones share state.
#[derive(Clone)]
pub struct QueryClient {
  inner: Arc<Inner>,
}

impl QueryClient {
  /// Create an in-memory client.
  pub fn new(config: CacheConfig) -> Self {
    Self::with_storage(config, Arc::new(NoopStorage))
  }

  /// Create a client whose successful results are also written to `storage`.
  pub fn with_storage(config: CacheConfig, storage: Arc<dyn CacheStorage>) -> Self {
    let (events, _) = broadcast::channel(256);
    Self {
      inner: Arc::new(Inner {
        entries: Mutex::new(HashMap::new()),
        config,
        storage,
        events,
        fetch_seq: AtomicU64::new(0),
      }),
    }
  }

  pub fn config(&self) -> &CacheConfig {
    &self.inner.config
  }

  /// Options carrying the client's default stale time.
  pub fn default_options(&self) -> QueryOptions {
    QueryOptions::default().stale_time(self.inner.config.stale_time)
  }

  /// Restore persisted results. Restored entries keep their original
  /// timestamps, so old data comes back stale.
  pub fn hydrate(&self) -> usize {
    let persisted = match self.inner.storage.load(self.inner.config.max_persisted_age) {
      Ok(persisted) => persisted,
      Err(e) => {
        warn!(error = %e, "failed to load persisted cache");
        return 0;
      }
    };

    let now = Utc::now();
    let mut entries = self.inner.entries.lock();
    let mut restored = 0;
    for query in persisted {
      let age = (now - query.updated_at).to_std().unwrap_or_default();
      let entry = entries.entry(query.key).or_insert_with(Entry::new);
      if entry.data.is_some() {
        continue;
      }
      entry.data = Some(query.data);
      entry.data_updated_wall = Some(query.updated_at);
      match Instant::now().checked_sub(age) {
        Some(at) => entry.data_updated_at = Some(at),
        None => {
          entry.data_updated_at = Some(Instant::now());
          entry.invalidated = true;
        }
      }
      restored += 1;
    }
    debug!(restored, "hydrated query cache");
    restored
  }

  /// Receive cache change events.
  pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
    self.inner.events.subscribe()
  }

  /// Return cached data if fresh, otherwise fetch it.
  ///
  /// Concurrent calls for the same key share one in-flight request.
  pub async fn fetch_query<T, F, Fut>(
    &self,
    key: &QueryKey,
    stale_time: Duration,
    fetcher: F,
  ) -> ApiResult<T>
  where
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = ApiResult<T>> + Send + 'static,
  {
    {
      let mut entries = self.inner.entries.lock();
      if let Some(entry) = entries.get_mut(key) {
        entry.last_accessed = Instant::now();
        if !entry.is_stale(stale_time) {
          if let Some(data) = &entry.data {
            debug!(key = %key, "cache hit");
            return decode(data.clone());
          }
        }
      }
    }

    let fetch = self.start_or_join(key, fetcher);
    decode(fetch.await?)
  }

  /// Fetch regardless of freshness, still sharing any in-flight request.
  pub async fn refetch_query<T, F, Fut>(&self, key: &QueryKey, fetcher: F) -> ApiResult<T>
  where
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = ApiResult<T>> + Send + 'static,
  {
    let fetch = self.start_or_join(key, fetcher);
    decode(fetch.await?)
  }

  fn start_or_join<T, F, Fut>(&self, key: &QueryKey, fetcher: F) -> SharedFetch
  where
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = ApiResult<T>> + Send + 'static,
  {
    let mut entries = self.inner.entries.lock();
    let entry = entries.entry(key.clone()).or_insert_with(Entry::new);
    entry.last_accessed = Instant::now();

    if let Some((_, in_flight)) = &entry.in_flight {
      debug!(key = %key, "joining in-flight fetch");
      return in_flight.clone();
    }

    let fetch_id = self.inner.fetch_seq.fetch_add(1, Ordering::Relaxed);
    let started_at = entry.invalidations;
    entry.status = FetchStatus::Loading;

    let request = fetcher();
    let inner = Arc::clone(&self.inner);
    let task_key = key.clone();
    // The request runs on its own task so abandoning the caller never
    // aborts it mid-flight
    let handle: JoinHandle<ApiResult<Value>> = tokio::spawn(async move {
      let result = request
        .await
        .and_then(|data| serde_json::to_value(data).map_err(ApiError::from));
      inner.complete_fetch(&task_key, fetch_id, started_at, &result);
      result
    });

    let shared = async move { handle.await.unwrap_or(Err(ApiError::Cancelled)) }
      .boxed()
      .shared();
    entry.in_flight = Some((fetch_id, shared.clone()));
    shared
  }

  /// Cached data for `key`, fresh or not.
  pub fn get_query_data<T: Cacheable>(&self, key: &QueryKey) -> Option<T> {
    let entries = self.inner.entries.lock();
    let data = entries.get(key)?.data.clone()?;
    decode(data).ok()
  }

  /// Write data straight into the cache (write-through). The entry
  /// becomes fresh.
  pub fn set_query_data<T: Serialize + ?Sized>(&self, key: &QueryKey, data: &T) {
    let value = match serde_json::to_value(data) {
      Ok(value) => value,
      Err(e) => {
        warn!(key = %key, error = %e, "cannot cache unserializable value");
        return;
      }
    };

    let wall = {
      let mut entries = self.inner.entries.lock();
      let entry = entries.entry(key.clone()).or_insert_with(Entry::new);
      entry.last_accessed = Instant::now();
      entry.write(value.clone())
    };
    debug!(key = %key, "query data written");
    self.inner.persist(key, value, wall);
    self.inner.emit(CacheEvent::Updated(key.clone()));
  }

  /// Transform the cached data for `key`. Returns false when there was
  /// nothing of type `T` to update.
  pub fn update_query_data<T, F>(&self, key: &QueryKey, update: F) -> bool
  where
    T: Cacheable,
    F: FnOnce(T) -> T,
  {
    match self.get_query_data::<T>(key) {
      Some(current) => {
        self.set_query_data(key, &update(current));
        true
      }
      None => false,
    }
  }

  /// Transform every cached value of type `T` under `prefix`. Entries
  /// holding a different shape are left alone. Returns how many changed.
  pub fn update_queries_data<T, F>(&self, prefix: &QueryKey, mut update: F) -> usize
  where
    T: Cacheable,
    F: FnMut(T) -> T,
  {
    let current: Vec<(QueryKey, T)> = {
      let entries = self.inner.entries.lock();
      entries
        .iter()
        .filter(|(key, _)| key.starts_with(prefix))
        .filter_map(|(key, entry)| {
          let data = entry.data.clone()?;
          decode::<T>(data).ok().map(|value| (key.clone(), value))
        })
        .collect()
    };

    let updated = current.len();
    for (key, value) in current {
      self.set_query_data(&key, &update(value));
    }
    updated
  }

  /// Mark every entry under `prefix` stale. Returns how many matched.
  pub fn invalidate_queries(&self, prefix: &QueryKey) -> usize {
    let matched = {
      let mut entries = self.inner.entries.lock();
      let mut matched = 0;
      for (key, entry) in entries.iter_mut() {
        if key.starts_with(prefix) {
          entry.invalidated = true;
          entry.invalidations += 1;
          matched += 1;
        }
      }
      matched
    };

    debug!(prefix = %prefix, matched, "invalidated queries");
    self.inner.emit(CacheEvent::Invalidated {
      prefix: prefix.clone(),
      matched,
    });
    matched
  }

  /// Drop every entry under `prefix`, in memory and in storage. Results of
  /// fetches still in flight for those keys are discarded.
  pub fn remove_queries(&self, prefix: &QueryKey) -> usize {
    let removed: Vec<QueryKey> = {
      let mut entries = self.inner.entries.lock();
      let keys: Vec<QueryKey> = entries
        .keys()
        .filter(|key| key.starts_with(prefix))
        .cloned()
        .collect();
      for key in &keys {
        entries.remove(key);
      }
      keys
    };

    for key in &removed {
      if let Err(e) = self.inner.storage.remove(key) {
        warn!(key = %key, error = %e, "failed to remove persisted query");
      }
    }
    self.inner.emit(CacheEvent::Removed {
      prefix: prefix.clone(),
      removed: removed.len(),
    });
    removed.len()
  }

  /// Drop everything, including persisted results.
  pub fn clear(&self) {
    self.inner.entries.lock().clear();
    if let Err(e) = self.inner.storage.clear() {
      warn!(error = %e, "failed to clear persisted cache");
    }
  }

  /// Whether `key` would be refetched on its next read. Missing entries
  /// count as stale.
  pub fn is_stale(&self, key: &QueryKey, stale_time: Duration) -> bool {
    self
      .inner
      .entries
      .lock()
      .get(key)
      .map(|entry| entry.is_stale(stale_time))
      .unwrap_or(true)
  }

  pub fn is_invalidated(&self, key: &QueryKey) -> bool {
    self
      .inner
      .entries
      .lock()
      .get(key)
      .map(|entry| entry.invalidated)
      .unwrap_or(false)
  }

  pub fn snapshot(&self, key: &QueryKey) -> Option<QuerySnapshot> {
    let entries = self.inner.entries.lock();
    let entry = entries.get(key)?;
    Some(QuerySnapshot {
      status: entry.status,
      has_data: entry.data.is_some(),
      is_invalidated: entry.invalidated,
      error: entry.error.clone(),
      data_updated_at: entry.data_updated_wall,
      observers: entry.observers,
    })
  }

  /// Cached keys, sorted.
  pub fn keys(&self) -> Vec<QueryKey> {
    let mut keys: Vec<QueryKey> = self.inner.entries.lock().keys().cloned().collect();
    keys.sort();
    keys
  }

  pub fn len(&self) -> usize {
    self.inner.entries.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub(crate) fn add_observer(&self, key: &QueryKey) {
    let mut entries = self.inner.entries.lock();
    let entry = entries.entry(key.clone()).or_insert_with(Entry::new);
    entry.observers += 1;
    entry.last_accessed = Instant::now();
  }

  pub(crate) fn remove_observer(&self, key: &QueryKey) {
    let mut entries = self.inner.entries.lock();
    if let Some(entry) = entries.get_mut(key) {
      entry.observers = entry.observers.saturating_sub(1);
      entry.last_accessed = Instant::now();
    }
  }

  /// Drop unobserved, idle entries not accessed within `gc_time`.
  /// Persisted copies are kept.
  pub fn garbage_collect(&self) -> usize {
    let gc_time = self.inner.config.gc_time;
    let mut entries = self.inner.entries.lock();
    let before = entries.len();
    entries.retain(|_, entry| {
      entry.observers > 0 || entry.in_flight.is_some() || entry.last_accessed.elapsed() < gc_time
    });
    let collected = before - entries.len();
    if collected > 0 {
      debug!(collected, "garbage collected queries");
    }
    collected
  }

  /// Run [`garbage_collect`](Self::garbage_collect) every `every` until the
  /// last client handle is dropped.
  pub fn spawn_gc(&self, every: Duration) -> JoinHandle<()> {
    let weak: Weak<Inner> = Arc::downgrade(&self.inner);
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(every);
      interval.tick().await;
      loop {
        interval.tick().await;
        match weak.upgrade() {
          Some(inner) => {
            QueryClient { inner }.garbage_collect();
          }
          None => break,
        }
      }
    })
  }
}
