//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

use super::key::QueryKey;
use crate::error::ApiError;

/// Values that can live in the query cache.
///
/// Entries are held as JSON so one cache serves every record type and can
/// be persisted as-is.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> Cacheable for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// Network state of a cache entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FetchStatus {
  /// No request in flight
  #[default]
  Idle,
  /// A request is in flight
  Loading,
  /// The last request failed; any previous data is kept
  Error,
}

/// Point-in-time view of one cache entry.
#[derive(Debug, Clone)]
pub struct QuerySnapshot {
  pub status: FetchStatus,
  pub has_data: bool,
  pub is_invalidated: bool,
  pub error: Option<ApiError>,
  /// Wall-clock time of the last successful fetch or write
  pub data_updated_at: Option<DateTime<Utc>>,
  pub observers: usize,
}

/// Change notifications broadcast by the query client.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
  /// New data landed for a key (fetch or write-through)
  Updated(QueryKey),
  /// Entries under `prefix` were marked stale
  Invalidated { prefix: QueryKey, matched: usize },
  /// Entries under `prefix` were dropped
  Removed { prefix: QueryKey, removed: usize },
}
