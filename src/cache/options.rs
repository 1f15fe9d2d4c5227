use std::time::Duration;

/// Client-wide cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
  /// Default time before fetched data is considered stale
  pub stale_time: Duration,
  /// Inactivity window after which unobserved entries are dropped
  pub gc_time: Duration,
  /// Persisted entries older than this are not restored
  pub max_persisted_age: Duration,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_time: Duration::from_secs(60),
      gc_time: Duration::from_secs(5 * 60),
      max_persisted_age: Duration::from_secs(24 * 60 * 60),
    }
  }
}

/// Per-query freshness and polling policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
  /// A disabled query never fetches
  pub enabled: bool,
  pub stale_time: Duration,
  /// Background refetch period while the query is observed
  pub refetch_interval: Option<Duration>,
}

impl Default for QueryOptions {
  fn default() -> Self {
    Self {
      enabled: true,
      stale_time: CacheConfig::default().stale_time,
      refetch_interval: None,
    }
  }
}

impl QueryOptions {
  pub fn enabled(mut self, enabled: bool) -> Self {
    self.enabled = enabled;
    self
  }

  pub fn stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  pub fn refetch_interval(mut self, interval: Duration) -> Self {
    self.refetch_interval = Some(interval);
    self
  }
}
