//! Write operations and the cache effects they trigger on success.

use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

use super::client::QueryClient;
use super::key::QueryKey;
use super::traits::Cacheable;
use crate::error::{ApiError, ApiResult};
use crate::notify::{Notification, Notifier};

/// Lifecycle of a mutation: `Idle -> Pending -> Success | Error`.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationState<T> {
  Idle,
  Pending,
  Success(T),
  Error(ApiError),
}

impl<T> MutationState<T> {
  pub fn is_pending(&self) -> bool {
    matches!(self, MutationState::Pending)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, MutationState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, MutationState::Error(_))
  }
}

type Patch = Box<dyn FnOnce(&QueryClient) + Send>;

/// Cache effects of a successful mutation.
///
/// Write-through values land first, then in-place patches, then
/// invalidations, then the success notification.
#[derive(Default)]
pub struct Effects {
  writes: Vec<(QueryKey, Value)>,
  patches: Vec<Patch>,
  invalidate: Vec<QueryKey>,
  message: Option<String>,
}

impl std::fmt::Debug for Effects {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Effects")
      .field("writes", &self.writes)
      .field("patches", &self.patches.len())
      .field("invalidate", &self.invalidate)
      .field("message", &self.message)
      .finish()
  }
}

impl Effects {
  pub fn new() -> Self {
    Self::default()
  }

  /// Mark every entry under `prefix` stale.
  pub fn invalidate(mut self, prefix: QueryKey) -> Self {
    self.invalidate.push(prefix);
    self
  }

  /// Store `data` under `key` without a refetch.
  pub fn write<T: Serialize + ?Sized>(mut self, key: QueryKey, data: &T) -> Self {
    match serde_json::to_value(data) {
      Ok(value) => self.writes.push((key, value)),
      Err(e) => warn!(key = %key, error = %e, "skipping unserializable write-through"),
    }
    self
  }

  /// Transform every cached `T` under `prefix`. Entries of other shapes
  /// and keys that are not cached are left alone.
  pub fn patch<T, F>(mut self, prefix: QueryKey, update: F) -> Self
  where
    T: Cacheable,
    F: FnMut(T) -> T + Send + 'static,
  {
    self.patches.push(Box::new(move |client: &QueryClient| {
      client.update_queries_data(&prefix, update);
    }));
    self
  }

  pub fn notify(mut self, message: impl Into<String>) -> Self {
    self.message = Some(message.into());
    self
  }

  pub fn invalidated(&self) -> &[QueryKey] {
    &self.invalidate
  }

  fn apply(self, client: &QueryClient, notifier: &dyn Notifier) {
    for (key, value) in &self.writes {
      client.set_query_data(key, value);
    }
    for patch in self.patches {
      patch(client);
    }
    for prefix in &self.invalidate {
      client.invalidate_queries(prefix);
    }
    if let Some(message) = self.message {
      notifier.notify(Notification::success(message));
    }
  }
}

/// Runs one write against the backend and applies its effects.
///
/// Failures leave the cache untouched and raise an error notification
/// carrying the backend's message.
pub struct Mutation<T> {
  action: String,
  state: MutationState<T>,
  client: QueryClient,
  notifier: Arc<dyn Notifier>,
}

impl<T: Clone> Mutation<T> {
  /// `action` names the operation in error notifications ("delete contacts").
  pub fn new(action: impl Into<String>, client: QueryClient, notifier: Arc<dyn Notifier>) -> Self {
    Self {
      action: action.into(),
      state: MutationState::Idle,
      client,
      notifier,
    }
  }

  pub fn state(&self) -> &MutationState<T> {
    &self.state
  }

  pub async fn run<Fut, E>(&mut self, request: Fut, effects: E) -> ApiResult<T>
  where
    Fut: Future<Output = ApiResult<T>>,
    E: FnOnce(&T) -> Effects,
  {
    self.state = MutationState::Pending;

    match request.await {
      Ok(output) => {
        effects(&output).apply(&self.client, self.notifier.as_ref());
        self.state = MutationState::Success(output.clone());
        Ok(output)
      }
      Err(e) => {
        warn!(action = %self.action, error = %e, "mutation failed");
        self
          .notifier
          .notify(Notification::error(format!("Failed to {}", self.action), e.to_string()));
        self.state = MutationState::Error(e.clone());
        Err(e)
      }
    }
  }
}
