//! User-facing notifications raised by mutations.

use parking_lot::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
  Success,
  Error,
}

/// A toast-style message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
  pub kind: NotificationKind,
  pub title: String,
  pub description: Option<String>,
}

impl Notification {
  pub fn success(title: impl Into<String>) -> Self {
    Self {
      kind: NotificationKind::Success,
      title: title.into(),
      description: None,
    }
  }

  pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
    Self {
      kind: NotificationKind::Error,
      title: title.into(),
      description: Some(description.into()),
    }
  }
}

/// Sink for notifications.
pub trait Notifier: Send + Sync {
  fn notify(&self, notification: Notification);
}

/// Writes notifications to the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
  fn notify(&self, notification: Notification) {
    let description = notification.description.unwrap_or_default();
    match notification.kind {
      NotificationKind::Success => info!(title = %notification.title, %description, "notification"),
      NotificationKind::Error => warn!(title = %notification.title, %description, "notification"),
    }
  }
}

/// Prints notifications to stderr, for interactive use.
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
  fn notify(&self, notification: Notification) {
    let marker = match notification.kind {
      NotificationKind::Success => "ok",
      NotificationKind::Error => "error",
    };
    match notification.description {
      Some(description) => eprintln!("[{}] {}: {}", marker, notification.title, description),
      None => eprintln!("[{}] {}", marker, notification.title),
    }
  }
}

/// Keeps every notification in memory, for embedders that render them
/// later and for tests.
#[derive(Default)]
pub struct RecordingNotifier {
  received: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn notifications(&self) -> Vec<Notification> {
    self.received.lock().clone()
  }

  pub fn take(&self) -> Vec<Notification> {
    std::mem::take(&mut *self.received.lock())
  }
}

impl Notifier for RecordingNotifier {
  fn notify(&self, notification: Notification) {
    self.received.lock().push(notification);
  }
}
