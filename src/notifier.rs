use std::fmt;

use tracing::{error, info, warn};

/// Severity of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NotifyLevel {
  Info,
  Warn,
  Error,
}

impl fmt::Display for NotifyLevel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      NotifyLevel::Info => f.write_str("info"),
      NotifyLevel::Warn => f.write_str("warn"),
      NotifyLevel::Error => f.write_str("error"),
    }
  }
}

/// Fire-and-forget sink for toast-style messages (operation completion,
/// failures, exhausted retries, cache toggles).
pub trait Notifier: Send + Sync {
  fn notify(&self, message: &str, level: NotifyLevel);
}

/// Default notifier: forwards every message to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
  fn notify(&self, message: &str, level: NotifyLevel) {
    match level {
      NotifyLevel::Info => info!(target: "cmdkeeper::notify", "{}", message),
      NotifyLevel::Warn => warn!(target: "cmdkeeper::notify", "{}", message),
      NotifyLevel::Error => error!(target: "cmdkeeper::notify", "{}", message),
    }
  }
}
