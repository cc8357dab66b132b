use super::OperationId;
use crate::progress::ProgressTracker;

/// Contextual information available to a running operation via task-locals.
/// Accessible within an [`OpFn`](super::OpFn) using
/// `try_get_current_operation_context()` or the `op_context!()` macro when the
/// `op_context` feature is enabled.
#[derive(Clone, Debug)]
pub struct OperationContext {
  pub op_id: OperationId,
  pub name: String,
  tracker: ProgressTracker,
}

impl OperationContext {
  pub(crate) fn new(op_id: OperationId, name: String, tracker: ProgressTracker) -> Self {
    Self {
      op_id,
      name,
      tracker,
    }
  }

  /// Handle for reporting fine-grained progress on this operation's tracker.
  pub fn progress(&self) -> ProgressHandle {
    ProgressHandle {
      id: self.op_id.to_string(),
      tracker: self.tracker.clone(),
    }
  }
}

/// Progress reporting bound to one tracker ID.
#[derive(Clone, Debug)]
pub struct ProgressHandle {
  id: String,
  tracker: ProgressTracker,
}

impl ProgressHandle {
  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn set_total(&self, total: u64) {
    self.tracker.set_total(&self.id, total);
  }

  pub fn update(&self, current: u64, message: Option<&str>) {
    self.tracker.update(&self.id, current, message);
  }

  pub fn increment(&self, by: u64, message: Option<&str>) {
    self.tracker.increment(&self.id, by, message);
  }

  pub fn message(&self, text: &str) {
    self.tracker.message(&self.id, text);
  }
}

tokio::task_local! {
    /// The context of the operation whose callable is currently executing.
    /// Set by the scheduler around every callable when `op_context` is enabled.
    pub static CURRENT_OPERATION_CONTEXT: OperationContext;
}

/// Attempts to retrieve the current `OperationContext`.
///
/// Returns `None` when called outside a scheduler-managed callable.
pub fn try_get_current_operation_context() -> Option<OperationContext> {
  CURRENT_OPERATION_CONTEXT.try_with(|ctx| ctx.clone()).ok()
}

/// Retrieves the current `OperationContext`, panicking if called outside a
/// scheduler-managed callable.
///
/// Use `try_get_current_operation_context()` for optional access.
///
/// # Panics
/// Panics if the `CURRENT_OPERATION_CONTEXT` task local has not been set.
#[macro_export]
macro_rules! op_context {
  () => {
    $crate::operation::context::CURRENT_OPERATION_CONTEXT.with(|ctx| ctx.clone())
  };
}
