use crate::operation::OperationId;

use thiserror::Error;

/// Errors that can occur while building a scheduler with `SchedulerBuilder`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
  #[error("Maximum concurrency (`max_concurrent`) must be greater than zero")]
  ZeroMaxConcurrent,
  #[error("No Tokio runtime available; build inside a runtime or pass one via `runtime()`")]
  NoRuntime,
}

/// Errors returned by an [`Invoker`](crate::invoker::Invoker) for the
/// expected failure modes of the external tool.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvokeError {
  #[error("Command-line tool `{0}` was not found")]
  ToolMissing(String),
  #[error("`{command}` exited with status {code:?}: {stderr}")]
  NonZeroExit {
    command: String,
    code: Option<i32>,
    stderr: String,
  },
  #[error("Malformed output from `{command}`: {reason}")]
  MalformedOutput { command: String, reason: String },
  #[error("Invalid arguments for `{command}`: {reason}")]
  InvalidArguments { command: String, reason: String },
  #[error("I/O error while running `{command}`: {reason}")]
  Io { command: String, reason: String },
}

/// Outcome of [`OperationScheduler::wait`](crate::OperationScheduler::wait)
/// when the operation did not finish successfully within the deadline.
///
/// A timeout never affects the underlying operation; it keeps running and
/// lands in history as usual.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
  #[error("Operation not found")]
  NotFound(OperationId),
  #[error("Operation timed out")]
  TimedOut(OperationId),
  #[error("{0}")]
  Failed(String),
  #[error("Operation cancelled")]
  Cancelled(OperationId),
}
