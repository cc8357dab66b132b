#[cfg(feature = "op_context")]
pub mod context;

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::time::Instant;
use tracing::warn;

static NEXT_OPERATION_ID: AtomicU64 = AtomicU64::new(1);

// --- Public Type Aliases ---

/// What an operation callable resolves to: the payload on success, an error
/// message on failure.
pub type OpOutput = Result<Value, String>;

/// The callable an operation executes.
///
/// It receives the argument list the operation was submitted with and must
/// return a `'static` future. Panics inside the future are caught by the
/// scheduler and recorded as failures.
pub type OpFn = Arc<dyn Fn(Vec<String>) -> BoxFuture<'static, OpOutput> + Send + Sync + 'static>;

/// Completion callback, invoked once with the final outcome after the
/// operation's status has been recorded.
pub type OnComplete = Arc<dyn Fn(&OpOutput) + Send + Sync + 'static>;

/// Unique identifier of an operation, rendered as `op_<n>`.
///
/// Generated from a process-wide monotonically increasing counter, so IDs are
/// never reused and order by submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OperationId(pub(crate) u64);

impl OperationId {
  /// Allocates the next process-wide ID.
  pub(crate) fn next() -> Self {
    OperationId(NEXT_OPERATION_ID.fetch_add(1, Ordering::Relaxed))
  }

  /// The numeric sequence part of the ID.
  pub fn sequence(&self) -> u64 {
    self.0
  }
}

impl fmt::Display for OperationId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "op_{}", self.0)
  }
}

impl FromStr for OperationId {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    s.strip_prefix("op_")
      .and_then(|n| n.parse::<u64>().ok())
      .map(OperationId)
      .ok_or_else(|| format!("invalid operation id: {s}"))
  }
}

/// Lifecycle state of an operation.
///
/// `Completed`, `Failed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OperationStatus {
  /// Waiting in the FIFO queue for a concurrency slot.
  Queued,
  Running,
  Completed,
  Failed,
  Cancelled,
}

impl OperationStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Cancelled
    )
  }
}

impl fmt::Display for OperationStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let label = match self {
      OperationStatus::Queued => "queued",
      OperationStatus::Running => "running",
      OperationStatus::Completed => "completed",
      OperationStatus::Failed => "failed",
      OperationStatus::Cancelled => "cancelled",
    };
    f.write_str(label)
  }
}

/// Everything needed to (re)start an operation: what to call and what to
/// tell the caller afterwards.
#[derive(Clone)]
pub(crate) struct OperationRequest {
  pub name: String,
  pub exec_fn: OpFn,
  pub args: Vec<String>,
  pub on_complete: Option<OnComplete>,
  /// Retries already spent by this operation's lineage.
  pub retry_count: u32,
  /// Delay before the callable runs (retry backoff). Zero for fresh submissions.
  pub start_delay: Duration,
}

impl fmt::Debug for OperationRequest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("OperationRequest")
      .field("name", &self.name)
      .field("args", &self.args)
      .field("exec_fn", &format_args!("<Fn>"))
      .field("on_complete", &self.on_complete.as_ref().map(|_| "<Fn>"))
      .field("retry_count", &self.retry_count)
      .field("start_delay", &self.start_delay)
      .finish()
  }
}

/// An operation that has started (running or terminal).
#[derive(Debug, Clone)]
pub(crate) struct OperationRecord {
  pub id: OperationId,
  pub request: OperationRequest,
  pub status: OperationStatus,
  pub started_at: DateTime<Utc>,
  pub ended_at: Option<DateTime<Utc>>,
  pub outcome: Option<OpOutput>,
  started: Instant,
  ended: Option<Instant>,
}

impl OperationRecord {
  pub fn new(id: OperationId, request: OperationRequest) -> Self {
    Self {
      id,
      request,
      status: OperationStatus::Running,
      started_at: Utc::now(),
      ended_at: None,
      outcome: None,
      started: Instant::now(),
      ended: None,
    }
  }

  pub fn elapsed(&self) -> Duration {
    match self.ended {
      Some(ended) => ended.saturating_duration_since(self.started),
      None => self.started.elapsed(),
    }
  }

  /// Moves the record into a terminal state. Returns `false` if it already was.
  pub fn finish(&mut self, status: OperationStatus, outcome: OpOutput) -> bool {
    if self.status.is_terminal() {
      return false;
    }
    self.status = status;
    self.outcome = Some(outcome);
    self.ended_at = Some(Utc::now());
    self.ended = Some(Instant::now());
    true
  }

  pub fn details(&self) -> OperationDetails {
    OperationDetails {
      id: self.id,
      name: self.request.name.clone(),
      status: self.status,
      args: self.request.args.clone(),
      started_at: Some(self.started_at),
      ended_at: self.ended_at,
      elapsed: self.elapsed(),
      outcome: self.outcome.clone(),
      retry_count: self.request.retry_count,
    }
  }
}

/// An operation waiting in the FIFO queue.
#[derive(Debug, Clone)]
pub(crate) struct QueuedOperation {
  pub id: OperationId,
  pub request: OperationRequest,
}

// --- Public Snapshot Structs for Querying ---

/// Detailed information about a single operation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OperationDetails {
  pub id: OperationId,
  pub name: String,
  pub status: OperationStatus,
  pub args: Vec<String>,
  /// `None` while the operation is still queued.
  pub started_at: Option<DateTime<Utc>>,
  pub ended_at: Option<DateTime<Utc>>,
  pub elapsed: Duration,
  /// Payload on success, error message on failure. `None` while in flight.
  pub outcome: Option<OpOutput>,
  /// Retries spent by this operation's lineage.
  pub retry_count: u32,
}

/// A running (or queued) entry, suitable for listing.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OperationSummary {
  /// Operation ID, or the tracker ID for progress-only work.
  pub id: String,
  pub name: String,
  pub elapsed: Duration,
  pub percentage: u8,
}

/// Counts over the scheduler's buckets at call time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OperationStats {
  pub active: usize,
  pub queued: usize,
  pub completed: usize,
  pub failed: usize,
  /// `active + completed + failed`.
  pub total: usize,
}

// --- Callable helpers ---

/// Adapts a synchronous function into an [`OpFn`].
///
/// The function runs on Tokio's blocking pool so slow work (process spawns)
/// never stalls the runtime.
pub fn blocking_op<F>(f: F) -> OpFn
where
  F: Fn(Vec<String>) -> OpOutput + Send + Sync + 'static,
{
  let f = Arc::new(f);
  Arc::new(move |args: Vec<String>| {
    let f = f.clone();
    Box::pin(async move {
      match tokio::task::spawn_blocking(move || f(args)).await {
        Ok(output) => output,
        Err(join_error) if join_error.is_panic() => Err("Operation panicked".to_string()),
        Err(join_error) => Err(format!("Blocking task failed: {join_error}")),
      }
    })
  })
}

/// Delay before the `attempt`-th retry: `base * 2^(attempt - 1)`, exponent
/// capped at 5. A zero base disables backoff.
pub(crate) fn retry_backoff(base: Duration, attempt: u32) -> Duration {
  if base.is_zero() {
    return Duration::ZERO;
  }
  let max_exponent: u32 = 5;
  let exponent = std::cmp::min(attempt.saturating_sub(1), max_exponent);
  let factor = 2u32.pow(exponent);
  base.checked_mul(factor).unwrap_or_else(|| {
    warn!(attempt, ?base, "Retry backoff overflowed, using base delay.");
    base
  })
}
