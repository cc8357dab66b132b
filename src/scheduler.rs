use crate::coordinator::{Coordinator, RetryRefusal};
use crate::error::{BuildError, WaitError};
use crate::metrics::{MetricsSnapshot, SchedulerMetrics};
use crate::notifier::{Notifier, NotifyLevel, TracingNotifier};
use crate::operation::{
  retry_backoff, OnComplete, OpFn, OpOutput, OperationDetails, OperationId, OperationRequest,
  OperationStats, OperationStatus, OperationSummary,
};
use crate::progress::ProgressTracker;
use crate::worker::Worker;

use std::collections::HashSet;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const DEFAULT_MAX_CONCURRENT: usize = 3;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_HISTORY_LIMIT: usize = 100;
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Runtime-adjustable scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SchedulerConfig {
  /// Upper bound on running operations when draining the queue.
  pub max_concurrent: usize,
  /// While `false`, queued operations stay queued.
  pub queue_enabled: bool,
  /// Deadline used by `wait` when none is given.
  pub default_timeout: Duration,
  pub retry_enabled: bool,
  /// Retries allowed per operation lineage.
  pub retry_max_attempts: u32,
  /// Base delay for exponential retry backoff; zero runs retries immediately.
  pub retry_backoff: Duration,
  pub notify_on_complete: bool,
  pub notify_on_error: bool,
  /// Maximum entries kept in each of the completed and failed buckets.
  pub history_limit: usize,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      max_concurrent: DEFAULT_MAX_CONCURRENT,
      queue_enabled: true,
      default_timeout: DEFAULT_TIMEOUT,
      retry_enabled: true,
      retry_max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
      retry_backoff: Duration::ZERO,
      notify_on_complete: true,
      notify_on_error: true,
      history_limit: DEFAULT_HISTORY_LIMIT,
    }
  }
}

/// Builder for configuring and creating an [`OperationScheduler`].
///
/// # Example
///
/// ```no_run
/// use cmdkeeper::OperationScheduler;
/// use std::time::Duration;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let scheduler = OperationScheduler::builder()
///     .max_concurrent(2)
///     .retry_max_attempts(5)
///     .default_timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct SchedulerBuilder {
  config: SchedulerConfig,
  notifier: Option<Arc<dyn Notifier>>,
  tracker: Option<ProgressTracker>,
  runtime: Option<Handle>,
}

impl fmt::Debug for SchedulerBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SchedulerBuilder")
      .field("config", &self.config)
      .field("notifier", &self.notifier.as_ref().map(|_| "<Notifier>"))
      .field("tracker", &self.tracker)
      .field("runtime", &self.runtime)
      .finish()
  }
}

impl SchedulerBuilder {
  /// Creates a builder with default settings.
  pub fn new() -> Self {
    Self::default()
  }

  /// Starts from a full configuration.
  pub fn config(mut self, config: SchedulerConfig) -> Self {
    self.config = config;
    self
  }

  /// Maximum operations started from the queue concurrently. Must be > 0.
  pub fn max_concurrent(mut self, count: usize) -> Self {
    self.config.max_concurrent = count;
    self
  }

  pub fn queue_enabled(mut self, enabled: bool) -> Self {
    self.config.queue_enabled = enabled;
    self
  }

  pub fn default_timeout(mut self, timeout: Duration) -> Self {
    self.config.default_timeout = timeout;
    self
  }

  pub fn retry_enabled(mut self, enabled: bool) -> Self {
    self.config.retry_enabled = enabled;
    self
  }

  pub fn retry_max_attempts(mut self, attempts: u32) -> Self {
    self.config.retry_max_attempts = attempts;
    self
  }

  pub fn retry_backoff(mut self, base: Duration) -> Self {
    self.config.retry_backoff = base;
    self
  }

  pub fn notify_on_complete(mut self, enabled: bool) -> Self {
    self.config.notify_on_complete = enabled;
    self
  }

  pub fn notify_on_error(mut self, enabled: bool) -> Self {
    self.config.notify_on_error = enabled;
    self
  }

  pub fn history_limit(mut self, limit: usize) -> Self {
    self.config.history_limit = limit;
    self
  }

  /// Sink for completion/failure notifications. Defaults to [`TracingNotifier`].
  pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
    self.notifier = Some(notifier);
    self
  }

  /// Shares an existing progress tracker instead of creating a fresh one.
  pub fn progress_tracker(mut self, tracker: ProgressTracker) -> Self {
    self.tracker = Some(tracker);
    self
  }

  /// Runtime to spawn operations on. Defaults to the current runtime.
  pub fn runtime(mut self, handle: Handle) -> Self {
    self.runtime = Some(handle);
    self
  }

  /// Builds the scheduler.
  ///
  /// # Errors
  ///
  /// - [`BuildError::ZeroMaxConcurrent`] if `max_concurrent` is zero.
  /// - [`BuildError::NoRuntime`] if no runtime was given and none is current.
  pub fn build(self) -> Result<OperationScheduler, BuildError> {
    if self.config.max_concurrent == 0 {
      return Err(BuildError::ZeroMaxConcurrent);
    }
    let runtime = match self.runtime {
      Some(handle) => handle,
      None => Handle::try_current().map_err(|_| BuildError::NoRuntime)?,
    };
    info!(config = ?self.config, "Operation scheduler built.");

    Ok(OperationScheduler {
      shared: Arc::new(SchedulerShared {
        state: Mutex::new(Coordinator::new(self.config)),
        tracker: self.tracker.unwrap_or_default(),
        notifier: self.notifier.unwrap_or_else(|| Arc::new(TracingNotifier)),
        metrics: SchedulerMetrics::new(),
        runtime,
      }),
    })
  }
}

pub(crate) struct SchedulerShared {
  state: Mutex<Coordinator>,
  tracker: ProgressTracker,
  notifier: Arc<dyn Notifier>,
  metrics: SchedulerMetrics,
  runtime: Handle,
}

/// Runs named operations asynchronously with bounded, FIFO-queued
/// concurrency, retry bookkeeping, cancellation and progress tracking.
///
/// Cloning is cheap; every clone drives the same scheduler. `run` and
/// `queue` are synchronous and return the operation ID before the callable
/// starts, so they may be called from any thread.
#[derive(Clone)]
pub struct OperationScheduler {
  shared: Arc<SchedulerShared>,
}

impl fmt::Debug for OperationScheduler {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("OperationScheduler")
      .field("stats", &self.get_stats())
      .field("config", &self.config())
      .finish()
  }
}

impl OperationScheduler {
  /// Returns a builder to configure and create a scheduler.
  pub fn builder() -> SchedulerBuilder {
    SchedulerBuilder::new()
  }

  /// Starts an operation right away (not subject to the queue) and returns
  /// its ID. The callable runs on a later task, never inline.
  pub fn run(
    &self,
    name: &str,
    exec_fn: OpFn,
    args: Vec<String>,
    on_complete: Option<OnComplete>,
  ) -> OperationId {
    let request = OperationRequest {
      name: name.to_string(),
      exec_fn,
      args,
      on_complete,
      retry_count: 0,
      start_delay: Duration::ZERO,
    };
    self.submit_running(OperationId::next(), request)
  }

  /// Appends an operation to the FIFO queue and returns its ID. Its progress
  /// tracker exists immediately so UIs can show it as queued.
  pub fn queue(
    &self,
    name: &str,
    exec_fn: OpFn,
    args: Vec<String>,
    on_complete: Option<OnComplete>,
  ) -> OperationId {
    let id = OperationId::next();
    let request = OperationRequest {
      name: name.to_string(),
      exec_fn,
      args,
      on_complete,
      retry_count: 0,
      start_delay: Duration::ZERO,
    };
    SchedulerMetrics::incr(&self.shared.metrics.ops_submitted);
    SchedulerMetrics::incr(&self.shared.metrics.ops_queued);

    let key = id.to_string();
    self.shared.tracker.create_operation(&key, name);
    self.shared.tracker.message(&key, "Queued");

    let queue_enabled = {
      let mut state = self.shared.state.lock();
      state.enqueue(id, request);
      state.config.queue_enabled
    };
    if queue_enabled {
      self.process_queue();
    }
    id
  }

  /// Starts queued operations while capacity allows. Safe to call at any
  /// time; it is also called after every completion and cancellation.
  pub fn process_queue(&self) {
    let startable = self.shared.state.lock().take_startable();
    for queued in startable {
      self.shared.tracker.message(&queued.id.to_string(), "Started");
      self.spawn(queued.id, queued.request);
    }
  }

  /// Best-effort cancellation of a running operation.
  ///
  /// The operation is marked cancelled and moved to the failed bucket; the
  /// underlying call is not interrupted and its eventual completion is
  /// discarded, so neither `on_complete` nor a notification fires. Queued,
  /// finished and unknown IDs are ignored.
  pub fn cancel(&self, id: OperationId) {
    let cancelled = self.shared.state.lock().cancel(id);
    let Some(cancelled) = cancelled else {
      debug!(op_id = %id, "Cancel ignored: operation not running.");
      return;
    };
    info!(op_id = %id, op_name = cancelled.name.as_str(), "Operation cancelled.");
    SchedulerMetrics::incr(&self.shared.metrics.ops_cancelled);
    self.shared.tracker.fail_operation(&id.to_string(), "Cancelled");
    self.forget_trackers(&cancelled.evicted);
    self.update_running_gauge();
    self.process_queue();
  }

  /// Polls until the operation leaves the running/queued states or the
  /// timeout (default: `default_timeout`) elapses. A timeout does not affect
  /// the operation itself.
  ///
  /// # Errors
  ///
  /// - [`WaitError::NotFound`]: unknown ID (or already cleared).
  /// - [`WaitError::TimedOut`]: still in flight at the deadline.
  /// - [`WaitError::Failed`]: the operation failed; carries its error.
  /// - [`WaitError::Cancelled`]: the operation was cancelled.
  pub async fn wait(&self, id: OperationId, timeout: Option<Duration>) -> Result<Value, WaitError> {
    let timeout = timeout.unwrap_or_else(|| self.shared.state.lock().config.default_timeout);
    // A timeout too large to represent as an instant never expires.
    let deadline = Instant::now().checked_add(timeout);

    loop {
      let polled = self.shared.state.lock().poll(id);
      match polled {
        None => return Err(WaitError::NotFound(id)),
        Some((OperationStatus::Completed, outcome)) => {
          return Ok(outcome.and_then(Result::ok).unwrap_or(Value::Null));
        }
        Some((OperationStatus::Failed, outcome)) => {
          let message = match outcome {
            Some(Err(e)) => e,
            _ => "Operation failed".to_string(),
          };
          return Err(WaitError::Failed(message));
        }
        Some((OperationStatus::Cancelled, _)) => return Err(WaitError::Cancelled(id)),
        Some((OperationStatus::Running | OperationStatus::Queued, _)) => {}
      }

      let pause = match deadline {
        Some(deadline) => {
          let now = Instant::now();
          if now >= deadline {
            SchedulerMetrics::incr(&self.shared.metrics.wait_timeouts);
            debug!(op_id = %id, ?timeout, "Wait timed out.");
            return Err(WaitError::TimedOut(id));
          }
          WAIT_POLL_INTERVAL.min(deadline - now)
        }
        None => WAIT_POLL_INTERVAL,
      };
      tokio::time::sleep(pause).await;
    }
  }

  /// Re-runs a finished operation under a new ID.
  ///
  /// Only operations in the completed or failed bucket qualify; anything else
  /// returns `None` silently. Each call charges one retry to the lineage; once
  /// the count exceeds `retry_max_attempts` a warning is sent and `None` is
  /// returned.
  pub fn retry(&self, id: OperationId) -> Option<OperationId> {
    let (prepared, backoff_base) = {
      let mut state = self.shared.state.lock();
      (state.prepare_retry(id), state.config.retry_backoff)
    };
    let mut request = match prepared {
      Ok(request) => request,
      Err(RetryRefusal::NotInHistory) => {
        debug!(op_id = %id, "Retry ignored: operation not in history.");
        return None;
      }
      Err(RetryRefusal::Disabled) => {
        SchedulerMetrics::incr(&self.shared.metrics.retries_refused);
        warn!(op_id = %id, "Retry refused: retries are disabled.");
        return None;
      }
      Err(RetryRefusal::Exhausted { name, max_attempts }) => {
        SchedulerMetrics::incr(&self.shared.metrics.retries_refused);
        warn!(op_id = %id, op_name = name.as_str(), max_attempts, "Retry refused: attempts exhausted.");
        self.shared.notifier.notify(
          &format!("Max retries ({max_attempts}) reached for {name}"),
          NotifyLevel::Warn,
        );
        return None;
      }
    };

    request.start_delay = retry_backoff(backoff_base, request.retry_count);
    SchedulerMetrics::incr(&self.shared.metrics.ops_retried);
    let new_id = OperationId::next();
    info!(
      op_id = %id,
      new_op_id = %new_id,
      attempt = request.retry_count,
      delay_ms = request.start_delay.as_millis(),
      "Retrying operation."
    );
    Some(self.submit_running(new_id, request))
  }

  // --- Queries ---

  pub fn get_status(&self, id: OperationId) -> Option<OperationStatus> {
    self.shared.state.lock().status(id)
  }

  pub fn get_operation(&self, id: OperationId) -> Option<OperationDetails> {
    let state = self.shared.state.lock();
    if let Some(details) = state.details(id) {
      return Some(details);
    }
    let queued = state.queued(id)?;
    let details = OperationDetails {
      id,
      name: queued.request.name.clone(),
      status: OperationStatus::Queued,
      args: queued.request.args.clone(),
      started_at: None,
      ended_at: None,
      elapsed: Duration::ZERO,
      outcome: None,
      retry_count: queued.request.retry_count,
    };
    drop(state);
    Some(OperationDetails {
      elapsed: self.shared.tracker.elapsed(&id.to_string()).unwrap_or_default(),
      ..details
    })
  }

  /// Time since the operation started (or was queued), up to its end.
  pub fn get_elapsed(&self, id: OperationId) -> Option<Duration> {
    let elapsed = self.shared.state.lock().details(id).map(|d| d.elapsed);
    elapsed.or_else(|| self.shared.tracker.elapsed(&id.to_string()))
  }

  /// Running operations plus any other running progress trackers, each ID
  /// listed once. Queued operations are reported by [`get_queued`](Self::get_queued).
  pub fn get_active(&self) -> Vec<OperationSummary> {
    let (running, queued_ids): (Vec<(String, String, Duration)>, HashSet<String>) = {
      let state = self.shared.state.lock();
      let running = state
        .active_records()
        .into_iter()
        .map(|r| (r.id.to_string(), r.request.name.clone(), r.elapsed()))
        .collect();
      let queued_ids = state.queued_operations().map(|q| q.id.to_string()).collect();
      (running, queued_ids)
    };

    let mut seen = HashSet::new();
    let mut active = Vec::with_capacity(running.len());
    for (id, name, elapsed) in running {
      seen.insert(id.clone());
      let percentage = self.shared.tracker.percentage(&id);
      active.push(OperationSummary {
        id,
        name,
        elapsed,
        percentage,
      });
    }
    for record in self.shared.tracker.get_active() {
      if queued_ids.contains(&record.id) || !seen.insert(record.id.clone()) {
        continue;
      }
      active.push(OperationSummary {
        percentage: record.percentage(),
        elapsed: record.elapsed(),
        name: record.title,
        id: record.id,
      });
    }
    active
  }

  /// Queued operations in FIFO order.
  pub fn get_queued(&self) -> Vec<OperationSummary> {
    let queued: Vec<(String, String)> = self
      .shared
      .state
      .lock()
      .queued_operations()
      .map(|q| (q.id.to_string(), q.request.name.clone()))
      .collect();
    queued
      .into_iter()
      .map(|(id, name)| OperationSummary {
        elapsed: self.shared.tracker.elapsed(&id).unwrap_or_default(),
        percentage: 0,
        id,
        name,
      })
      .collect()
  }

  pub fn get_stats(&self) -> OperationStats {
    self.shared.state.lock().stats()
  }

  pub fn get_metrics_snapshot(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }

  /// The tracker holding per-operation progress.
  pub fn progress(&self) -> &ProgressTracker {
    &self.shared.tracker
  }

  // --- History ---

  /// Drops the completed bucket and its trackers. Returns how many were removed.
  pub fn clear_completed(&self) -> usize {
    let removed = self.shared.state.lock().clear_completed();
    self.forget_trackers(&removed);
    removed.len()
  }

  /// Drops the failed bucket (cancelled included) and its trackers.
  pub fn clear_failed(&self) -> usize {
    let removed = self.shared.state.lock().clear_failed();
    self.forget_trackers(&removed);
    removed.len()
  }

  /// Drops both history buckets. Running and queued operations are untouched.
  pub fn clear_history(&self) -> usize {
    self.clear_completed() + self.clear_failed()
  }

  // --- Configuration ---

  pub fn config(&self) -> SchedulerConfig {
    self.shared.state.lock().config.clone()
  }

  pub fn max_concurrent(&self) -> usize {
    self.shared.state.lock().config.max_concurrent
  }

  /// Changes the concurrency limit and immediately drains the queue into any
  /// new capacity. Zero is raised to one.
  pub fn set_max_concurrent(&self, count: usize) {
    if count == 0 {
      warn!("max_concurrent of 0 requested, using 1.");
    }
    self.shared.state.lock().config.max_concurrent = count.max(1);
    self.process_queue();
  }

  pub fn queue_enabled(&self) -> bool {
    self.shared.state.lock().config.queue_enabled
  }

  /// Enabling the queue immediately starts any work it was holding back.
  pub fn set_queue_enabled(&self, enabled: bool) {
    self.shared.state.lock().config.queue_enabled = enabled;
    if enabled {
      self.process_queue();
    }
  }

  pub fn default_timeout(&self) -> Duration {
    self.shared.state.lock().config.default_timeout
  }

  pub fn set_default_timeout(&self, timeout: Duration) {
    self.shared.state.lock().config.default_timeout = timeout;
  }

  pub fn retry_enabled(&self) -> bool {
    self.shared.state.lock().config.retry_enabled
  }

  pub fn set_retry_enabled(&self, enabled: bool) {
    self.shared.state.lock().config.retry_enabled = enabled;
  }

  pub fn retry_max_attempts(&self) -> u32 {
    self.shared.state.lock().config.retry_max_attempts
  }

  pub fn set_retry_max_attempts(&self, attempts: u32) {
    self.shared.state.lock().config.retry_max_attempts = attempts;
  }

  pub fn retry_backoff(&self) -> Duration {
    self.shared.state.lock().config.retry_backoff
  }

  pub fn set_retry_backoff(&self, base: Duration) {
    self.shared.state.lock().config.retry_backoff = base;
  }

  pub fn notify_on_complete(&self) -> bool {
    self.shared.state.lock().config.notify_on_complete
  }

  pub fn set_notify_on_complete(&self, enabled: bool) {
    self.shared.state.lock().config.notify_on_complete = enabled;
  }

  pub fn notify_on_error(&self) -> bool {
    self.shared.state.lock().config.notify_on_error
  }

  pub fn set_notify_on_error(&self, enabled: bool) {
    self.shared.state.lock().config.notify_on_error = enabled;
  }

  pub fn history_limit(&self) -> usize {
    self.shared.state.lock().config.history_limit
  }

  pub fn set_history_limit(&self, limit: usize) {
    self.shared.state.lock().config.history_limit = limit;
  }

  // --- Internals ---

  fn submit_running(&self, id: OperationId, request: OperationRequest) -> OperationId {
    SchedulerMetrics::incr(&self.shared.metrics.ops_submitted);
    let key = id.to_string();
    self.shared.tracker.create_operation(&key, &request.name);
    self.shared.tracker.message(&key, "Started");
    self.shared.state.lock().start(id, request.clone());
    self.spawn(id, request);
    id
  }

  fn spawn(&self, id: OperationId, request: OperationRequest) {
    self.update_running_gauge();
    let worker = Worker::new(self.clone(), id, request);
    self.shared.runtime.spawn(worker.run());
  }

  pub(crate) fn is_running(&self, id: OperationId) -> bool {
    self.shared.state.lock().status(id) == Some(OperationStatus::Running)
  }

  pub(crate) fn metrics(&self) -> &SchedulerMetrics {
    &self.shared.metrics
  }

  /// Records a callable's outcome: history, tracker, notification, then the
  /// completion callback, then the next queued operation.
  pub(crate) fn complete_operation(&self, id: OperationId, outcome: OpOutput) {
    let finished = self.shared.state.lock().finish(id, outcome.clone());
    let Some(finished) = finished else {
      SchedulerMetrics::incr(&self.shared.metrics.late_completions_discarded);
      warn!(op_id = %id, "Discarding completion of an operation that is no longer running.");
      return;
    };
    self.update_running_gauge();
    self.forget_trackers(&finished.evicted);

    let key = id.to_string();
    match &outcome {
      Ok(value) => {
        SchedulerMetrics::incr(&self.shared.metrics.ops_succeeded);
        self.shared.tracker.succeed_operation(&key, value.clone());
        if finished.notify_on_complete {
          self
            .shared
            .notifier
            .notify(&format!("{} completed", finished.name), NotifyLevel::Info);
        }
      }
      Err(message) => {
        SchedulerMetrics::incr(&self.shared.metrics.ops_failed);
        self.shared.tracker.fail_operation(&key, message);
        if finished.notify_on_error {
          self.shared.notifier.notify(
            &format!("{} failed: {}", finished.name, message),
            NotifyLevel::Error,
          );
        }
      }
    }

    if let Some(on_complete) = finished.on_complete {
      if catch_unwind(AssertUnwindSafe(|| on_complete(&outcome))).is_err() {
        error!(op_id = %id, "Completion callback panicked.");
      }
    }

    self.process_queue();
  }

  fn forget_trackers(&self, ids: &[OperationId]) {
    for id in ids {
      self.shared.tracker.clear(&id.to_string());
    }
  }

  fn update_running_gauge(&self) {
    let running = self.shared.state.lock().running_count();
    self
      .shared
      .metrics
      .ops_running_current
      .store(running, AtomicOrdering::Relaxed);
  }
}
