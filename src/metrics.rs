use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// --- Simple Histogram Implementation ---

/// A basic concurrent histogram storing count and sum.
///
/// Suitable for simple latency tracking without percentile information.
#[derive(Debug, Default)]
pub struct SimpleHistogram {
  count: AtomicUsize,
  sum_micros: AtomicUsize,
}

impl SimpleHistogram {
  /// Records a duration observation in the histogram.
  pub fn record(&self, duration: Duration) {
    self.count.fetch_add(1, Ordering::Relaxed);
    self.sum_micros.fetch_add(
      duration.as_micros().try_into().unwrap_or(usize::MAX),
      Ordering::Relaxed,
    );
  }

  /// Gets the total number of observations recorded.
  pub fn get_count(&self) -> usize {
    self.count.load(Ordering::Relaxed)
  }

  /// Gets the total sum of durations recorded (in microseconds).
  pub fn get_sum_micros(&self) -> usize {
    self.sum_micros.load(Ordering::Relaxed)
  }
}

// --- Main Metrics Struct (Internal State) ---

/// Atomic counters describing scheduler activity.
///
/// Cloning only clones the `Arc`s, so every clone observes the same values.
#[derive(Debug, Clone)]
pub struct SchedulerMetrics {
  // --- Counters (Monotonically increasing) ---
  /// Operations submitted via `run` or `queue` (retries included).
  pub ops_submitted: Arc<AtomicUsize>,
  /// Operations that went through the FIFO queue.
  pub ops_queued: Arc<AtomicUsize>,
  /// Operations whose callable was started.
  pub ops_started: Arc<AtomicUsize>,
  pub ops_succeeded: Arc<AtomicUsize>,
  /// Failures, panics included.
  pub ops_failed: Arc<AtomicUsize>,
  pub ops_panicked: Arc<AtomicUsize>,
  pub ops_cancelled: Arc<AtomicUsize>,
  /// Retries that produced a new operation.
  pub ops_retried: Arc<AtomicUsize>,
  /// Retries refused because the lineage hit `retry_max_attempts` or retries are off.
  pub retries_refused: Arc<AtomicUsize>,
  pub wait_timeouts: Arc<AtomicUsize>,
  /// Completions that arrived after the operation had been cancelled.
  pub late_completions_discarded: Arc<AtomicUsize>,

  // --- Gauges (Current state values) ---
  /// Operations currently in the running set.
  pub ops_running_current: Arc<AtomicUsize>,

  // --- Histograms/Summaries ---
  /// Execution duration of finished callables.
  pub op_execution_duration: Arc<SimpleHistogram>,
}

impl Default for SchedulerMetrics {
  fn default() -> Self {
    Self::new()
  }
}

impl SchedulerMetrics {
  /// Creates a new `SchedulerMetrics` instance with all counters initialized to zero.
  pub fn new() -> Self {
    Self {
      ops_submitted: Default::default(),
      ops_queued: Default::default(),
      ops_started: Default::default(),
      ops_succeeded: Default::default(),
      ops_failed: Default::default(),
      ops_panicked: Default::default(),
      ops_cancelled: Default::default(),
      ops_retried: Default::default(),
      retries_refused: Default::default(),
      wait_timeouts: Default::default(),
      late_completions_discarded: Default::default(),
      ops_running_current: Default::default(),
      op_execution_duration: Arc::new(SimpleHistogram::default()),
    }
  }

  pub(crate) fn incr(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
  }

  /// Creates a point-in-time snapshot of the current values.
  pub fn snapshot(&self) -> MetricsSnapshot {
    let order = Ordering::Relaxed;

    MetricsSnapshot {
      ops_submitted: self.ops_submitted.load(order),
      ops_queued: self.ops_queued.load(order),
      ops_started: self.ops_started.load(order),
      ops_succeeded: self.ops_succeeded.load(order),
      ops_failed: self.ops_failed.load(order),
      ops_panicked: self.ops_panicked.load(order),
      ops_cancelled: self.ops_cancelled.load(order),
      ops_retried: self.ops_retried.load(order),
      retries_refused: self.retries_refused.load(order),
      wait_timeouts: self.wait_timeouts.load(order),
      late_completions_discarded: self.late_completions_discarded.load(order),
      ops_running_current: self.ops_running_current.load(order),
      op_execution_duration_count: self.op_execution_duration.get_count(),
      op_execution_duration_sum_micros: self.op_execution_duration.get_sum_micros(),
    }
  }
}

// --- Metrics Snapshot Struct (Public Data) ---

/// A snapshot of the scheduler's metrics at a specific point in time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricsSnapshot {
  // Counters
  pub ops_submitted: usize,
  pub ops_queued: usize,
  pub ops_started: usize,
  pub ops_succeeded: usize,
  pub ops_failed: usize,
  pub ops_panicked: usize,
  pub ops_cancelled: usize,
  pub ops_retried: usize,
  pub retries_refused: usize,
  pub wait_timeouts: usize,
  pub late_completions_discarded: usize,
  // Gauges
  pub ops_running_current: usize,
  // Histogram Data
  pub op_execution_duration_count: usize,
  pub op_execution_duration_sum_micros: usize,
}

impl MetricsSnapshot {
  /// Mean callable duration in microseconds, or `None` if nothing finished.
  pub fn mean_execution_duration_micros(&self) -> Option<f64> {
    if self.op_execution_duration_count == 0 {
      None
    } else {
      Some(self.op_execution_duration_sum_micros as f64 / self.op_execution_duration_count as f64)
    }
  }

  /// Mean callable duration, or `None` if nothing finished.
  pub fn mean_execution_duration(&self) -> Option<Duration> {
    self
      .mean_execution_duration_micros()
      .map(|micros| Duration::from_micros(micros as u64))
  }
}
