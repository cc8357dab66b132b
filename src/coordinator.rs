//! Bookkeeping for operations: the running set, the FIFO queue, and the
//! completed/failed history buckets.
//!
//! The `Coordinator` is a plain state machine. It never spawns, awaits, or
//! calls user code; the scheduler wraps it in a mutex and performs side
//! effects (spawning, notifications, callbacks) after releasing the lock.

use crate::operation::{
  OnComplete, OpOutput, OperationDetails, OperationId, OperationRecord, OperationRequest,
  OperationStats, OperationStatus, QueuedOperation,
};
use crate::scheduler::SchedulerConfig;

use std::collections::{BTreeMap, HashMap, VecDeque};

use tracing::{debug, trace};

/// Result of recording a completion for a running operation.
pub(crate) struct Finished {
  pub name: String,
  pub on_complete: Option<OnComplete>,
  pub notify_on_complete: bool,
  pub notify_on_error: bool,
  /// History entries pushed out by the size limit.
  pub evicted: Vec<OperationId>,
}

/// Result of a successful cancellation.
#[derive(Debug)]
pub(crate) struct Cancelled {
  pub name: String,
  pub evicted: Vec<OperationId>,
}

/// Why a retry was refused.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum RetryRefusal {
  /// Not in the completed or failed bucket.
  NotInHistory,
  Disabled,
  Exhausted { name: String, max_attempts: u32 },
}

#[derive(Debug, Default)]
pub(crate) struct Coordinator {
  pub config: SchedulerConfig,
  active: HashMap<OperationId, OperationRecord>,
  queue: VecDeque<QueuedOperation>,
  completed: BTreeMap<OperationId, OperationRecord>,
  failed: BTreeMap<OperationId, OperationRecord>,
}

impl Coordinator {
  pub fn new(config: SchedulerConfig) -> Self {
    Self {
      config,
      ..Default::default()
    }
  }

  pub fn running_count(&self) -> usize {
    self.active.len()
  }

  /// Puts an operation into the running set.
  pub fn start(&mut self, id: OperationId, request: OperationRequest) {
    trace!(op_id = %id, op_name = request.name.as_str(), "Operation entering running set.");
    self.active.insert(id, OperationRecord::new(id, request));
  }

  pub fn enqueue(&mut self, id: OperationId, request: OperationRequest) {
    self.queue.push_back(QueuedOperation { id, request });
    debug!(op_id = %id, queue_len = self.queue.len(), "Operation queued.");
  }

  /// Pops queued operations in FIFO order while queuing is enabled and the
  /// running set is below `max_concurrent`. Each popped operation is moved
  /// into the running set before returning, so the slot is already taken.
  pub fn take_startable(&mut self) -> Vec<QueuedOperation> {
    let mut startable = Vec::new();
    while self.config.queue_enabled && self.active.len() < self.config.max_concurrent {
      let Some(queued) = self.queue.pop_front() else {
        break;
      };
      self.start(queued.id, queued.request.clone());
      startable.push(queued);
    }
    if !startable.is_empty() {
      debug!(
        started = startable.len(),
        remaining = self.queue.len(),
        running = self.active.len(),
        "Drained queue."
      );
    }
    startable
  }

  /// Records the outcome of a running operation and moves it into history.
  /// Returns `None` if the operation is no longer running (cancelled).
  pub fn finish(&mut self, id: OperationId, outcome: OpOutput) -> Option<Finished> {
    let mut record = self.active.remove(&id)?;
    let status = if outcome.is_ok() {
      OperationStatus::Completed
    } else {
      OperationStatus::Failed
    };
    record.finish(status, outcome);
    let finished = Finished {
      name: record.request.name.clone(),
      on_complete: record.request.on_complete.clone(),
      notify_on_complete: self.config.notify_on_complete,
      notify_on_error: self.config.notify_on_error,
      evicted: Vec::new(),
    };
    let evicted = self.push_history(record);
    Some(Finished { evicted, ..finished })
  }

  /// Marks a running operation cancelled and moves it to the failed bucket.
  /// Queued, terminal or unknown operations are left alone.
  pub fn cancel(&mut self, id: OperationId) -> Option<Cancelled> {
    let mut record = self.active.remove(&id)?;
    record.finish(OperationStatus::Cancelled, Err("Cancelled".to_string()));
    let name = record.request.name.clone();
    let evicted = self.push_history(record);
    Some(Cancelled { name, evicted })
  }

  /// Charges one retry to a finished operation's record and returns the
  /// request to re-run. The cap is checked after counting the attempt.
  pub fn prepare_retry(&mut self, id: OperationId) -> Result<OperationRequest, RetryRefusal> {
    let retry_enabled = self.config.retry_enabled;
    let max_attempts = self.config.retry_max_attempts;
    let record = self
      .completed
      .get_mut(&id)
      .or_else(|| self.failed.get_mut(&id))
      .ok_or(RetryRefusal::NotInHistory)?;
    if !retry_enabled {
      return Err(RetryRefusal::Disabled);
    }
    record.request.retry_count = record.request.retry_count.saturating_add(1);
    if record.request.retry_count > max_attempts {
      return Err(RetryRefusal::Exhausted {
        name: record.request.name.clone(),
        max_attempts,
      });
    }
    Ok(record.request.clone())
  }

  pub fn status(&self, id: OperationId) -> Option<OperationStatus> {
    if let Some(record) = self.record(id) {
      return Some(record.status);
    }
    self
      .queue
      .iter()
      .any(|q| q.id == id)
      .then_some(OperationStatus::Queued)
  }

  /// Status plus outcome, for polling.
  pub fn poll(&self, id: OperationId) -> Option<(OperationStatus, Option<OpOutput>)> {
    match self.record(id) {
      Some(record) => Some((record.status, record.outcome.clone())),
      None => self.status(id).map(|status| (status, None)),
    }
  }

  pub fn details(&self, id: OperationId) -> Option<OperationDetails> {
    self.record(id).map(OperationRecord::details)
  }

  pub fn queued(&self, id: OperationId) -> Option<&QueuedOperation> {
    self.queue.iter().find(|q| q.id == id)
  }

  /// Running records ordered by submission.
  pub fn active_records(&self) -> Vec<&OperationRecord> {
    let mut records: Vec<&OperationRecord> = self.active.values().collect();
    records.sort_by_key(|r| r.id);
    records
  }

  pub fn queued_operations(&self) -> impl Iterator<Item = &QueuedOperation> {
    self.queue.iter()
  }

  pub fn stats(&self) -> OperationStats {
    let active = self.active.len();
    let completed = self.completed.len();
    let failed = self.failed.len();
    OperationStats {
      active,
      queued: self.queue.len(),
      completed,
      failed,
      total: active + completed + failed,
    }
  }

  pub fn clear_completed(&mut self) -> Vec<OperationId> {
    std::mem::take(&mut self.completed).into_keys().collect()
  }

  pub fn clear_failed(&mut self) -> Vec<OperationId> {
    std::mem::take(&mut self.failed).into_keys().collect()
  }

  fn record(&self, id: OperationId) -> Option<&OperationRecord> {
    self
      .active
      .get(&id)
      .or_else(|| self.completed.get(&id))
      .or_else(|| self.failed.get(&id))
  }

  fn push_history(&mut self, record: OperationRecord) -> Vec<OperationId> {
    let limit = self.config.history_limit;
    let bucket = match record.status {
      OperationStatus::Completed => &mut self.completed,
      _ => &mut self.failed,
    };
    bucket.insert(record.id, record);
    let mut evicted = Vec::new();
    while bucket.len() > limit {
      match bucket.pop_first() {
        Some((id, _)) => evicted.push(id),
        None => break,
      }
    }
    evicted
  }
}
