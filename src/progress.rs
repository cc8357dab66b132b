//! Per-ID progress records.
//!
//! A [`ProgressTracker`] is a cloneable handle over a shared map of
//! [`ProgressRecord`]s. The scheduler creates one record per operation (keyed by
//! the operation ID) but the tracker is equally usable for progress that has
//! nothing to do with CLI operations, such as multi-step batch work.

use crate::operation::OpOutput;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

const FILLED: char = '█';
const EMPTY: char = '░';

/// Status of a progress record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ProgressStatus {
  Running,
  Completed,
  Failed,
}

/// A timestamped progress message.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProgressMessage {
  pub at: DateTime<Utc>,
  pub text: String,
}

/// Snapshot of a single progress record.
#[derive(Debug, Clone)]
pub struct ProgressRecord {
  pub id: String,
  pub title: String,
  /// `0` means indeterminate.
  pub total: u64,
  /// Clamped to `[0, total]` whenever `total > 0`.
  pub current: u64,
  pub status: ProgressStatus,
  pub started_at: DateTime<Utc>,
  pub ended_at: Option<DateTime<Utc>>,
  pub messages: Vec<ProgressMessage>,
  /// Present only when failed.
  pub error: Option<String>,
  /// Set by the operation helpers.
  pub outcome: Option<OpOutput>,
  started: Instant,
  ended: Option<Instant>,
}

impl ProgressRecord {
  fn new(id: &str, total: u64, title: &str) -> Self {
    Self {
      id: id.to_string(),
      title: title.to_string(),
      total,
      current: 0,
      status: ProgressStatus::Running,
      started_at: Utc::now(),
      ended_at: None,
      messages: Vec::new(),
      error: None,
      outcome: None,
      started: Instant::now(),
      ended: None,
    }
  }

  fn clamp(&self, value: u64) -> u64 {
    if self.total > 0 {
      value.min(self.total)
    } else {
      value
    }
  }

  fn push_message(&mut self, text: impl Into<String>) {
    self.messages.push(ProgressMessage {
      at: Utc::now(),
      text: text.into(),
    });
  }

  fn finalize(&mut self, status: ProgressStatus) {
    self.status = status;
    self.ended_at = Some(Utc::now());
    self.ended = Some(Instant::now());
  }

  pub fn is_running(&self) -> bool {
    self.status == ProgressStatus::Running
  }

  /// `floor(current / total * 100)`, or `0` when indeterminate.
  pub fn percentage(&self) -> u8 {
    if self.total == 0 {
      return 0;
    }
    let pct = self.current.saturating_mul(100) / self.total;
    pct.min(100) as u8
  }

  /// Time between start and end, or start and now while still running.
  pub fn elapsed(&self) -> Duration {
    match self.ended {
      Some(ended) => ended.saturating_duration_since(self.started),
      None => self.started.elapsed(),
    }
  }

  /// A block-character bar `width` cells wide, filled proportionally.
  pub fn bar(&self, width: usize) -> String {
    let filled = if self.total == 0 {
      0
    } else {
      let ratio = (self.current as u128 * width as u128) / self.total as u128;
      (ratio as usize).min(width)
    };
    let mut bar = String::with_capacity(width * FILLED.len_utf8());
    bar.extend(std::iter::repeat(FILLED).take(filled));
    bar.extend(std::iter::repeat(EMPTY).take(width - filled));
    bar
  }

  /// One-line summary: `[bar] NN% (current/total) title`.
  pub fn display(&self, width: usize) -> String {
    format!(
      "[{}] {}% ({}/{}) {}",
      self.bar(width),
      self.percentage(),
      self.current,
      self.total,
      self.title
    )
  }
}

/// Counts across every tracked record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProgressSummary {
  pub running: usize,
  pub completed: usize,
  pub failed: usize,
  pub total: usize,
}

/// Shared registry of progress records.
///
/// Calls naming an unknown ID are no-ops. Records are finalized exactly once;
/// later `update`/`complete`/`fail` calls on a finished record are ignored.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
  records: Arc<Mutex<HashMap<String, ProgressRecord>>>,
}

impl ProgressTracker {
  pub fn new() -> Self {
    Self::default()
  }

  /// Creates (or replaces) the record for `id`. `total == 0` is indeterminate.
  pub fn create(&self, id: &str, total: u64, title: &str) -> ProgressRecord {
    let record = ProgressRecord::new(id, total, title);
    debug!(progress_id = id, total, title, "Progress tracker created.");
    self.records.lock().insert(id.to_string(), record.clone());
    record
  }

  pub fn get(&self, id: &str) -> Option<ProgressRecord> {
    self.records.lock().get(id).cloned()
  }

  /// Sets `current` (clamped) and optionally appends a message.
  pub fn update(&self, id: &str, current: u64, message: Option<&str>) {
    self.with_running(id, |record| {
      record.current = record.clamp(current);
      if let Some(text) = message {
        record.push_message(text);
      }
    });
  }

  /// Advances `current` by `by` (clamped) and optionally appends a message.
  pub fn increment(&self, id: &str, by: u64, message: Option<&str>) {
    self.with_running(id, |record| {
      record.current = record.clamp(record.current.saturating_add(by));
      if let Some(text) = message {
        record.push_message(text);
      }
    });
  }

  /// Appends a message without moving progress.
  pub fn message(&self, id: &str, text: &str) {
    self.with_running(id, |record| record.push_message(text));
  }

  /// Changes the total, re-clamping `current`.
  pub fn set_total(&self, id: &str, total: u64) {
    self.with_running(id, |record| {
      record.total = total;
      record.current = record.clamp(record.current);
    });
  }

  /// Marks the record completed and forces `current = total`.
  pub fn complete(&self, id: &str, message: Option<&str>) {
    self.with_running(id, |record| {
      record.current = record.total;
      if let Some(text) = message {
        record.push_message(text);
      }
      record.finalize(ProgressStatus::Completed);
    });
  }

  /// Marks the record failed and records the error.
  pub fn fail(&self, id: &str, error: &str) {
    self.with_running(id, |record| {
      record.error = Some(error.to_string());
      record.push_message(format!("Error: {error}"));
      record.finalize(ProgressStatus::Failed);
    });
  }

  pub fn percentage(&self, id: &str) -> u8 {
    self.records.lock().get(id).map_or(0, ProgressRecord::percentage)
  }

  pub fn bar(&self, id: &str, width: usize) -> Option<String> {
    self.records.lock().get(id).map(|r| r.bar(width))
  }

  pub fn display(&self, id: &str, width: usize) -> Option<String> {
    self.records.lock().get(id).map(|r| r.display(width))
  }

  pub fn elapsed(&self, id: &str) -> Option<Duration> {
    self.records.lock().get(id).map(ProgressRecord::elapsed)
  }

  /// Records still running, oldest first.
  pub fn get_active(&self) -> Vec<ProgressRecord> {
    let mut active: Vec<ProgressRecord> = self
      .records
      .lock()
      .values()
      .filter(|r| r.is_running())
      .cloned()
      .collect();
    active.sort_by_key(|r| r.started);
    active
  }

  pub fn summary(&self) -> ProgressSummary {
    let records = self.records.lock();
    let mut summary = ProgressSummary {
      total: records.len(),
      ..Default::default()
    };
    for record in records.values() {
      match record.status {
        ProgressStatus::Running => summary.running += 1,
        ProgressStatus::Completed => summary.completed += 1,
        ProgressStatus::Failed => summary.failed += 1,
      }
    }
    summary
  }

  /// Removes one record. Returns whether it existed.
  pub fn clear(&self, id: &str) -> bool {
    self.records.lock().remove(id).is_some()
  }

  /// Removes every finished (completed or failed) record.
  pub fn clear_completed(&self) -> usize {
    let mut records = self.records.lock();
    let before = records.len();
    records.retain(|_, r| r.is_running());
    before - records.len()
  }

  pub fn clear_all(&self) {
    self.records.lock().clear();
  }

  // --- Operation helpers ---

  /// A single-step tracker for an operation.
  pub fn create_operation(&self, id: &str, name: &str) -> ProgressRecord {
    self.create(id, 1, name)
  }

  pub fn succeed_operation(&self, id: &str, result: serde_json::Value) {
    self.with_running(id, |record| {
      record.outcome = Some(Ok(result));
      record.current = record.total;
      record.push_message("Completed");
      record.finalize(ProgressStatus::Completed);
    });
  }

  pub fn fail_operation(&self, id: &str, error: &str) {
    self.with_running(id, |record| {
      record.outcome = Some(Err(error.to_string()));
      record.error = Some(error.to_string());
      record.push_message(format!("Error: {error}"));
      record.finalize(ProgressStatus::Failed);
    });
  }

  pub fn get_operation_result(&self, id: &str) -> Option<OpOutput> {
    self.records.lock().get(id).and_then(|r| r.outcome.clone())
  }

  /// `None` until the operation has finished.
  pub fn is_operation_success(&self, id: &str) -> Option<bool> {
    self
      .records
      .lock()
      .get(id)
      .and_then(|r| r.outcome.as_ref().map(|o| o.is_ok()))
  }

  fn with_running(&self, id: &str, f: impl FnOnce(&mut ProgressRecord)) {
    let mut records = self.records.lock();
    match records.get_mut(id) {
      Some(record) if record.is_running() => f(record),
      Some(_) => trace!(progress_id = id, "Ignoring change to a finished tracker."),
      None => trace!(progress_id = id, "Ignoring change to an unknown tracker."),
    }
  }
}
