//! tests/retry.rs
//! Manual retries: lineage counting, the attempt cap, and backoff.

mod common;

use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use std::time::Duration as StdDuration;

use crate::common::{
  build_scheduler, builder, op_counter, op_pending, setup_tracing, RecordingNotifier,
};
use cmdkeeper::{NotifyLevel, OperationStatus, WaitError};
use serde_json::json;

#[tokio::test(start_paused = true)]
async fn test_retry_runs_under_new_id() {
  setup_tracing();
  let scheduler = build_scheduler(2, RecordingNotifier::new()).unwrap();
  let counter = Arc::new(AtomicUsize::new(0));

  let id = scheduler.run(
    "Flaky",
    op_counter(counter.clone(), StdDuration::ZERO, false),
    vec!["t-1".into()],
    None,
  );
  assert_eq!(
    scheduler.wait(id, None).await,
    Err(WaitError::Failed("attempt 1 failed".to_string()))
  );

  let retried = scheduler.retry(id).expect("retry should be accepted");
  assert_ne!(retried, id);
  assert_eq!(
    scheduler.wait(retried, None).await,
    Err(WaitError::Failed("attempt 2 failed".to_string()))
  );

  let details = scheduler.get_operation(retried).unwrap();
  assert_eq!(details.name, "Flaky");
  assert_eq!(details.args, vec!["t-1".to_string()]);
  assert_eq!(details.retry_count, 1);
  assert_eq!(scheduler.get_status(id), Some(OperationStatus::Failed));
  assert_eq!(scheduler.get_metrics_snapshot().ops_retried, 1);
}

#[tokio::test(start_paused = true)]
async fn test_completed_operations_can_be_retried() {
  setup_tracing();
  let scheduler = build_scheduler(1, RecordingNotifier::new()).unwrap();
  let counter = Arc::new(AtomicUsize::new(0));

  let id = scheduler.run("Refresh", op_counter(counter.clone(), StdDuration::ZERO, true), vec![], None);
  assert_eq!(scheduler.wait(id, None).await, Ok(json!(1)));
  let again = scheduler.retry(id).unwrap();
  assert_eq!(scheduler.wait(again, None).await, Ok(json!(2)));
}

#[tokio::test(start_paused = true)]
async fn test_retry_cap_warns() {
  setup_tracing();
  let notifier = RecordingNotifier::new();
  let scheduler = builder(1, notifier.clone())
    .retry_max_attempts(2)
    .notify_on_error(false)
    .build()
    .unwrap();
  let counter = Arc::new(AtomicUsize::new(0));

  let id = scheduler.run("Flaky", op_counter(counter.clone(), StdDuration::ZERO, false), vec![], None);
  let _ = scheduler.wait(id, None).await;

  let first = scheduler.retry(id).unwrap();
  let _ = scheduler.wait(first, None).await;
  let second = scheduler.retry(first).unwrap();
  let _ = scheduler.wait(second, None).await;
  assert_eq!(scheduler.get_operation(second).unwrap().retry_count, 2);

  assert_eq!(scheduler.retry(second), None);
  assert!(notifier.contains("Max retries (2) reached for Flaky", NotifyLevel::Warn));
  assert_eq!(counter.load(Ordering::SeqCst), 3);

  let metrics = scheduler.get_metrics_snapshot();
  assert_eq!(metrics.ops_retried, 2);
  assert_eq!(metrics.retries_refused, 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_refused_outside_history() {
  setup_tracing();
  let notifier = RecordingNotifier::new();
  let scheduler = build_scheduler(1, notifier.clone()).unwrap();

  let running = scheduler.run("Running", op_pending(), vec![], None);
  assert_eq!(scheduler.retry(running), None);
  assert_eq!(scheduler.retry("op_55555555".parse().unwrap()), None);
  assert!(notifier.messages().is_empty());
  assert_eq!(scheduler.get_metrics_snapshot().retries_refused, 0);
}

#[tokio::test(start_paused = true)]
async fn test_retry_disabled() {
  setup_tracing();
  let scheduler = build_scheduler(1, RecordingNotifier::new()).unwrap();
  scheduler.set_retry_enabled(false);
  assert!(!scheduler.retry_enabled());

  let id = scheduler.run(
    "Once",
    op_counter(Arc::new(AtomicUsize::new(0)), StdDuration::ZERO, false),
    vec![],
    None,
  );
  let _ = scheduler.wait(id, None).await;
  assert_eq!(scheduler.retry(id), None);
  assert_eq!(scheduler.get_metrics_snapshot().retries_refused, 1);

  scheduler.set_retry_enabled(true);
  assert!(scheduler.retry(id).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_retry_backoff_delays_start() {
  setup_tracing();
  let scheduler = builder(1, RecordingNotifier::new())
    .retry_backoff(StdDuration::from_millis(100))
    .build()
    .unwrap();
  let counter = Arc::new(AtomicUsize::new(0));

  let id = scheduler.run("Backoff", op_counter(counter.clone(), StdDuration::ZERO, false), vec![], None);
  let _ = scheduler.wait(id, None).await;
  assert_eq!(counter.load(Ordering::SeqCst), 1);

  // First retry waits base * 2^0.
  let first = scheduler.retry(id).unwrap();
  assert_eq!(scheduler.get_status(first), Some(OperationStatus::Running));
  tokio::time::sleep(StdDuration::from_millis(90)).await;
  assert_eq!(counter.load(Ordering::SeqCst), 1);
  tokio::time::sleep(StdDuration::from_millis(20)).await;
  assert_eq!(counter.load(Ordering::SeqCst), 2);
  let _ = scheduler.wait(first, None).await;

  // Second retry waits base * 2^1.
  let second = scheduler.retry(first).unwrap();
  tokio::time::sleep(StdDuration::from_millis(190)).await;
  assert_eq!(counter.load(Ordering::SeqCst), 2);
  tokio::time::sleep(StdDuration::from_millis(20)).await;
  assert_eq!(counter.load(Ordering::SeqCst), 3);
  let _ = scheduler.wait(second, None).await;
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff_skips_callable() {
  setup_tracing();
  let scheduler = builder(1, RecordingNotifier::new())
    .retry_backoff(StdDuration::from_millis(100))
    .build()
    .unwrap();
  let counter = Arc::new(AtomicUsize::new(0));

  let id = scheduler.run("Skip", op_counter(counter.clone(), StdDuration::ZERO, false), vec![], None);
  let _ = scheduler.wait(id, None).await;

  let retried = scheduler.retry(id).unwrap();
  scheduler.cancel(retried);
  tokio::time::sleep(StdDuration::from_millis(300)).await;
  assert_eq!(counter.load(Ordering::SeqCst), 1);
  assert_eq!(scheduler.get_status(retried), Some(OperationStatus::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn test_branched_retries_are_capped_per_branch() {
  setup_tracing();
  let scheduler = builder(1, RecordingNotifier::new())
    .retry_max_attempts(2)
    .notify_on_error(false)
    .build()
    .unwrap();
  let counter = Arc::new(AtomicUsize::new(0));

  let root = scheduler.run("Branchy", op_counter(counter.clone(), StdDuration::ZERO, false), vec![], None);
  let _ = scheduler.wait(root, None).await;

  let left = scheduler.retry(root).unwrap();
  let _ = scheduler.wait(left, None).await;
  let right = scheduler.retry(root).unwrap();
  let _ = scheduler.wait(right, None).await;
  assert_eq!(scheduler.get_operation(left).unwrap().retry_count, 1);
  assert_eq!(scheduler.get_operation(right).unwrap().retry_count, 2);

  // The root has used its budget, but the left branch still has one retry.
  assert_eq!(scheduler.retry(root), None);
  let left_again = scheduler.retry(left).unwrap();
  let _ = scheduler.wait(left_again, None).await;
  assert_eq!(scheduler.retry(right), None);

  assert_eq!(counter.load(Ordering::SeqCst), 4);
}
