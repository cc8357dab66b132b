//! tests/common.rs
//! Shared helper functions for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use cmdkeeper::{
  error::BuildError, InvokeError, Invoker, Notifier, NotifyLevel, OpFn, OpOutput,
  OperationScheduler, SchedulerBuilder,
};
use parking_lot::Mutex;
use serde_json::Value;
use tracing_subscriber::fmt::TestWriter;

// Initializes tracing subscriber for test output.
pub fn setup_tracing() {
  // Use try_init to avoid panic if called multiple times
  let _ = tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_writer(TestWriter::new())
    .with_test_writer()
    .try_init();
}

// Builds a scheduler with the given concurrency that reports into `notifier`.
pub fn build_scheduler(
  max_concurrent: usize,
  notifier: Arc<RecordingNotifier>,
) -> Result<OperationScheduler, BuildError> {
  builder(max_concurrent, notifier).build()
}

pub fn builder(max_concurrent: usize, notifier: Arc<RecordingNotifier>) -> SchedulerBuilder {
  OperationScheduler::builder()
    .max_concurrent(max_concurrent)
    .notifier(notifier)
}

// --- Notifier ---

/// Collects every notification for later assertions.
#[derive(Default)]
pub struct RecordingNotifier {
  messages: Mutex<Vec<(String, NotifyLevel)>>,
}

impl RecordingNotifier {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn messages(&self) -> Vec<(String, NotifyLevel)> {
    self.messages.lock().clone()
  }

  pub fn count(&self, level: NotifyLevel) -> usize {
    self.messages.lock().iter().filter(|(_, l)| *l == level).count()
  }

  pub fn contains(&self, message: &str, level: NotifyLevel) -> bool {
    self
      .messages
      .lock()
      .iter()
      .any(|(m, l)| m == message && *l == level)
  }
}

impl Notifier for RecordingNotifier {
  fn notify(&self, message: &str, level: NotifyLevel) {
    tracing::debug!(%level, message, "Test notifier received message");
    self.messages.lock().push((message.to_string(), level));
  }
}

// --- Invoker ---

/// In-memory invoker with canned responses per command and call recording.
#[derive(Default)]
pub struct MockInvoker {
  responses: Mutex<HashMap<String, Result<Value, InvokeError>>>,
  calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl MockInvoker {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn respond(&self, command: &str, response: Result<Value, InvokeError>) {
    self.responses.lock().insert(command.to_string(), response);
  }

  pub fn calls(&self) -> Vec<(String, Vec<String>)> {
    self.calls.lock().clone()
  }

  pub fn call_count(&self, command: &str) -> usize {
    self.calls.lock().iter().filter(|(c, _)| c == command).count()
  }
}

impl Invoker for MockInvoker {
  fn invoke(&self, command: &str, args: &[String]) -> Result<Value, InvokeError> {
    self.calls.lock().push((command.to_string(), args.to_vec()));
    self
      .responses
      .lock()
      .get(command)
      .cloned()
      .unwrap_or(Ok(Value::Null))
  }
}

// --- Operation callables ---

// Resolves to `value` after `delay`.
pub fn op_value_after(delay: StdDuration, value: Value) -> OpFn {
  Arc::new(move |_args| {
    let value = value.clone();
    Box::pin(async move {
      if delay > StdDuration::ZERO {
        tokio::time::sleep(delay).await;
      }
      Ok(value)
    })
  })
}

// Fails with `message` after `delay`.
pub fn op_fail_after(delay: StdDuration, message: &str) -> OpFn {
  let message = message.to_string();
  Arc::new(move |_args| {
    let message = message.clone();
    Box::pin(async move {
      if delay > StdDuration::ZERO {
        tokio::time::sleep(delay).await;
      }
      Err(message)
    })
  })
}

// Echoes its arguments back as a JSON array.
pub fn op_echo_args() -> OpFn {
  Arc::new(move |args| Box::pin(async move { Ok(Value::from(args)) }))
}

// Creates an operation that panics.
pub fn op_panic() -> OpFn {
  Arc::new(move |_args| {
    Box::pin(async move {
      tracing::debug!("Panic op executing...");
      tokio::task::yield_now().await;
      panic!("Operation forced panic!");
      #[allow(unreachable_code)]
      Ok(Value::Null)
    })
  })
}

// Never resolves.
pub fn op_pending() -> OpFn {
  Arc::new(move |_args| Box::pin(std::future::pending::<OpOutput>()))
}

// Counts invocations, waits `delay`, then succeeds or fails.
pub fn op_counter(counter: Arc<AtomicUsize>, delay: StdDuration, succeeds: bool) -> OpFn {
  Arc::new(move |_args| {
    let ctr = counter.clone();
    Box::pin(async move {
      let count = ctr.fetch_add(1, Ordering::SeqCst) + 1;
      tracing::debug!(count, succeeds, "Counter op executing");
      if delay > StdDuration::ZERO {
        tokio::time::sleep(delay).await;
      }
      if succeeds {
        Ok(Value::from(count))
      } else {
        Err(format!("attempt {count} failed"))
      }
    })
  })
}

// Appends `label` to `order` when it starts, then sleeps.
pub fn op_record_start(order: Arc<Mutex<Vec<String>>>, label: &str, delay: StdDuration) -> OpFn {
  let label = label.to_string();
  Arc::new(move |_args| {
    let order = order.clone();
    let label = label.clone();
    Box::pin(async move {
      order.lock().push(label.clone());
      tokio::time::sleep(delay).await;
      Ok(Value::from(label))
    })
  })
}

// Increments active count on start, decrements on end. Updates max observed.
pub fn op_concurrency_tracker(
  active_counter: Arc<AtomicUsize>,
  max_observed_active: Arc<AtomicUsize>,
  delay: StdDuration,
) -> OpFn {
  Arc::new(move |_args| {
    let active = active_counter.clone();
    let max_obs = max_observed_active.clone();
    Box::pin(async move {
      let current_active = active.fetch_add(1, Ordering::SeqCst) + 1;
      max_obs.fetch_max(current_active, Ordering::SeqCst);
      tokio::time::sleep(delay).await;
      active.fetch_sub(1, Ordering::SeqCst);
      Ok(Value::Null)
    })
  })
}
