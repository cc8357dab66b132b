use crate::metrics::SchedulerMetrics;
use crate::operation::{OpOutput, OperationId, OperationRequest};
use crate::scheduler::OperationScheduler;

#[cfg(feature = "op_context")]
use crate::operation::context::{OperationContext, CURRENT_OPERATION_CONTEXT};

use std::panic::{catch_unwind, AssertUnwindSafe};

use tokio::time::Instant;
use tracing::{debug, error, info, Instrument};

/// Drives a single operation: waits out any retry backoff, runs the callable
/// on its own task, and reports the outcome back to the scheduler.
pub(crate) struct Worker {
  scheduler: OperationScheduler,
  op_id: OperationId,
  request: OperationRequest,
}

impl Worker {
  pub fn new(scheduler: OperationScheduler, op_id: OperationId, request: OperationRequest) -> Self {
    Self {
      scheduler,
      op_id,
      request,
    }
  }

  pub async fn run(self) {
    let op_span = tracing::span!(
      tracing::Level::INFO,
      "op_exec",
      op_id = %self.op_id,
      op_name = self.request.name.as_str()
    );
    self.execute_and_handle().instrument(op_span).await;
  }

  async fn execute_and_handle(self) {
    if !self.request.start_delay.is_zero() {
      debug!(delay_ms = self.request.start_delay.as_millis(), "Waiting out retry backoff.");
      tokio::time::sleep(self.request.start_delay).await;
      if !self.scheduler.is_running(self.op_id) {
        debug!("Operation left the running set during backoff, not starting.");
        return;
      }
    }

    SchedulerMetrics::incr(&self.scheduler.metrics().ops_started);
    info!(args = ?self.request.args, "Starting operation.");
    let start = Instant::now();
    let outcome = self.execute_logic().await;
    let duration = start.elapsed();

    self.scheduler.metrics().op_execution_duration.record(duration);
    let outcome_str = match &outcome {
      Ok(_) => "Success",
      Err(_) => "Fail",
    };
    info!(
      duration_ms = duration.as_millis(),
      outcome = outcome_str,
      "Finished operation."
    );

    self.scheduler.complete_operation(self.op_id, outcome);
  }

  /// Runs the callable, turning a panic into a failed outcome.
  async fn execute_logic(&self) -> OpOutput {
    let exec_fn = &self.request.exec_fn;
    let args = self.request.args.clone();
    let future_to_run = match catch_unwind(AssertUnwindSafe(|| exec_fn(args))) {
      Ok(future) => future,
      Err(_) => {
        error!("Operation callable panicked before returning a future!");
        SchedulerMetrics::incr(&self.scheduler.metrics().ops_panicked);
        return Err("Operation panicked".to_string());
      }
    };

    #[cfg(feature = "op_context")]
    let task = {
      let context = OperationContext::new(
        self.op_id,
        self.request.name.clone(),
        self.scheduler.progress().clone(),
      );
      tokio::spawn(CURRENT_OPERATION_CONTEXT.scope(context, future_to_run))
    };
    #[cfg(not(feature = "op_context"))]
    let task = tokio::spawn(future_to_run);

    match task.await {
      Ok(output) => output,
      Err(join_error) if join_error.is_panic() => {
        error!("Operation callable panicked!");
        SchedulerMetrics::incr(&self.scheduler.metrics().ops_panicked);
        Err("Operation panicked".to_string())
      }
      Err(join_error) => {
        error!(error = %join_error, "Operation task was aborted.");
        Err(format!("Operation aborted: {join_error}"))
      }
    }
  }
}
