//! CmdKeeper: Asynchronous Operations over a Synchronous Issue-Tracker CLI
//!
//! Wraps a slow, blocking command-line tool so interactive front ends stay
//! responsive: reads are served from a short-lived cache, and any call can be
//! run as a tracked background operation with bounded concurrency.
//!
//! # Features
//!
//! - [`ResultCache`]: TTL cache for the ready list and per-task details, with
//!   targeted invalidation and hit/miss statistics.
//! - [`TaskClient`]: cached reads and invalidating writes over any [`Invoker`]
//!   (the bundled [`CliInvoker`] spawns the tool and parses its JSON output).
//! - [`OperationScheduler`]:
//!   - `run` starts an operation immediately; `queue` defers it to a FIFO
//!     queue drained up to `max_concurrent`.
//!   - Completion callbacks and notifications through a [`Notifier`].
//!   - `wait` with a timeout, best-effort `cancel`, and capped `retry` with
//!     optional exponential backoff.
//!   - Bounded completed/failed history and statistics.
//!   - Built-in metrics collection (queryable snapshot using [`MetricsSnapshot`]).
//! - [`ProgressTracker`]: per-operation progress with percentages, text bars
//!   and message logs.
//! - Optional task-local operation context (`OperationContext`) for callables
//!   (requires the `op_context` feature, on by default).
//! - Optional Serde support for public types (requires the `serde` feature).
//!
//! # Usage
//!
//! ```no_run
//! use cmdkeeper::{
//!     CacheConfig, CliInvoker, OperationScheduler, ResultCache, TaskClient, TaskCommand,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // tracing_subscriber::fmt().with_env_filter("warn,cmdkeeper=info").init();
//!
//!     let client = TaskClient::new(
//!         Arc::new(CliInvoker::new("bd")),
//!         ResultCache::new(CacheConfig::default()),
//!     );
//!     let scheduler = OperationScheduler::builder().max_concurrent(2).build()?;
//!
//!     // Queue a sync and wait for it.
//!     let sync_id = scheduler.queue("Sync", client.op(TaskCommand::Sync), vec![], None);
//!     match scheduler.wait(sync_id, Some(Duration::from_secs(60))).await {
//!         Ok(output) => println!("Synced: {output}"),
//!         Err(e) => eprintln!("Sync did not finish: {e}"),
//!     }
//!
//!     // Cached read on the calling thread.
//!     let ready = client.ready()?;
//!     println!("Ready: {ready}");
//!
//!     // Inspect what is going on.
//!     for op in scheduler.get_active() {
//!         println!("{} {} {}%", op.id, op.name, op.percentage);
//!     }
//!     println!("{:?}", scheduler.get_stats());
//!     println!("{:#?}", scheduler.get_metrics_snapshot());
//!     Ok(())
//! }
//! ```
//!
//! # Configuration
//!
//! Use the [`SchedulerBuilder`] to configure the scheduler; every setting can
//! also be changed later through the matching `set_*` method:
//! - `max_concurrent`: Concurrency limit applied when draining the queue.
//! - `queue_enabled`: Pause or resume queue draining.
//! - `default_timeout`: Deadline for `wait` when none is given.
//! - `retry_enabled`, `retry_max_attempts`, `retry_backoff`: Retry policy.
//! - `notify_on_complete`, `notify_on_error`: Notification switches.
//! - `history_limit`: Size cap on each history bucket.
//!
//! # Operation Lifecycle
//!
//! `Queued -> Running -> Completed | Failed | Cancelled`. Terminal states never
//! change. Callables run on Tokio tasks; a panic is recorded as a failure with
//! the message `"Operation panicked"`.

// --- Feature-gated Documentation ---

// This empty module attaches the documentation block below only when
// the `op_context` feature is enabled during doc generation.
#[cfg(all(doc, feature = "op_context"))]
pub mod op_context_docs {
    //! # Accessing Operation Context (`op_context` feature)
    //!
    //! When the `op_context` feature is enabled, a running callable can access
    //! its own operation ID and name, and report progress, through Tokio's
    //! task-local context.
    //!
    //! 1.  **`try_get_current_operation_context() -> Option<OperationContext>`**:
    //!     Returns `None` if called outside a scheduler-managed callable.
    //! 2.  **`op_context!() -> OperationContext`**: Panics if called outside a
    //!     scheduler-managed callable.
    //!
    //! ```no_run
    //! # #[cfg(feature = "op_context")] {
    //! use cmdkeeper::{op_fn, try_get_current_operation_context};
    //! use serde_json::json;
    //!
    //! let import = op_fn! {
    //!     |args| {
    //!         if let Some(ctx) = try_get_current_operation_context() {
    //!             let progress = ctx.progress();
    //!             progress.set_total(args.len() as u64);
    //!             for file in &args {
    //!                 progress.increment(1, Some(file.as_str()));
    //!             }
    //!         }
    //!         Ok(json!({ "imported": args.len() }))
    //!     }
    //! };
    //! # let _ = import;
    //! # }
    //! ```
}

// Declare modules within the crate
pub mod cache;
mod coordinator;
pub mod error;
pub mod invoker;
mod macros;
pub mod metrics;
pub mod notifier;
pub mod operation;
pub mod progress;
pub mod scheduler;
mod worker;

// --- Public Re-exports ---

// Core scheduler components
pub use scheduler::{OperationScheduler, SchedulerBuilder, SchedulerConfig};

// Error types
pub use error::{BuildError, InvokeError, WaitError};

// Operation related types
pub use operation::{
  blocking_op, OnComplete, OpFn, OpOutput, OperationDetails, OperationId, OperationStats,
  OperationStatus, OperationSummary,
};
// Conditionally export context items
#[cfg(feature = "op_context")]
pub use operation::context::{try_get_current_operation_context, OperationContext, ProgressHandle};

// Cache and CLI access
pub use cache::{CacheConfig, CacheKey, CacheStats, Invalidate, ResultCache};
pub use invoker::{invoker_op, CliInvoker, Invoker, TaskClient, TaskCommand};

// Notifications and progress
pub use notifier::{Notifier, NotifyLevel, TracingNotifier};
pub use progress::{ProgressMessage, ProgressRecord, ProgressStatus, ProgressSummary, ProgressTracker};

// Metrics related types
pub use metrics::{MetricsSnapshot, SchedulerMetrics};
