//! The synchronous boundary to the external issue-tracker CLI, and the cached
//! client that layers read-through caching and write invalidation over it.

use crate::cache::{CacheKey, Invalidate, ResultCache};
use crate::error::InvokeError;
use crate::operation::{blocking_op, OpFn};

use std::fmt;
use std::io::ErrorKind;
use std::process::Command;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, trace};

/// Executes one logical CLI operation and returns its parsed payload.
///
/// Calls may be slow (process spawn) and can run concurrently up to the
/// scheduler's concurrency limit. Expected failures are returned, not panicked.
pub trait Invoker: Send + Sync {
  fn invoke(&self, command: &str, args: &[String]) -> Result<Value, InvokeError>;
}

impl<T: Invoker + ?Sized> Invoker for Arc<T> {
  fn invoke(&self, command: &str, args: &[String]) -> Result<Value, InvokeError> {
    (**self).invoke(command, args)
  }
}

/// Runs `<program> <command> <args..> --json` and parses stdout as JSON.
#[derive(Debug, Clone)]
pub struct CliInvoker {
  program: String,
  json_flag: Option<String>,
}

impl CliInvoker {
  pub fn new(program: impl Into<String>) -> Self {
    Self {
      program: program.into(),
      json_flag: Some("--json".to_string()),
    }
  }

  /// Overrides (or with `None`, removes) the flag appended to request JSON.
  pub fn json_flag(mut self, flag: Option<&str>) -> Self {
    self.json_flag = flag.map(str::to_string);
    self
  }

  pub fn program(&self) -> &str {
    &self.program
  }
}

impl Invoker for CliInvoker {
  fn invoke(&self, command: &str, args: &[String]) -> Result<Value, InvokeError> {
    let mut cmd = Command::new(&self.program);
    cmd.arg(command).args(args);
    if let Some(flag) = &self.json_flag {
      cmd.arg(flag);
    }
    debug!(program = %self.program, command, ?args, "Invoking CLI.");

    let output = cmd.output().map_err(|e| match e.kind() {
      ErrorKind::NotFound => InvokeError::ToolMissing(self.program.clone()),
      _ => InvokeError::Io {
        command: command.to_string(),
        reason: e.to_string(),
      },
    })?;

    if !output.status.success() {
      return Err(InvokeError::NonZeroExit {
        command: command.to_string(),
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      });
    }

    parse_json_output(command, &output.stdout)
  }
}

/// Empty output parses as `null`; anything else must be valid JSON.
pub(crate) fn parse_json_output(command: &str, stdout: &[u8]) -> Result<Value, InvokeError> {
  if stdout.iter().all(u8::is_ascii_whitespace) {
    return Ok(Value::Null);
  }
  serde_json::from_slice(stdout).map_err(|e| InvokeError::MalformedOutput {
    command: command.to_string(),
    reason: e.to_string(),
  })
}

/// Adapts a single invoker command into an [`OpFn`]; the operation's
/// arguments become the command's arguments.
pub fn invoker_op(invoker: Arc<dyn Invoker>, command: &str) -> OpFn {
  let command = command.to_string();
  blocking_op(move |args| invoker.invoke(&command, &args).map_err(|e| e.to_string()))
}

fn split_task_id(command: TaskCommand, args: &[String]) -> Result<(&str, &[String]), InvokeError> {
  match args.split_first() {
    Some((id, rest)) => Ok((id.as_str(), rest)),
    None => Err(InvokeError::InvalidArguments {
      command: command.to_string(),
      reason: "missing task id".to_string(),
    }),
  }
}

/// The task commands the client knows how to cache or invalidate for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskCommand {
  Ready,
  Show,
  Create,
  Update,
  Close,
  Delete,
  Sync,
}

impl TaskCommand {
  pub fn as_str(&self) -> &'static str {
    match self {
      TaskCommand::Ready => "ready",
      TaskCommand::Show => "show",
      TaskCommand::Create => "create",
      TaskCommand::Update => "update",
      TaskCommand::Close => "close",
      TaskCommand::Delete => "delete",
      TaskCommand::Sync => "sync",
    }
  }
}

impl fmt::Display for TaskCommand {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Invoker wrapped with the result cache.
///
/// Reads (`ready`, `show`) are served from cache while fresh and only
/// successful results are stored. Successful writes invalidate the ready list
/// and, where a task ID is involved, that task's entry; `sync` clears all.
/// Invoker errors always pass through untouched.
#[derive(Clone)]
pub struct TaskClient {
  invoker: Arc<dyn Invoker>,
  cache: ResultCache,
}

impl fmt::Debug for TaskClient {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TaskClient")
      .field("invoker", &format_args!("<Invoker>"))
      .field("cache", &self.cache)
      .finish()
  }
}

impl TaskClient {
  pub fn new(invoker: Arc<dyn Invoker>, cache: ResultCache) -> Self {
    Self { invoker, cache }
  }

  pub fn cache(&self) -> &ResultCache {
    &self.cache
  }

  pub fn set_cache_enabled(&self, enabled: bool) {
    self.cache.set_enabled(enabled);
  }

  /// Lists ready tasks.
  pub fn ready(&self) -> Result<Value, InvokeError> {
    self.cached_read(CacheKey::Ready, TaskCommand::Ready, &[])
  }

  /// Shows one task.
  pub fn show(&self, id: &str) -> Result<Value, InvokeError> {
    self.cached_read(
      CacheKey::Show(id.to_string()),
      TaskCommand::Show,
      &[id.to_string()],
    )
  }

  pub fn create(&self, args: &[String]) -> Result<Value, InvokeError> {
    let result = self.invoker.invoke(TaskCommand::Create.as_str(), args)?;
    self.cache.invalidate(Invalidate::List);
    Ok(result)
  }

  pub fn update(&self, id: &str, args: &[String]) -> Result<Value, InvokeError> {
    self.write_task(TaskCommand::Update, id, args)
  }

  pub fn close(&self, id: &str, reason: Option<&str>) -> Result<Value, InvokeError> {
    let extra: Vec<String> = reason
      .map(|r| vec!["--reason".to_string(), r.to_string()])
      .unwrap_or_default();
    self.write_task(TaskCommand::Close, id, &extra)
  }

  pub fn delete(&self, id: &str) -> Result<Value, InvokeError> {
    self.write_task(TaskCommand::Delete, id, &[])
  }

  /// Syncs with the remote; any success clears the whole cache.
  pub fn sync(&self) -> Result<Value, InvokeError> {
    let result = self.invoker.invoke(TaskCommand::Sync.as_str(), &[])?;
    self.cache.invalidate(Invalidate::All);
    Ok(result)
  }

  /// Routes a command with positional arguments. For task-scoped commands
  /// the first argument is the task ID.
  pub fn dispatch(&self, command: TaskCommand, args: &[String]) -> Result<Value, InvokeError> {
    match command {
      TaskCommand::Ready => self.ready(),
      TaskCommand::Show => self.show(split_task_id(command, args)?.0),
      TaskCommand::Create => self.create(args),
      TaskCommand::Update | TaskCommand::Close | TaskCommand::Delete => {
        let (id, rest) = split_task_id(command, args)?;
        self.write_task(command, id, rest)
      }
      TaskCommand::Sync => self.sync(),
    }
  }

  /// An [`OpFn`] that runs `command` through this client on the blocking pool.
  pub fn op(&self, command: TaskCommand) -> OpFn {
    let client = self.clone();
    blocking_op(move |args| client.dispatch(command, &args).map_err(|e| e.to_string()))
  }

  fn cached_read(
    &self,
    key: CacheKey,
    command: TaskCommand,
    args: &[String],
  ) -> Result<Value, InvokeError> {
    if let Some(payload) = self.cache.get(&key) {
      return Ok(payload);
    }
    self.cache.record_miss();
    trace!(%key, %command, "Cache miss, invoking.");
    let payload = self.invoker.invoke(command.as_str(), args)?;
    self.cache.put(key, payload.clone());
    Ok(payload)
  }

  fn write_task(&self, command: TaskCommand, id: &str, args: &[String]) -> Result<Value, InvokeError> {
    let mut full_args = Vec::with_capacity(args.len() + 1);
    full_args.push(id.to_string());
    full_args.extend_from_slice(args);
    let result = self.invoker.invoke(command.as_str(), &full_args)?;
    self.cache.invalidate(Invalidate::List);
    self.cache.invalidate(Invalidate::Task(id.to_string()));
    Ok(result)
  }
}
