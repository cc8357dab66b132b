//! In-memory TTL cache for CLI read results.
//!
//! Holds one slot for the ready list and one entry per task ID for details.
//! Only successful fetches are stored; callers decide when a lookup turns into
//! a real fetch, so misses are recorded by the caller through
//! [`ResultCache::record_miss`].

use crate::notifier::{Notifier, NotifyLevel};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, trace};

const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// What a cache lookup is for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
  /// The ready-task list.
  Ready,
  /// Details for one task ID.
  Show(String),
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      CacheKey::Ready => f.write_str("ready"),
      CacheKey::Show(id) => write!(f, "show:{id}"),
    }
  }
}

/// Which entries an invalidation removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidate {
  /// One task's detail entry.
  Task(String),
  /// The ready-list slot.
  List,
  /// Everything.
  All,
}

/// Initial cache settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CacheConfig {
  pub enabled: bool,
  pub ttl: Duration,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      ttl: DEFAULT_TTL,
    }
  }
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CacheStats {
  pub hits: u64,
  pub misses: u64,
  pub total: u64,
  /// Percentage of lookups served from cache; `0.0` before any lookup.
  pub hit_rate: f64,
}

#[derive(Debug, Clone)]
struct CacheEntry {
  payload: Value,
  fetched_at: Instant,
}

#[derive(Debug)]
struct CacheState {
  enabled: bool,
  ttl: Duration,
  ready: Option<CacheEntry>,
  show: HashMap<String, CacheEntry>,
  hits: u64,
  misses: u64,
}

impl CacheState {
  fn slot(&self, key: &CacheKey) -> Option<&CacheEntry> {
    match key {
      CacheKey::Ready => self.ready.as_ref(),
      CacheKey::Show(id) => self.show.get(id),
    }
  }

  fn is_valid(&self, entry: &CacheEntry) -> bool {
    self.enabled && entry.fetched_at.elapsed() < self.ttl
  }

  fn remove(&mut self, key: &CacheKey) {
    match key {
      CacheKey::Ready => self.ready = None,
      CacheKey::Show(id) => {
        self.show.remove(id);
      }
    }
  }

  fn clear(&mut self) {
    self.ready = None;
    self.show.clear();
  }
}

/// Thread-safe TTL cache sitting in front of the invoker.
#[derive(Clone)]
pub struct ResultCache {
  state: Arc<Mutex<CacheState>>,
  notifier: Option<Arc<dyn Notifier>>,
}

impl fmt::Debug for ResultCache {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ResultCache")
      .field("state", &self.state)
      .field("notifier", &self.notifier.as_ref().map(|_| "<Notifier>"))
      .finish()
  }
}

impl Default for ResultCache {
  fn default() -> Self {
    Self::new(CacheConfig::default())
  }
}

impl ResultCache {
  pub fn new(config: CacheConfig) -> Self {
    Self {
      state: Arc::new(Mutex::new(CacheState {
        enabled: config.enabled,
        ttl: config.ttl,
        ready: None,
        show: HashMap::new(),
        hits: 0,
        misses: 0,
      })),
      notifier: None,
    }
  }

  /// Sends a notification when the cache is switched off.
  pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
    self.notifier = Some(notifier);
    self
  }

  /// Returns the payload if the entry exists and is still fresh. A hit bumps
  /// the hit counter; an expired entry is removed.
  pub fn get(&self, key: &CacheKey) -> Option<Value> {
    let mut state = self.state.lock();
    let (payload, fresh) = match state.slot(key) {
      Some(entry) => (entry.payload.clone(), state.is_valid(entry)),
      None => return None,
    };
    if !fresh {
      trace!(%key, "Cache entry expired, dropping.");
      state.remove(key);
      return None;
    }
    state.hits += 1;
    trace!(%key, hits = state.hits, "Cache hit.");
    Some(payload)
  }

  /// Counts a lookup that went on to a real fetch.
  pub fn record_miss(&self) {
    let mut state = self.state.lock();
    state.misses += 1;
  }

  /// Stores `payload` stamped with the current time. No-op while disabled.
  pub fn put(&self, key: CacheKey, payload: Value) {
    let mut state = self.state.lock();
    if !state.enabled {
      return;
    }
    let entry = CacheEntry {
      payload,
      fetched_at: Instant::now(),
    };
    trace!(%key, "Cache store.");
    match key {
      CacheKey::Ready => state.ready = Some(entry),
      CacheKey::Show(id) => {
        state.show.insert(id, entry);
      }
    }
  }

  pub fn invalidate(&self, target: Invalidate) {
    let mut state = self.state.lock();
    debug!(?target, "Cache invalidated.");
    match target {
      Invalidate::Task(id) => {
        state.show.remove(&id);
      }
      Invalidate::List => state.ready = None,
      Invalidate::All => state.clear(),
    }
  }

  /// Drops every entry. Counters are kept.
  pub fn clear(&self) {
    self.state.lock().clear();
  }

  pub fn is_enabled(&self) -> bool {
    self.state.lock().enabled
  }

  /// Disabling also drops every entry so a later re-enable starts cold.
  pub fn set_enabled(&self, enabled: bool) {
    {
      let mut state = self.state.lock();
      state.enabled = enabled;
      if !enabled {
        state.clear();
      }
    }
    info!(enabled, "Cache toggled.");
    if !enabled {
      if let Some(notifier) = &self.notifier {
        notifier.notify("Cache disabled and cleared", NotifyLevel::Info);
      }
    }
  }

  pub fn ttl(&self) -> Duration {
    self.state.lock().ttl
  }

  /// Affects future validity checks only; entries keep their fetch time.
  pub fn set_ttl(&self, ttl: Duration) {
    self.state.lock().ttl = ttl;
  }

  pub fn stats(&self) -> CacheStats {
    let state = self.state.lock();
    let total = state.hits + state.misses;
    let hit_rate = if total == 0 {
      0.0
    } else {
      state.hits as f64 / total as f64 * 100.0
    };
    CacheStats {
      hits: state.hits,
      misses: state.misses,
      total,
      hit_rate,
    }
  }
}
