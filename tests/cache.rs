//! tests/cache.rs
//! TTL, invalidation and statistics of the result cache.

mod common;

use std::time::Duration as StdDuration;

use crate::common::{setup_tracing, RecordingNotifier};
use cmdkeeper::{CacheConfig, CacheKey, Invalidate, NotifyLevel, ResultCache};
use serde_json::json;

fn cache_with_ttl(ttl: StdDuration) -> ResultCache {
  ResultCache::new(CacheConfig { enabled: true, ttl })
}

#[tokio::test(start_paused = true)]
async fn test_entry_expires_after_ttl() {
  setup_tracing();
  let cache = cache_with_ttl(StdDuration::from_secs(30));
  cache.put(CacheKey::Ready, json!(["t-1", "t-2"]));

  tokio::time::advance(StdDuration::from_secs(29)).await;
  assert_eq!(cache.get(&CacheKey::Ready), Some(json!(["t-1", "t-2"])));

  tokio::time::advance(StdDuration::from_secs(1)).await;
  assert_eq!(cache.get(&CacheKey::Ready), None, "Entry at exactly TTL age must be stale");
}

#[tokio::test(start_paused = true)]
async fn test_set_ttl_applies_to_existing_entries() {
  setup_tracing();
  let cache = cache_with_ttl(StdDuration::from_secs(30));
  cache.put(CacheKey::Show("t-1".into()), json!({"id": "t-1"}));

  tokio::time::advance(StdDuration::from_secs(10)).await;
  cache.set_ttl(StdDuration::from_secs(5));
  assert_eq!(cache.ttl(), StdDuration::from_secs(5));
  assert_eq!(cache.get(&CacheKey::Show("t-1".into())), None);
}

#[tokio::test(start_paused = true)]
async fn test_expired_entries_are_dropped_on_lookup() {
  setup_tracing();
  let cache = cache_with_ttl(StdDuration::from_secs(5));
  cache.put(CacheKey::Show("t-1".into()), json!({"id": "t-1"}));
  cache.put(CacheKey::Ready, json!(["t-1"]));

  tokio::time::advance(StdDuration::from_secs(10)).await;
  assert_eq!(cache.get(&CacheKey::Show("t-1".into())), None);
  assert_eq!(cache.get(&CacheKey::Ready), None);

  // A longer TTL cannot revive what the stale lookups removed.
  cache.set_ttl(StdDuration::from_secs(60));
  assert_eq!(cache.get(&CacheKey::Show("t-1".into())), None);
  assert_eq!(cache.get(&CacheKey::Ready), None);
  assert_eq!(cache.stats().hits, 0);
}

#[tokio::test]
async fn test_invalidation_targets() {
  setup_tracing();
  let cache = ResultCache::default();
  cache.put(CacheKey::Ready, json!([]));
  cache.put(CacheKey::Show("a".into()), json!({"id": "a"}));
  cache.put(CacheKey::Show("b".into()), json!({"id": "b"}));

  cache.invalidate(Invalidate::Task("a".into()));
  assert!(cache.get(&CacheKey::Show("a".into())).is_none());
  assert!(cache.get(&CacheKey::Show("b".into())).is_some());
  assert!(cache.get(&CacheKey::Ready).is_some());

  cache.invalidate(Invalidate::List);
  assert!(cache.get(&CacheKey::Ready).is_none());
  assert!(cache.get(&CacheKey::Show("b".into())).is_some());

  // Unknown task ID is a no-op.
  cache.invalidate(Invalidate::Task("zzz".into()));

  cache.invalidate(Invalidate::All);
  assert!(cache.get(&CacheKey::Show("b".into())).is_none());
}

#[tokio::test]
async fn test_disable_clears_and_blocks_puts() {
  setup_tracing();
  let notifier = RecordingNotifier::new();
  let cache = ResultCache::default().with_notifier(notifier.clone());
  cache.put(CacheKey::Ready, json!([1]));

  cache.set_enabled(false);
  assert!(!cache.is_enabled());
  assert!(notifier.contains("Cache disabled and cleared", NotifyLevel::Info));

  cache.put(CacheKey::Ready, json!([2]));
  assert!(cache.get(&CacheKey::Ready).is_none(), "Disabled cache must not store");

  cache.set_enabled(true);
  assert!(cache.get(&CacheKey::Ready).is_none(), "Re-enabled cache starts cold");
  cache.put(CacheKey::Ready, json!([3]));
  assert_eq!(cache.get(&CacheKey::Ready), Some(json!([3])));
  assert_eq!(notifier.messages().len(), 1, "Only disabling notifies");
}

#[tokio::test]
async fn test_stats_hit_rate() {
  setup_tracing();
  let cache = ResultCache::default();
  let empty = cache.stats();
  assert_eq!((empty.hits, empty.misses, empty.total), (0, 0, 0));
  assert_eq!(empty.hit_rate, 0.0);

  cache.record_miss();
  cache.put(CacheKey::Ready, json!([]));
  for _ in 0..3 {
    assert!(cache.get(&CacheKey::Ready).is_some());
  }
  // A failed lookup on its own is not a miss.
  assert!(cache.get(&CacheKey::Show("nope".into())).is_none());

  let stats = cache.stats();
  assert_eq!(stats.hits, 3);
  assert_eq!(stats.misses, 1);
  assert_eq!(stats.total, 4);
  assert!((stats.hit_rate - 75.0).abs() < f64::EPSILON);

  cache.clear();
  assert_eq!(cache.stats().total, 4, "Clearing keeps counters");
}
