//! In-process cache backend.
//!
//! Entries live in an LRU bounded by the configured capacity and expire on
//! read once their TTL has passed. A [`TagIndex`] guarded by the same lock
//! maps tags to keys, so flushes and evictions keep both sides consistent.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use serde_json::Value;
use tracing::debug;

use super::backend::{BackendError, CacheBackend};
use super::config::MAX_TTL;
use super::keys::CacheKey;
use super::lock::mutex_lock;
use super::registry::TagIndex;
use super::tags::TagSet;

const SOURCE: &str = "cache::memory";

/// Expiry instant for `ttl`, clamped to [`MAX_TTL`] so the addition cannot
/// overflow.
fn deadline(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl.min(MAX_TTL))
        .or_else(|| now.checked_add(MAX_TTL))
        .unwrap_or(now)
}

struct StoredEntry {
    value: Value,
    expires_at: Instant,
}

struct MemoryState {
    entries: LruCache<CacheKey, StoredEntry>,
    index: TagIndex,
}

pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    /// Create a backend holding at most `capacity` entries (clamped to 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(MemoryState {
                entries: LruCache::new(capacity),
                index: TagIndex::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.state, SOURCE, "len").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tags recorded for `key`, empty when the key is not cached.
    pub fn tags_of(&self, key: &CacheKey) -> TagSet {
        mutex_lock(&self.state, SOURCE, "tags_of")
            .index
            .tags_for_key(key)
    }

    pub fn clear(&self) {
        let mut state = mutex_lock(&self.state, SOURCE, "clear");
        state.entries.clear();
        state.index.clear();
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &CacheKey) -> Result<Option<Value>, BackendError> {
        let mut state = mutex_lock(&self.state, SOURCE, "get");
        let expired = match state.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                return Ok(Some(entry.value.clone()));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            state.entries.pop(key);
            state.index.unregister(key);
        }
        Ok(None)
    }

    async fn put(
        &self,
        key: &CacheKey,
        value: Value,
        tags: &TagSet,
        ttl: Duration,
    ) -> Result<(), BackendError> {
        let entry = StoredEntry {
            value,
            expires_at: deadline(Instant::now(), ttl),
        };
        let mut state = mutex_lock(&self.state, SOURCE, "put");
        if let Some((evicted, _)) = state.entries.push(key.clone(), entry)
            && &evicted != key
        {
            debug!(cache = "memory", key = %evicted, "evicted least recently used entry");
            state.index.unregister(&evicted);
        }
        state.index.register(key.clone(), tags.clone());
        Ok(())
    }

    async fn flush_tags(&self, tags: &TagSet) -> Result<(), BackendError> {
        let mut state = mutex_lock(&self.state, SOURCE, "flush_tags");
        let affected = state.index.take_tagged(tags);
        for key in &affected {
            state.entries.pop(key);
        }
        debug!(
            cache = "memory",
            tag_count = tags.len(),
            evicted = affected.len(),
            "flushed tags"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::cache::keys::generate;

    fn key(id: i64) -> CacheKey {
        generate("shop", "Order.getById", &json!({ "id": id })).expect("key")
    }

    fn tags(names: &[&str]) -> TagSet {
        names.iter().copied().collect()
    }

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn stored_values_are_readable_until_flushed() {
        let backend = MemoryBackend::new(8);
        backend
            .put(&key(1), json!({"id": 1}), &tags(&["list.Order"]), MINUTE)
            .await
            .expect("put");

        assert_eq!(backend.get(&key(1)).await.expect("get"), Some(json!({"id": 1})));

        backend
            .flush_tags(&tags(&["list.Order"]))
            .await
            .expect("flush");
        assert_eq!(backend.get(&key(1)).await.expect("get"), None);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn flushing_one_tag_evicts_entries_with_any_matching_tag() {
        let backend = MemoryBackend::new(8);
        backend
            .put(&key(1), json!(1), &tags(&["a", "b"]), MINUTE)
            .await
            .expect("put");
        backend
            .put(&key(2), json!(2), &tags(&["c"]), MINUTE)
            .await
            .expect("put");

        backend.flush_tags(&tags(&["b"])).await.expect("flush");

        assert_eq!(backend.get(&key(1)).await.expect("get"), None);
        assert_eq!(backend.get(&key(2)).await.expect("get"), Some(json!(2)));
        assert!(backend.tags_of(&key(1)).is_empty());
    }

    #[tokio::test]
    async fn flushing_twice_is_harmless() {
        let backend = MemoryBackend::new(8);
        backend
            .put(&key(1), json!(1), &tags(&["a"]), MINUTE)
            .await
            .expect("put");
        backend.flush_tags(&tags(&["a"])).await.expect("first flush");
        backend.flush_tags(&tags(&["a"])).await.expect("second flush");
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn expired_entries_read_as_missing() {
        let backend = MemoryBackend::new(8);
        backend
            .put(&key(1), json!(1), &tags(&["a"]), Duration::from_millis(5))
            .await
            .expect("put");
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(backend.get(&key(1)).await.expect("get"), None);
        assert!(backend.tags_of(&key(1)).is_empty());
    }

    #[tokio::test]
    async fn lru_eviction_cleans_the_tag_index() {
        let backend = MemoryBackend::new(1);
        backend
            .put(&key(1), json!(1), &tags(&["a"]), MINUTE)
            .await
            .expect("put");
        backend
            .put(&key(2), json!(2), &tags(&["b"]), MINUTE)
            .await
            .expect("put");

        assert_eq!(backend.len(), 1);
        assert_eq!(backend.get(&key(1)).await.expect("get"), None);
        assert!(backend.tags_of(&key(1)).is_empty());
        assert!(backend.tags_of(&key(2)).contains("b"));
    }

    #[tokio::test]
    async fn overwriting_a_key_replaces_its_tags() {
        let backend = MemoryBackend::new(4);
        backend
            .put(&key(1), json!("old"), &tags(&["old"]), MINUTE)
            .await
            .expect("put");
        backend
            .put(&key(1), json!("new"), &tags(&["new"]), MINUTE)
            .await
            .expect("put");

        backend.flush_tags(&tags(&["old"])).await.expect("flush");
        assert_eq!(backend.get(&key(1)).await.expect("get"), Some(json!("new")));
    }

    #[tokio::test]
    async fn huge_ttls_are_clamped_instead_of_overflowing() {
        let backend = MemoryBackend::new(4);
        for ttl in [Duration::MAX, Duration::from_secs(u64::MAX), MAX_TTL] {
            backend
                .put(&key(1), json!(1), &tags(&["a"]), ttl)
                .await
                .expect("put");
            assert_eq!(backend.get(&key(1)).await.expect("get"), Some(json!(1)));
        }
    }

    #[test]
    fn deadline_never_exceeds_the_ttl_cap() {
        let now = Instant::now();
        assert_eq!(deadline(now, MINUTE), now + MINUTE);
        assert!(deadline(now, Duration::MAX) <= now + MAX_TTL);
    }
}
