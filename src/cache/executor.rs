//! Cached query execution.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::backend::{CacheBackend, CacheBackendExt};
use super::config::MAX_TTL;
use super::keys::CacheKey;
use super::tags::TagSet;

pub(crate) const METRIC_HIT: &str = "tagstash_cache_hit_total";
pub(crate) const METRIC_MISS: &str = "tagstash_cache_miss_total";
pub(crate) const METRIC_BYPASS: &str = "tagstash_cache_bypass_total";
pub(crate) const METRIC_FLUSH: &str = "tagstash_cache_flush_total";
pub(crate) const METRIC_BACKEND_ERROR: &str = "tagstash_cache_backend_error_total";

/// Runs read producers through the cache backend.
#[derive(Clone)]
pub struct CachedQueryExecutor {
    backend: Arc<dyn CacheBackend>,
    enabled: bool,
}

impl CachedQueryExecutor {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            enabled: true,
        }
    }

    /// An executor that always runs producers directly.
    pub fn disabled(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    /// Produce the value for `key`, from the cache when allowed.
    ///
    /// With `use_cache` off, a zero `ttl` or a disabled executor the
    /// producer runs and the backend is not touched. TTLs above [`MAX_TTL`]
    /// are clamped.
    pub async fn execute<T, E, F, Fut>(
        &self,
        key: &CacheKey,
        tags: &TagSet,
        ttl: Duration,
        use_cache: bool,
        producer: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send,
        E: Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        if !self.enabled || !use_cache || ttl.is_zero() {
            counter!(METRIC_BYPASS).increment(1);
            debug!(cache = "query", outcome = "bypass", key = %key);
            return producer().await;
        }
        self.backend
            .remember(key, ttl.min(MAX_TTL), tags, producer)
            .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::{Value, json};

    use super::*;
    use crate::cache::backend::BackendError;
    use crate::cache::keys::generate;
    use crate::cache::memory::MemoryBackend;

    /// Backend whose every call fails as if the store were unreachable.
    pub(crate) struct UnreachableBackend {
        pub(crate) calls: AtomicUsize,
    }

    impl UnreachableBackend {
        pub(crate) fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CacheBackend for UnreachableBackend {
        async fn get(&self, _key: &CacheKey) -> Result<Option<Value>, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(BackendError::unavailable("connection refused"))
        }

        async fn put(
            &self,
            _key: &CacheKey,
            _value: Value,
            _tags: &TagSet,
            _ttl: Duration,
        ) -> Result<(), BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(BackendError::unavailable("connection refused"))
        }

        async fn flush_tags(&self, _tags: &TagSet) -> Result<(), BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(BackendError::unavailable("connection refused"))
        }
    }

    fn key() -> CacheKey {
        generate("shop", "Order.getByQuery", &json!({"status": "active"})).expect("key")
    }

    const TTL: Duration = Duration::from_secs(60);

    async fn run(
        executor: &CachedQueryExecutor,
        calls: &AtomicUsize,
        use_cache: bool,
    ) -> Result<Vec<i64>, String> {
        executor
            .execute(&key(), &TagSet::single("list.Order"), TTL, use_cache, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(vec![1, 2, 3])
            })
            .await
    }

    #[tokio::test]
    async fn warm_cache_skips_the_producer() {
        let executor = CachedQueryExecutor::new(Arc::new(MemoryBackend::new(16)));
        let calls = AtomicUsize::new(0);

        assert_eq!(run(&executor, &calls, true).await, Ok(vec![1, 2, 3]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(run(&executor, &calls, true).await, Ok(vec![1, 2, 3]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bypass_runs_the_producer_every_time() {
        let backend = Arc::new(MemoryBackend::new(16));
        let executor = CachedQueryExecutor::new(backend.clone());
        let calls = AtomicUsize::new(0);

        run(&executor, &calls, true).await.expect("warm up");
        for _ in 0..3 {
            run(&executor, &calls, false).await.expect("bypass");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn zero_ttl_never_touches_the_backend() {
        let backend = Arc::new(UnreachableBackend::new());
        let executor = CachedQueryExecutor::new(backend.clone());

        let value: Result<i64, String> = executor
            .execute(&key(), &TagSet::new(), Duration::ZERO, true, || async { Ok(7) })
            .await;

        assert_eq!(value, Ok(7));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn producer_errors_are_returned_and_not_cached() {
        let backend = Arc::new(MemoryBackend::new(16));
        let executor = CachedQueryExecutor::new(backend.clone());

        let failed: Result<i64, String> = executor
            .execute(&key(), &TagSet::new(), TTL, true, || async {
                Err("not found".to_string())
            })
            .await;
        assert_eq!(failed, Err("not found".to_string()));
        assert!(backend.get(&key()).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn unreachable_backend_degrades_to_direct_execution() {
        let backend = Arc::new(UnreachableBackend::new());
        let executor = CachedQueryExecutor::new(backend.clone());
        let calls = AtomicUsize::new(0);

        assert_eq!(run(&executor, &calls, true).await, Ok(vec![1, 2, 3]));
        assert_eq!(run(&executor, &calls, true).await, Ok(vec![1, 2, 3]));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn undecodable_entries_count_as_a_miss() {
        let backend = Arc::new(MemoryBackend::new(16));
        backend
            .put(&key(), json!("not a list"), &TagSet::new(), TTL)
            .await
            .expect("put");
        let executor = CachedQueryExecutor::new(backend);
        let calls = AtomicUsize::new(0);

        assert_eq!(run(&executor, &calls, true).await, Ok(vec![1, 2, 3]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(run(&executor, &calls, true).await, Ok(vec![1, 2, 3]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disabled_executor_never_caches() {
        let executor = CachedQueryExecutor::disabled(Arc::new(MemoryBackend::new(16)));
        let calls = AtomicUsize::new(0);
        run(&executor, &calls, true).await.expect("first");
        run(&executor, &calls, true).await.expect("second");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
