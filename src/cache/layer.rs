//! Wiring of the cache components around one shared backend.

use std::sync::Arc;

use metrics::counter;
use tracing::info;

use super::backend::{BackendError, CacheBackend};
use super::config::CacheConfig;
use super::executor::{CachedQueryExecutor, METRIC_BACKEND_ERROR, METRIC_FLUSH};
use super::invalidator::MutationInvalidator;
use super::memory::MemoryBackend;
use super::scope::RequestScope;
use super::tags::TagPolicy;

/// Everything a repository or the request boundary needs from the cache.
#[derive(Clone)]
pub struct CacheLayer {
    config: CacheConfig,
    backend: Arc<dyn CacheBackend>,
    policy: TagPolicy,
    executor: CachedQueryExecutor,
    invalidator: MutationInvalidator,
    scope: RequestScope,
}

impl CacheLayer {
    pub fn new(config: CacheConfig, backend: Arc<dyn CacheBackend>) -> Self {
        let policy = TagPolicy::new(config.namespace.clone(), config.global_tag.clone());
        let executor = if config.enabled {
            CachedQueryExecutor::new(backend.clone())
        } else {
            CachedQueryExecutor::disabled(backend.clone())
        };
        let invalidator = MutationInvalidator::new(backend.clone(), policy.clone());
        let scope = RequestScope::new(backend.clone());
        Self {
            config,
            backend,
            policy,
            executor,
            invalidator,
            scope,
        }
    }

    /// A layer over a fresh in-process backend sized by `config`.
    pub fn in_memory(config: CacheConfig) -> Self {
        let backend = Arc::new(MemoryBackend::new(config.memory_capacity_non_zero().get()));
        Self::new(config, backend)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    pub fn policy(&self) -> &TagPolicy {
        &self.policy
    }

    pub fn executor(&self) -> &CachedQueryExecutor {
        &self.executor
    }

    pub fn invalidator(&self) -> &MutationInvalidator {
        &self.invalidator
    }

    pub fn scope(&self) -> &RequestScope {
        &self.scope
    }

    /// Flush the global tag, evicting every cached query result.
    ///
    /// Unlike request and mutation flushes this reports backend failures.
    pub async fn flush_all(&self) -> Result<(), BackendError> {
        let tags = self.policy.global();
        match self.backend.flush_tags(&tags).await {
            Ok(()) => {
                counter!(METRIC_FLUSH).increment(1);
                info!(
                    cache = "flush_all",
                    tag = self.policy.global_tag(),
                    "flushed all cached queries"
                );
                Ok(())
            }
            Err(err) => {
                counter!(METRIC_BACKEND_ERROR).increment(1);
                Err(err)
            }
        }
    }
}
