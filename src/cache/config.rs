//! Cache configuration.

use std::num::NonZeroUsize;
use std::time::Duration;

use super::tags::DEFAULT_GLOBAL_TAG;

const DEFAULT_NAMESPACE: &str = "tagstash";
const DEFAULT_TTL_SECS: u64 = 200;
const DEFAULT_MEMORY_CAPACITY: usize = 10_000;
const DEFAULT_REDIS_PREFIX: &str = "tagstash";

/// Longest lifetime any entry is given; longer TTLs are clamped to it.
pub const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    Memory,
    Redis { url: String },
}

impl BackendKind {
    /// Whether other processes see the same entries.
    pub fn is_shared(&self) -> bool {
        matches!(self, Self::Redis { .. })
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// When off, every read goes straight to storage.
    pub enabled: bool,
    /// Prefix mixed into every cache key.
    pub namespace: String,
    /// Tag carried by every entry; flushing it empties the cache.
    pub global_tag: String,
    /// TTL for repositories that do not set their own.
    pub default_ttl: Duration,
    /// Entry limit of the in-process backend.
    pub memory_capacity: usize,
    pub backend: BackendKind,
    /// Key prefix used by the Redis backend.
    pub redis_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: DEFAULT_NAMESPACE.to_string(),
            global_tag: DEFAULT_GLOBAL_TAG.to_string(),
            default_ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            backend: BackendKind::Memory,
            redis_prefix: DEFAULT_REDIS_PREFIX.to_string(),
        }
    }
}

impl CacheConfig {
    /// Builds a config from loaded settings; the namespace comes from the
    /// application section.
    pub fn from_settings(settings: &crate::config::Settings) -> Self {
        let cache = &settings.cache;
        Self {
            enabled: cache.enabled,
            namespace: settings.app.namespace.clone(),
            global_tag: cache.global_tag.clone(),
            default_ttl: cache.default_ttl,
            memory_capacity: cache.memory_capacity.get(),
            backend: match &cache.backend {
                crate::config::CacheBackendKind::Memory => BackendKind::Memory,
                crate::config::CacheBackendKind::Redis { url } => {
                    BackendKind::Redis { url: url.clone() }
                }
            },
            redis_prefix: cache.redis_prefix.clone(),
        }
    }

    /// Returns the memory capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.global_tag, "all-query-cache");
        assert_eq!(config.default_ttl, Duration::from_secs(200));
        assert_eq!(config.backend, BackendKind::Memory);
    }

    #[test]
    fn only_redis_is_shared_across_processes() {
        assert!(!BackendKind::Memory.is_shared());
        assert!(
            BackendKind::Redis {
                url: "redis://127.0.0.1/".to_string()
            }
            .is_shared()
        );
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = CacheConfig {
            memory_capacity: 0,
            ..Default::default()
        };
        assert_eq!(config.memory_capacity_non_zero().get(), 1);
    }
}
