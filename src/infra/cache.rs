use std::sync::Arc;

use tracing::info;

use crate::cache::{BackendKind, CacheBackend, CacheConfig, MemoryBackend};

use super::error::InfraError;
use super::redis::RedisBackend;

/// Build the backend selected by `config`.
pub async fn connect_backend(config: &CacheConfig) -> Result<Arc<dyn CacheBackend>, InfraError> {
    match &config.backend {
        BackendKind::Memory => {
            let capacity = config.memory_capacity_non_zero();
            info!(cache = "memory", capacity = capacity.get(), "using in-process cache");
            Ok(Arc::new(MemoryBackend::new(capacity.get())))
        }
        BackendKind::Redis { url } => {
            let backend = RedisBackend::connect(url, config.redis_prefix.clone()).await?;
            info!(cache = "redis", prefix = %config.redis_prefix, "connected to redis cache");
            Ok(Arc::new(backend))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_backend_needs_no_connection() {
        let backend = connect_backend(&CacheConfig::default()).await;
        assert!(backend.is_ok());
    }

    #[tokio::test]
    async fn unreachable_redis_is_a_cache_error() {
        let config = CacheConfig {
            backend: BackendKind::Redis {
                url: "redis://127.0.0.1:1/".to_string(),
            },
            ..Default::default()
        };
        let result = connect_backend(&config).await;
        assert!(matches!(result, Err(InfraError::Cache(_))));
    }
}
