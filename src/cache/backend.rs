//! Tag-capable cache store contract.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::executor::{METRIC_BACKEND_ERROR, METRIC_HIT, METRIC_MISS};
use super::keys::CacheKey;
use super::tags::TagSet;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    #[error("cache value could not be encoded: {0}")]
    Codec(#[from] serde_json::Error),
}

impl BackendError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

/// A cache store whose entries can be invalidated by tag.
///
/// An entry stored under N tags is readable by key until it expires or any
/// one of its tags is flushed. Flushing tags that carry no entries is a
/// no-op.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<Value>, BackendError>;

    async fn put(
        &self,
        key: &CacheKey,
        value: Value,
        tags: &TagSet,
        ttl: Duration,
    ) -> Result<(), BackendError>;

    async fn flush_tags(&self, tags: &TagSet) -> Result<(), BackendError>;
}

/// `remember` for every backend, including `dyn CacheBackend`.
pub trait CacheBackendExt: CacheBackend {
    /// Return the cached value for `key`, or run `producer` once and store
    /// its result under `tags`.
    ///
    /// Producer errors are returned unchanged and never stored. Backend
    /// failures never fail the call: a failed read runs the producer without
    /// storing, a failed write still returns the produced value. An entry
    /// that no longer decodes as `T` counts as a miss.
    fn remember<T, E, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        tags: &TagSet,
        producer: F,
    ) -> impl Future<Output = Result<T, E>> + Send
    where
        T: Serialize + DeserializeOwned + Send,
        E: Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
    {
        async move {
            let reachable = match self.get(key).await {
                Ok(Some(value)) => match serde_json::from_value::<T>(value) {
                    Ok(hit) => {
                        counter!(METRIC_HIT).increment(1);
                        debug!(cache = "query", outcome = "hit", key = %key);
                        return Ok(hit);
                    }
                    Err(err) => {
                        warn!(
                            cache = "query",
                            key = %key,
                            error = %err,
                            "cached value has an unexpected shape; recomputing"
                        );
                        true
                    }
                },
                Ok(None) => true,
                Err(err) => {
                    counter!(METRIC_BACKEND_ERROR).increment(1);
                    warn!(
                        cache = "query",
                        key = %key,
                        error = %err,
                        "cache read failed; running query directly"
                    );
                    false
                }
            };

            counter!(METRIC_MISS).increment(1);
            debug!(cache = "query", outcome = "miss", key = %key);
            let value = producer().await?;
            if !reachable {
                return Ok(value);
            }

            let stored = match serde_json::to_value(&value) {
                Ok(encoded) => self.put(key, encoded, tags, ttl).await,
                Err(err) => Err(BackendError::from(err)),
            };
            if let Err(err) = stored {
                counter!(METRIC_BACKEND_ERROR).increment(1);
                warn!(
                    cache = "query",
                    key = %key,
                    tag_count = tags.len(),
                    error = %err,
                    "failed to store query result"
                );
            }
            Ok(value)
        }
    }
}

impl<B: CacheBackend + ?Sized> CacheBackendExt for B {}
