use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use serde_json::json;
use tagstash::application::repository::{Repository, SIZE_ALL};
use tagstash::cache::{CacheBackend, CacheConfig, CacheKey, CacheLayer, RequestContext, TagSet};
use tagstash::domain::descriptor::EntityDescriptor;
use tagstash::domain::entities::Attributes;
use tagstash::infra::memory::MemoryStore;
use tagstash::infra::telemetry;

struct RefusingBackend;

#[async_trait::async_trait]
impl CacheBackend for RefusingBackend {
    async fn get(
        &self,
        _key: &CacheKey,
    ) -> Result<Option<serde_json::Value>, tagstash::cache::BackendError> {
        Err(tagstash::cache::BackendError::unavailable("refused"))
    }

    async fn put(
        &self,
        _key: &CacheKey,
        _value: serde_json::Value,
        _tags: &TagSet,
        _ttl: Duration,
    ) -> Result<(), tagstash::cache::BackendError> {
        Err(tagstash::cache::BackendError::unavailable("refused"))
    }

    async fn flush_tags(&self, _tags: &TagSet) -> Result<(), tagstash::cache::BackendError> {
        Err(tagstash::cache::BackendError::unavailable("refused"))
    }
}

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");
    telemetry::describe_metrics();

    let store = Arc::new(MemoryStore::new());
    let cache = CacheLayer::in_memory(CacheConfig::default());
    let repo = Repository::new(
        EntityDescriptor::new("Tag").fillable(["name"]),
        store.clone(),
        cache,
    );
    let ctx = RequestContext::new();

    // miss, hit, then a flush through the mutation
    repo.get_by_query(&ctx, Attributes::new(), SIZE_ALL)
        .await
        .expect("cold read");
    repo.get_by_query(&ctx, Attributes::new(), SIZE_ALL)
        .await
        .expect("warm read");
    repo.store(&ctx, serde_json::Map::from_iter([("name".to_string(), json!("a"))]))
        .await
        .expect("store");

    // bypass
    repo.clone()
        .no_cache()
        .get_by_query(&ctx, Attributes::new(), SIZE_ALL)
        .await
        .expect("uncached read");

    // backend error
    let refusing = CacheLayer::new(CacheConfig::default(), Arc::new(RefusingBackend));
    let degraded = Repository::new(EntityDescriptor::new("Tag"), store, refusing);
    degraded
        .get_by_query(&ctx, Attributes::new(), SIZE_ALL)
        .await
        .expect("degraded read");

    let counters: HashMap<String, u64> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .filter_map(|(composite_key, _, _, value)| match value {
            DebugValue::Counter(count) => Some((composite_key.key().name().to_string(), count)),
            _ => None,
        })
        .collect();

    let expected = [
        ("tagstash_cache_hit_total", 1),
        ("tagstash_cache_miss_total", 1),
        ("tagstash_cache_bypass_total", 1),
        ("tagstash_cache_flush_total", 1),
        ("tagstash_cache_backend_error_total", 1),
    ];
    for (metric, minimum) in expected {
        let count = counters.get(metric).copied().unwrap_or(0);
        assert!(count >= minimum, "metric {metric} recorded {count} times");
    }
}
