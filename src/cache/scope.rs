//! Per-request cache scope.
//!
//! Each inbound request gets a unique tag. Everything cached while serving
//! the request carries that tag, and the tag is flushed when the request
//! ends, whether the handler succeeded, failed, panicked or was dropped
//! mid-flight. The current
//! context is held in a `tokio::task_local!` for code running inside
//! [`RequestScope::run`].

use std::future::Future;
use std::panic::{AssertUnwindSafe, resume_unwind};
use std::sync::Arc;

use futures::FutureExt;
use metrics::counter;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::backend::CacheBackend;
use super::executor::{METRIC_BACKEND_ERROR, METRIC_FLUSH};
use super::tags::TagSet;

tokio::task_local! {
    static CURRENT: RequestContext;
}

/// Handle for one inbound request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestContext {
    tag: String,
}

impl RequestContext {
    /// Generate a context with a fresh `request_<id>-<id>` tag.
    pub fn new() -> Self {
        Self {
            tag: format!(
                "request_{}-{}",
                Uuid::new_v4().simple(),
                Uuid::new_v4().simple()
            ),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("no request scope is active for the current task")]
pub struct NoActiveRequest;

#[derive(Clone)]
pub struct RequestScope {
    backend: Arc<dyn CacheBackend>,
}

impl RequestScope {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    pub fn begin(&self) -> RequestContext {
        let ctx = RequestContext::new();
        debug!(cache = "scope", request_tag = ctx.tag(), "request scope opened");
        ctx
    }

    /// Context of the request the current task is serving.
    pub fn current() -> Result<RequestContext, NoActiveRequest> {
        CURRENT.try_with(Clone::clone).map_err(|_| NoActiveRequest)
    }

    /// Flush every entry tagged with the request tag.
    ///
    /// Backend failures are logged; the entries then live until their TTL.
    pub async fn end(&self, ctx: &RequestContext) {
        flush_request_tag(self.backend.as_ref(), ctx.tag()).await;
    }

    /// Run `fut` with `ctx` as the current request, then end the scope.
    ///
    /// The flush also runs when `fut` panics; the panic is resumed after it.
    /// When the returned future is dropped before completing (client gone,
    /// timeout), the flush is spawned onto the runtime instead.
    pub async fn run<F, T>(&self, ctx: RequestContext, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let guard = FlushOnDrop::new(self.backend.clone(), ctx.tag());
        let outcome = CURRENT
            .scope(ctx.clone(), AssertUnwindSafe(fut).catch_unwind())
            .await;
        self.end(&ctx).await;
        guard.disarm();
        match outcome {
            Ok(value) => value,
            Err(panic) => resume_unwind(panic),
        }
    }
}

async fn flush_request_tag(backend: &dyn CacheBackend, tag: &str) {
    match backend.flush_tags(&TagSet::single(tag)).await {
        Ok(()) => {
            counter!(METRIC_FLUSH).increment(1);
            debug!(cache = "scope", request_tag = tag, "request scope closed");
        }
        Err(err) => {
            counter!(METRIC_BACKEND_ERROR).increment(1);
            warn!(
                cache = "scope",
                request_tag = tag,
                error = %err,
                "failed to flush request tag"
            );
        }
    }
}

/// Ends an abandoned scope: armed until [`RequestScope::run`] has flushed.
struct FlushOnDrop {
    backend: Option<Arc<dyn CacheBackend>>,
    tag: String,
}

impl FlushOnDrop {
    fn new(backend: Arc<dyn CacheBackend>, tag: &str) -> Self {
        Self {
            backend: Some(backend),
            tag: tag.to_string(),
        }
    }

    fn disarm(mut self) {
        self.backend = None;
    }
}

impl Drop for FlushOnDrop {
    fn drop(&mut self) {
        let Some(backend) = self.backend.take() else {
            return;
        };
        let tag = std::mem::take(&mut self.tag);
        match Handle::try_current() {
            Ok(handle) => {
                debug!(cache = "scope", request_tag = %tag, "request dropped; flushing in background");
                handle.spawn(async move {
                    flush_request_tag(backend.as_ref(), &tag).await;
                });
            }
            Err(_) => warn!(
                cache = "scope",
                request_tag = %tag,
                "request dropped outside a runtime; entries stay until their TTL"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::cache::keys::generate;
    use crate::cache::memory::MemoryBackend;

    fn backend() -> Arc<MemoryBackend> {
        Arc::new(MemoryBackend::new(64))
    }

    #[test]
    fn request_tags_are_unique() {
        let tags: HashSet<String> = (0..1_000)
            .map(|_| RequestContext::new().tag().to_string())
            .collect();
        assert_eq!(tags.len(), 1_000);
        assert!(tags.iter().all(|tag| tag.starts_with("request_")));
    }

    #[tokio::test]
    async fn current_fails_outside_a_scope() {
        assert_eq!(RequestScope::current(), Err(NoActiveRequest));
    }

    #[tokio::test]
    async fn current_is_visible_inside_run() {
        let scope = RequestScope::new(backend());
        let ctx = scope.begin();
        let seen = scope
            .run(ctx.clone(), async { RequestScope::current() })
            .await;
        assert_eq!(seen, Ok(ctx));
    }

    #[tokio::test]
    async fn end_flushes_entries_tagged_with_the_request() {
        let backend = backend();
        let scope = RequestScope::new(backend.clone());
        let ctx = scope.begin();
        let key = generate("shop", "Order.getById", &json!({"id": 1})).expect("key");

        backend
            .put(
                &key,
                json!({"id": 1}),
                &TagSet::single(ctx.tag()),
                Duration::from_secs(60),
            )
            .await
            .expect("put");
        scope.end(&ctx).await;

        assert_eq!(backend.get(&key).await.expect("get"), None);
    }

    #[tokio::test]
    async fn run_flushes_when_the_handler_fails() {
        let backend = backend();
        let scope = RequestScope::new(backend.clone());
        let ctx = scope.begin();
        let key = generate("shop", "Order.getById", &json!({"id": 2})).expect("key");

        let result: Result<(), &str> = scope
            .run(ctx.clone(), {
                let backend = backend.clone();
                let key = key.clone();
                let tag = ctx.tag().to_string();
                async move {
                    backend
                        .put(&key, json!(2), &TagSet::single(tag), Duration::from_secs(60))
                        .await
                        .expect("put");
                    Err("handler failed")
                }
            })
            .await;

        assert_eq!(result, Err("handler failed"));
        assert_eq!(backend.get(&key).await.expect("get"), None);
    }

    #[tokio::test]
    async fn run_flushes_and_resumes_a_panic() {
        let backend = backend();
        let scope = RequestScope::new(backend.clone());
        let ctx = scope.begin();
        let key = generate("shop", "Order.getById", &json!({"id": 3})).expect("key");

        let task = {
            let backend = backend.clone();
            let key = key.clone();
            let scope = scope.clone();
            tokio::spawn(async move {
                let tag = ctx.tag().to_string();
                scope
                    .run(ctx, async move {
                        backend
                            .put(&key, json!(3), &TagSet::single(tag), Duration::from_secs(60))
                            .await
                            .expect("put");
                        if !key.as_str().is_empty() {
                            panic!("handler panicked");
                        }
                    })
                    .await
            })
        };

        let joined = task.await;
        assert!(joined.is_err_and(|err| err.is_panic()));
        assert_eq!(backend.get(&key).await.expect("get"), None);
    }

    #[tokio::test]
    async fn cancelled_run_still_flushes_the_request_tag() {
        let backend = backend();
        let scope = RequestScope::new(backend.clone());
        let ctx = scope.begin();
        let key = generate("shop", "Order.getById", &json!({"id": 4})).expect("key");

        let handler = {
            let backend = backend.clone();
            let key = key.clone();
            let tag = ctx.tag().to_string();
            async move {
                backend
                    .put(&key, json!(4), &TagSet::single(tag), Duration::from_secs(60))
                    .await
                    .expect("put");
                tokio::time::sleep(Duration::from_secs(10)).await;
            }
        };
        let timed_out =
            tokio::time::timeout(Duration::from_millis(50), scope.run(ctx, handler)).await;
        assert!(timed_out.is_err());

        // the flush runs on a spawned task
        for _ in 0..100 {
            if backend.get(&key).await.expect("get").is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(backend.get(&key).await.expect("get"), None);
    }

    #[tokio::test]
    async fn completed_run_leaves_later_entries_alone() {
        let backend = backend();
        let scope = RequestScope::new(backend.clone());
        let ctx = scope.begin();
        let key = generate("shop", "Order.getById", &json!({"id": 5})).expect("key");

        scope.run(ctx.clone(), async {}).await;
        backend
            .put(
                &key,
                json!(5),
                &TagSet::single(ctx.tag()),
                Duration::from_secs(60),
            )
            .await
            .expect("put");
        tokio::task::yield_now().await;

        assert_eq!(backend.get(&key).await.expect("get"), Some(json!(5)));
    }
}
