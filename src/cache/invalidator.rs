//! Post-mutation cache invalidation.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use metrics::counter;
use tracing::{debug, warn};

use crate::domain::descriptor::{EntityDescriptor, InvalidationScope};
use crate::domain::entities::EntityId;

use super::backend::CacheBackend;
use super::executor::{METRIC_BACKEND_ERROR, METRIC_FLUSH};
use super::scope::RequestContext;
use super::tags::{TagPolicy, TagSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Created,
    Updated,
    Deleted,
    ForceDeleted,
    Restored,
}

impl MutationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::ForceDeleted => "force_deleted",
            Self::Restored => "restored",
        }
    }

    /// Creation can only change lists; every other mutation also changes
    /// the record itself.
    pub fn scopes(self) -> BTreeSet<InvalidationScope> {
        match self {
            Self::Created => [InvalidationScope::List].into_iter().collect(),
            _ => [InvalidationScope::Detail, InvalidationScope::List]
                .into_iter()
                .collect(),
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flushes the tags affected by a successful write.
///
/// Never fails: the write has already been committed, so cache trouble is
/// logged and counted instead of reported.
#[derive(Clone)]
pub struct MutationInvalidator {
    backend: Arc<dyn CacheBackend>,
    policy: TagPolicy,
}

impl MutationInvalidator {
    pub fn new(backend: Arc<dyn CacheBackend>, policy: TagPolicy) -> Self {
        Self { backend, policy }
    }

    pub fn policy(&self) -> &TagPolicy {
        &self.policy
    }

    pub async fn invalidate(
        &self,
        descriptor: &EntityDescriptor,
        id: Option<EntityId>,
        kind: MutationKind,
        ctx: Option<&RequestContext>,
    ) {
        let tags = match self
            .policy
            .for_mutation(descriptor, id, &kind.scopes(), ctx)
        {
            Ok(tags) => tags,
            Err(err) => {
                warn!(
                    cache = "invalidate",
                    entity = descriptor.name(),
                    mutation = %kind,
                    error = %err,
                    "failed to derive invalidation tags"
                );
                return;
            }
        };
        self.flush(descriptor.name(), kind, &tags).await;
    }

    /// Flush an explicit tag set on behalf of `entity`.
    pub async fn flush(&self, entity: &str, kind: MutationKind, tags: &TagSet) {
        match self.backend.flush_tags(tags).await {
            Ok(()) => {
                counter!(METRIC_FLUSH).increment(1);
                debug!(
                    cache = "invalidate",
                    entity,
                    mutation = %kind,
                    tag_count = tags.len(),
                    "flushed mutation tags"
                );
            }
            Err(err) => {
                counter!(METRIC_BACKEND_ERROR).increment(1);
                warn!(
                    cache = "invalidate",
                    entity,
                    mutation = %kind,
                    tag_count = tags.len(),
                    error = %err,
                    "cache invalidation failed; entries stay until their TTL"
                );
            }
        }
    }
}
