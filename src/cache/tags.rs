//! Invalidation tags.
//!
//! Every cache entry carries a [`TagSet`]; flushing any one of its tags
//! evicts the entry. [`TagPolicy`] decides which tags a query result carries
//! and which tags a mutation flushes.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::descriptor::{EntityDescriptor, InvalidationScope};
use crate::domain::entities::EntityId;

use super::keys::{CacheKey, DetailLookup, EncodingError, primary_lookup_key};
use super::scope::RequestContext;

pub const DEFAULT_GLOBAL_TAG: &str = "all-query-cache";

/// Ordered set of tag strings; duplicates collapse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSet(BTreeSet<String>);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(tag: impl Into<String>) -> Self {
        let mut set = Self::new();
        set.insert(tag);
        set
    }

    pub fn insert(&mut self, tag: impl Into<String>) -> bool {
        self.0.insert(tag.into())
    }

    pub fn with(mut self, tag: impl Into<String>) -> Self {
        self.insert(tag);
        self
    }

    pub fn union(&self, other: &TagSet) -> TagSet {
        TagSet(self.0.union(&other.0).cloned().collect())
    }

    pub fn extend<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0.extend(tags.into_iter().map(Into::into));
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(tag)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for TagSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        TagSet(iter.into_iter().map(Into::into).collect())
    }
}

impl IntoIterator for TagSet {
    type Item = String;
    type IntoIter = std::collections::btree_set::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a TagSet {
    type Item = &'a String;
    type IntoIter = std::collections::btree_set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Tag derivation rules shared by the executor and the invalidator.
#[derive(Debug, Clone)]
pub struct TagPolicy {
    namespace: String,
    global_tag: String,
}

impl TagPolicy {
    pub fn new(namespace: impl Into<String>, global_tag: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            global_tag: global_tag.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn global_tag(&self) -> &str {
        &self.global_tag
    }

    pub fn global(&self) -> TagSet {
        TagSet::single(self.global_tag.clone())
    }

    /// Tag shared by every list-shaped result of an entity type.
    pub fn list_tag(entity: &str) -> String {
        format!("list.{entity}")
    }

    /// Tag carrying every entry of `entity` cached while serving `ctx`.
    pub fn request_entity_tag(entity: &str, ctx: &RequestContext) -> String {
        format!("{entity}_{}", ctx.tag())
    }

    /// Tags attached to a cached query result of `entity`.
    ///
    /// Always contains the global tag, the list tag of the entity type and
    /// the key itself. Inside a request the request tag and the per-request
    /// entity tag are added, so a later mutation in the same request evicts
    /// the entry.
    pub fn for_query(
        &self,
        entity: &str,
        key: &CacheKey,
        extra: &TagSet,
        ctx: Option<&RequestContext>,
    ) -> TagSet {
        let mut tags = extra.clone();
        tags.insert(self.global_tag.clone());
        tags.insert(Self::list_tag(entity));
        tags.insert(key.as_str());
        if let Some(ctx) = ctx {
            tags.insert(ctx.tag());
            tags.insert(Self::request_entity_tag(entity, ctx));
        }
        tags
    }

    /// Tags to flush after a mutation of `id` in the given scopes.
    ///
    /// Detail scope yields the exact keys the primary-key lookups were cached
    /// under; list scope yields the list tag. Custom tags declared for either
    /// scope and the per-request entity tag are always included.
    pub fn for_mutation(
        &self,
        descriptor: &EntityDescriptor,
        id: Option<EntityId>,
        scopes: &BTreeSet<InvalidationScope>,
        ctx: Option<&RequestContext>,
    ) -> Result<TagSet, EncodingError> {
        let mut tags = TagSet::new();
        for scope in scopes {
            match scope {
                InvalidationScope::Detail => {
                    if let Some(id) = id {
                        for lookup in DetailLookup::ALL {
                            let key =
                                primary_lookup_key(&self.namespace, descriptor.name(), lookup, id)?;
                            tags.insert(String::from(key));
                        }
                    }
                }
                InvalidationScope::List => {
                    tags.insert(Self::list_tag(descriptor.name()));
                }
            }
            tags.extend(descriptor.custom_tags(*scope));
        }
        if let Some(ctx) = ctx {
            tags.insert(Self::request_entity_tag(descriptor.name(), ctx));
        }
        Ok(tags)
    }
}
