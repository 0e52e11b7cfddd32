//! Cached repository over any [`Storage`].
//!
//! Reads go through the [`CachedQueryExecutor`] under keys derived from the
//! operation and its bindings; writes go straight to storage and then hand
//! the affected tags to the [`MutationInvalidator`].

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::OffsetDateTime;
use tracing::{debug, instrument};

use crate::application::pagination::{LIMIT_PARAM, PAGE_PARAM, Page, PageRequest};
use crate::application::repos::{RepoError, Storage};
use crate::cache::{
    CacheKey, CacheLayer, DetailLookup, MutationKind, RequestContext, TagSet, detail_lookup_key,
    generate, normalize_lookup_value,
};
use crate::domain::descriptor::{EntityDescriptor, SORT_SCOPE};
use crate::domain::entities::{Attributes, Entity, EntityId, ID_COLUMN};
use crate::domain::error::DomainError;
use crate::domain::query::{Condition, Direction, Query, Trashed};

/// Size passed to [`Repository::get_by_query`] to fetch every matching row.
pub const SIZE_ALL: i64 = -1;
/// Size passed to [`Repository::get_by_query`] to fetch the first row or fail.
pub const SIZE_FIRST: i64 = 0;

/// Result of a query, shaped by the requested size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", content = "data", rename_all = "snake_case")]
pub enum Records {
    List(Vec<Entity>),
    First(Entity),
    Page(Page<Entity>),
}

impl Records {
    pub fn into_vec(self) -> Vec<Entity> {
        match self {
            Self::List(items) => items,
            Self::First(entity) => vec![entity],
            Self::Page(page) => page.items,
        }
    }
}

#[derive(Clone)]
pub struct Repository {
    descriptor: Arc<EntityDescriptor>,
    storage: Arc<dyn Storage>,
    cache: CacheLayer,
    ttl: Duration,
    use_cache: bool,
}

impl Repository {
    pub fn new(descriptor: EntityDescriptor, storage: Arc<dyn Storage>, cache: CacheLayer) -> Self {
        let ttl = descriptor.ttl().unwrap_or(cache.config().default_ttl);
        Self {
            descriptor: Arc::new(descriptor),
            storage,
            cache,
            ttl,
            use_cache: true,
        }
    }

    /// Skip the cache for reads made through this handle.
    pub fn no_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    /// Cache reads made through this handle for `ttl`.
    pub fn cache_for(mut self, ttl: Duration) -> Self {
        self.use_cache = true;
        self.ttl = ttl;
        self
    }

    pub fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn uses_cache(&self) -> bool {
        self.use_cache
    }

    fn name(&self) -> &str {
        self.descriptor.name()
    }

    fn operation(&self, suffix: &str) -> String {
        format!("{}.{suffix}", self.name())
    }

    fn timestamp(&self) -> Option<OffsetDateTime> {
        self.descriptor
            .uses_timestamps()
            .then(OffsetDateTime::now_utc)
    }

    async fn cached<T, F, Fut>(
        &self,
        ctx: &RequestContext,
        key: CacheKey,
        producer: F,
    ) -> Result<T, RepoError>
    where
        T: Serialize + serde::de::DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: std::future::Future<Output = Result<T, RepoError>> + Send,
    {
        let tags = self
            .cache
            .policy()
            .for_query(self.name(), &key, &TagSet::new(), Some(ctx));
        self.cache
            .executor()
            .execute(&key, &tags, self.ttl, self.use_cache, producer)
            .await
    }

    /// Rows matching the scopes named in `params`.
    ///
    /// `size` selects the shape: [`SIZE_ALL`] returns every row,
    /// [`SIZE_FIRST`] the first row or `NotFound`, and a positive size the
    /// page named by the `page` parameter. Without a `sort` parameter the
    /// type's default sort applies, and is part of the cache key.
    #[instrument(skip(self, ctx, params), fields(entity = self.name()))]
    pub async fn get_by_query(
        &self,
        ctx: &RequestContext,
        mut params: Attributes,
        size: i64,
    ) -> Result<Records, RepoError> {
        if size < SIZE_ALL {
            return Err(RepoError::invalid_input(format!(
                "size must be -1, 0 or positive, got {size}"
            )));
        }
        if !params.contains_key(SORT_SCOPE) {
            params.insert(
                SORT_SCOPE.to_string(),
                Value::String(self.descriptor.default_sort().to_string()),
            );
        }

        let page = if size > 0 {
            Some(PageRequest::from_param(params.get(PAGE_PARAM), size.unsigned_abs())?)
        } else {
            None
        };

        let scope_params: Attributes = params
            .iter()
            .filter(|(name, _)| name.as_str() != PAGE_PARAM && name.as_str() != LIMIT_PARAM)
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        let query = self
            .descriptor
            .apply_scopes(Query::new(self.name()), &scope_params)?;

        let bindings = json!({ "params": params, "size": size });
        let key = generate(
            self.cache.policy().namespace(),
            &self.operation("getByQuery"),
            &bindings,
        )?;

        let storage = &self.storage;
        self.cached(ctx, key, move || async move {
            match page {
                Some(request) => {
                    let total = storage.count(&query).await?;
                    let windowed = query.offset(request.offset()).limit(request.per_page);
                    let items = storage.find_where(&windowed).await?;
                    Ok(Records::Page(Page::new(items, total, request)))
                }
                None if size == SIZE_FIRST => storage
                    .find_where(&query.limit(1))
                    .await?
                    .into_iter()
                    .next()
                    .map(Records::First)
                    .ok_or(RepoError::NotFound),
                None => Ok(Records::List(storage.find_where(&query).await?)),
            }
        })
        .await
    }

    pub async fn get_by_id(&self, ctx: &RequestContext, id: EntityId) -> Result<Entity, RepoError> {
        self.lookup(ctx, DetailLookup::Active, ID_COLUMN, Value::from(id))
            .await
    }

    /// Single row whose `field` equals `value`. Numeric strings looked up by
    /// id are treated as integers.
    pub async fn get_by_key(
        &self,
        ctx: &RequestContext,
        field: &str,
        value: Value,
    ) -> Result<Entity, RepoError> {
        self.lookup(ctx, DetailLookup::Active, field, value).await
    }

    pub async fn get_by_id_in_trash(
        &self,
        ctx: &RequestContext,
        id: EntityId,
    ) -> Result<Entity, RepoError> {
        self.lookup(ctx, DetailLookup::WithTrashed, ID_COLUMN, Value::from(id))
            .await
    }

    pub async fn get_by_key_in_trash(
        &self,
        ctx: &RequestContext,
        field: &str,
        value: Value,
    ) -> Result<Entity, RepoError> {
        self.lookup(ctx, DetailLookup::WithTrashed, field, value)
            .await
    }

    #[instrument(skip(self, ctx, value), fields(entity = self.name()))]
    async fn lookup(
        &self,
        ctx: &RequestContext,
        lookup: DetailLookup,
        field: &str,
        value: Value,
    ) -> Result<Entity, RepoError> {
        if !self.descriptor.is_allowed_column(field) {
            return Err(RepoError::invalid_input(format!(
                "`{field}` is not a lookup column of `{}`",
                self.name()
            )));
        }
        let value = normalize_lookup_value(field, &value);
        let key = detail_lookup_key(
            self.cache.policy().namespace(),
            self.name(),
            lookup,
            field,
            &value,
        )?;
        let trashed = match lookup {
            DetailLookup::Active => Trashed::Exclude,
            DetailLookup::WithTrashed => Trashed::Include,
        };

        let storage = &self.storage;
        let entity_type = self.name().to_string();
        let field = field.to_string();
        self.cached(ctx, key, move || async move {
            let found = match (field.as_str(), value.as_i64()) {
                (ID_COLUMN, Some(id)) => storage.find(&entity_type, id, trashed).await?,
                _ => {
                    let query = Query::new(entity_type)
                        .filter(Condition::eq(field, value))
                        .order_by(ID_COLUMN, Direction::Asc)
                        .trashed(trashed)
                        .limit(1);
                    storage.find_where(&query).await?.into_iter().next()
                }
            };
            found.ok_or(RepoError::NotFound)
        })
        .await
    }

    /// Insert one row built from the writable fields of `data`.
    #[instrument(skip(self, ctx, data), fields(entity = self.name()))]
    pub async fn store(&self, ctx: &RequestContext, data: Attributes) -> Result<Entity, RepoError> {
        let attributes = self.descriptor.only_fillable(&data);
        let entity = self
            .storage
            .insert(self.name(), attributes, self.timestamp())
            .await?;
        self.cache
            .invalidator()
            .invalidate(&self.descriptor, Some(entity.id), MutationKind::Created, Some(ctx))
            .await;
        Ok(entity)
    }

    /// Bulk insert with shared timestamps; returns the number of rows stored.
    #[instrument(skip(self, ctx, rows), fields(entity = self.name(), rows = rows.len()))]
    pub async fn store_array(
        &self,
        ctx: &RequestContext,
        rows: Vec<Attributes>,
    ) -> Result<u64, RepoError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let rows = rows
            .iter()
            .map(|row| self.descriptor.only_fillable(row))
            .collect();
        let inserted = self
            .storage
            .insert_many(self.name(), rows, self.timestamp())
            .await?;
        self.cache
            .invalidator()
            .invalidate(&self.descriptor, None, MutationKind::Created, Some(ctx))
            .await;
        Ok(inserted)
    }

    /// Apply `data` to a live row. Fields in `except` are dropped; when
    /// `only` is non-empty, fields outside it are dropped too.
    #[instrument(skip(self, ctx, data, except, only), fields(entity = self.name()))]
    pub async fn update(
        &self,
        ctx: &RequestContext,
        id: EntityId,
        data: Attributes,
        except: &[&str],
        only: &[&str],
    ) -> Result<Entity, RepoError> {
        let data: Attributes = data
            .into_iter()
            .filter(|(name, _)| !except.contains(&name.as_str()))
            .filter(|(name, _)| only.is_empty() || only.contains(&name.as_str()))
            .collect();
        let attributes = self.descriptor.only_fillable(&data);
        let entity = self
            .storage
            .update(self.name(), id, attributes, self.timestamp())
            .await?;
        self.cache
            .invalidator()
            .invalidate(&self.descriptor, Some(id), MutationKind::Updated, Some(ctx))
            .await;
        Ok(entity)
    }

    /// Soft delete when the type supports it, otherwise remove the row.
    #[instrument(skip(self, ctx), fields(entity = self.name()))]
    pub async fn delete(&self, ctx: &RequestContext, id: EntityId) -> Result<(), RepoError> {
        let removed = if self.descriptor.uses_soft_deletes() {
            self.storage
                .delete(self.name(), id, OffsetDateTime::now_utc())
                .await?
        } else {
            self.storage.force_delete(self.name(), id).await?
        };
        self.finish_mutation(ctx, id, removed, MutationKind::Deleted)
            .await
    }

    /// Remove the row permanently, trashed or not.
    #[instrument(skip(self, ctx), fields(entity = self.name()))]
    pub async fn destroy(&self, ctx: &RequestContext, id: EntityId) -> Result<(), RepoError> {
        let removed = self.storage.force_delete(self.name(), id).await?;
        self.finish_mutation(ctx, id, removed, MutationKind::ForceDeleted)
            .await
    }

    #[instrument(skip(self, ctx), fields(entity = self.name()))]
    pub async fn restore(&self, ctx: &RequestContext, id: EntityId) -> Result<(), RepoError> {
        if !self.descriptor.uses_soft_deletes() {
            return Err(DomainError::unsupported(self.name(), "restore").into());
        }
        let restored = self.storage.restore(self.name(), id).await?;
        self.finish_mutation(ctx, id, restored, MutationKind::Restored)
            .await
    }

    async fn finish_mutation(
        &self,
        ctx: &RequestContext,
        id: EntityId,
        affected: bool,
        kind: MutationKind,
    ) -> Result<(), RepoError> {
        if !affected {
            debug!(entity = self.name(), id, mutation = %kind, "no row affected");
            return Err(RepoError::NotFound);
        }
        self.cache
            .invalidator()
            .invalidate(&self.descriptor, Some(id), kind, Some(ctx))
            .await;
        Ok(())
    }
}
