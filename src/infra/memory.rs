//! In-process storage used by tests and local wiring.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::application::repos::{RepoError, Storage};
use crate::domain::entities::{Attributes, Entity, EntityId};
use crate::domain::query::{Query, Trashed};

#[derive(Default)]
struct Tables {
    next_id: HashMap<String, EntityId>,
    rows: BTreeMap<(String, EntityId), Entity>,
}

impl Tables {
    fn allocate(&mut self, entity_type: &str) -> EntityId {
        let next = self.next_id.entry(entity_type.to_string()).or_insert(0);
        *next += 1;
        *next
    }

    fn row_mut(&mut self, entity_type: &str, id: EntityId) -> Option<&mut Entity> {
        self.rows.get_mut(&(entity_type.to_string(), id))
    }

    fn matching<'a>(&'a self, query: &'a Query) -> impl Iterator<Item = &'a Entity> + 'a {
        self.rows.values().filter(move |entity| query.matches(entity))
    }
}

/// Rows kept in memory, ids allocated per entity type starting at 1.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows of `entity_type`, trashed ones included.
    pub async fn len(&self, entity_type: &str) -> usize {
        let guard = self.tables.read().await;
        guard
            .rows
            .keys()
            .filter(|(stored_type, _)| stored_type == entity_type)
            .count()
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn find(
        &self,
        entity_type: &str,
        id: EntityId,
        trashed: Trashed,
    ) -> Result<Option<Entity>, RepoError> {
        let guard = self.tables.read().await;
        Ok(guard
            .rows
            .get(&(entity_type.to_string(), id))
            .filter(|entity| trashed.admits(entity))
            .cloned())
    }

    async fn find_where(&self, query: &Query) -> Result<Vec<Entity>, RepoError> {
        let guard = self.tables.read().await;
        let mut rows: Vec<Entity> = guard.matching(query).cloned().collect();
        rows.sort_by(|left, right| query.compare(left, right));

        let offset = usize::try_from(query.offset.unwrap_or(0)).unwrap_or(usize::MAX);
        let limit = query
            .limit
            .map(|limit| usize::try_from(limit).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    async fn count(&self, query: &Query) -> Result<u64, RepoError> {
        let guard = self.tables.read().await;
        Ok(guard.matching(query).count() as u64)
    }

    async fn insert(
        &self,
        entity_type: &str,
        attributes: Attributes,
        now: Option<OffsetDateTime>,
    ) -> Result<Entity, RepoError> {
        let mut guard = self.tables.write().await;
        let id = guard.allocate(entity_type);
        let entity = Entity {
            entity_type: entity_type.to_string(),
            id,
            attributes,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        guard
            .rows
            .insert((entity_type.to_string(), id), entity.clone());
        Ok(entity)
    }

    async fn insert_many(
        &self,
        entity_type: &str,
        rows: Vec<Attributes>,
        now: Option<OffsetDateTime>,
    ) -> Result<u64, RepoError> {
        let mut guard = self.tables.write().await;
        let mut inserted = 0;
        for attributes in rows {
            let id = guard.allocate(entity_type);
            guard.rows.insert(
                (entity_type.to_string(), id),
                Entity {
                    entity_type: entity_type.to_string(),
                    id,
                    attributes,
                    created_at: now,
                    updated_at: now,
                    deleted_at: None,
                },
            );
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn update(
        &self,
        entity_type: &str,
        id: EntityId,
        attributes: Attributes,
        touched: Option<OffsetDateTime>,
    ) -> Result<Entity, RepoError> {
        let mut guard = self.tables.write().await;
        let entity = guard
            .row_mut(entity_type, id)
            .filter(|entity| !entity.is_trashed())
            .ok_or(RepoError::NotFound)?;
        entity.attributes.extend(attributes);
        if touched.is_some() {
            entity.updated_at = touched;
        }
        Ok(entity.clone())
    }

    async fn delete(
        &self,
        entity_type: &str,
        id: EntityId,
        at: OffsetDateTime,
    ) -> Result<bool, RepoError> {
        let mut guard = self.tables.write().await;
        match guard.row_mut(entity_type, id) {
            Some(entity) if !entity.is_trashed() => {
                entity.deleted_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn force_delete(&self, entity_type: &str, id: EntityId) -> Result<bool, RepoError> {
        let mut guard = self.tables.write().await;
        Ok(guard
            .rows
            .remove(&(entity_type.to_string(), id))
            .is_some())
    }

    async fn restore(&self, entity_type: &str, id: EntityId) -> Result<bool, RepoError> {
        let mut guard = self.tables.write().await;
        match guard.row_mut(entity_type, id) {
            Some(entity) if entity.is_trashed() => {
                entity.deleted_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
