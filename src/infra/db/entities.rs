use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Postgres, QueryBuilder, Transaction, types::Json};
use time::OffsetDateTime;

use crate::application::repos::{RepoError, Storage};
use crate::domain::entities::{
    Attributes, CREATED_AT_COLUMN, DELETED_AT_COLUMN, Entity, EntityId, ID_COLUMN,
    UPDATED_AT_COLUMN,
};
use crate::domain::query::{Condition, Direction, Query, Trashed};

use super::PostgresStore;
use super::util::{from_sql_count, map_sqlx_error, to_sql_count, validate_field};

const SELECT_ENTITIES: &str =
    "SELECT entity_type, id, data, created_at, updated_at, deleted_at FROM entities";

#[derive(sqlx::FromRow)]
struct EntityRow {
    entity_type: String,
    id: i64,
    data: Json<Attributes>,
    created_at: Option<OffsetDateTime>,
    updated_at: Option<OffsetDateTime>,
    deleted_at: Option<OffsetDateTime>,
}

impl From<EntityRow> for Entity {
    fn from(row: EntityRow) -> Self {
        Self {
            entity_type: row.entity_type,
            id: row.id,
            attributes: row.data.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        }
    }
}

/// How a query field maps onto the table.
enum Column {
    Id,
    Timestamp(&'static str),
    Attribute(String),
}

impl Column {
    fn resolve(field: &str) -> Result<Self, RepoError> {
        Ok(match field {
            ID_COLUMN => Self::Id,
            CREATED_AT_COLUMN => Self::Timestamp("created_at"),
            UPDATED_AT_COLUMN => Self::Timestamp("updated_at"),
            DELETED_AT_COLUMN => Self::Timestamp("deleted_at"),
            other => {
                validate_field(other)?;
                Self::Attribute(other.to_string())
            }
        })
    }

    /// Push an expression comparable with the bound values of this column.
    fn push_comparable(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        match self {
            Self::Id => {
                qb.push("id");
            }
            Self::Timestamp(name) => {
                qb.push("(EXTRACT(EPOCH FROM ")
                    .push(*name)
                    .push(") * 1000000000)::bigint");
            }
            Self::Attribute(name) => {
                qb.push("(data -> ").push_bind(name.clone()).push(")");
            }
        }
    }

    fn push_text(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        match self {
            Self::Id => {
                qb.push("id::text");
            }
            Self::Timestamp(name) => {
                qb.push(*name).push("::text");
            }
            Self::Attribute(name) => {
                qb.push("(data ->> ").push_bind(name.clone()).push(")");
            }
        }
    }

    fn push_bound_value(
        &self,
        qb: &mut QueryBuilder<'_, Postgres>,
        value: &Value,
    ) -> Result<(), RepoError> {
        match self {
            Self::Id | Self::Timestamp(_) => {
                qb.push_bind(integer_of(value)?);
            }
            Self::Attribute(_) => {
                qb.push_bind(Json(value.clone()));
            }
        }
        Ok(())
    }
}

fn integer_of(value: &Value) -> Result<i64, RepoError> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| RepoError::invalid_input(format!("`{value}` is not an integer")))
}

/// Textual form used for equality, so `"7"` and `7` compare equal.
fn text_of(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn push_condition(
    qb: &mut QueryBuilder<'_, Postgres>,
    condition: &Condition,
) -> Result<(), RepoError> {
    let column = Column::resolve(condition.field())?;
    qb.push(" AND ");
    match condition {
        Condition::Eq {
            value: Value::Null, ..
        } => {
            column.push_text(qb);
            qb.push(" IS NULL");
        }
        Condition::Eq { value, .. } if !matches!(column, Column::Attribute(_)) => {
            column.push_comparable(qb);
            qb.push(" = ");
            column.push_bound_value(qb, value)?;
        }
        Condition::Eq { value, .. } => {
            column.push_text(qb);
            qb.push(" = ").push_bind(text_of(value));
        }
        Condition::In { values, .. } => {
            column.push_text(qb);
            qb.push(" = ANY(")
                .push_bind(values.iter().map(text_of).collect::<Vec<_>>())
                .push(")");
        }
        Condition::Contains { needle, .. } => {
            column.push_text(qb);
            qb.push(" ILIKE ").push_bind(format!("%{needle}%"));
        }
        Condition::Gte { value, .. } => {
            column.push_comparable(qb);
            qb.push(" >= ");
            column.push_bound_value(qb, value)?;
        }
        Condition::Lte { value, .. } => {
            column.push_comparable(qb);
            qb.push(" <= ");
            column.push_bound_value(qb, value)?;
        }
    }
    Ok(())
}

/// `WHERE` clause of `query`, without ordering or window.
fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &Query) -> Result<(), RepoError> {
    qb.push(" WHERE entity_type = ")
        .push_bind(query.entity_type.clone());
    for condition in &query.conditions {
        push_condition(qb, condition)?;
    }
    match query.trashed {
        Trashed::Exclude => {
            qb.push(" AND deleted_at IS NULL");
        }
        Trashed::Include => {}
        Trashed::Only => {
            qb.push(" AND deleted_at IS NOT NULL");
        }
    }
    Ok(())
}

/// Ordering matches the in-memory store: nulls sort lowest and the id breaks
/// ties.
fn push_ordering(qb: &mut QueryBuilder<'_, Postgres>, query: &Query) -> Result<(), RepoError> {
    qb.push(" ORDER BY ");
    for order in &query.order_by {
        Column::resolve(&order.field)?.push_comparable(qb);
        match order.direction {
            Direction::Asc => qb.push(" ASC NULLS FIRST, "),
            Direction::Desc => qb.push(" DESC NULLS LAST, "),
        };
    }
    qb.push("id ASC");
    Ok(())
}

async fn allocate_ids(
    tx: &mut Transaction<'_, Postgres>,
    entity_type: &str,
    count: i64,
) -> Result<EntityId, RepoError> {
    let last_id: i64 = sqlx::query_scalar(
        "INSERT INTO entity_sequences (entity_type, last_id) VALUES ($1, $2) \
         ON CONFLICT (entity_type) DO UPDATE SET last_id = entity_sequences.last_id + $2 \
         RETURNING last_id",
    )
    .bind(entity_type)
    .bind(count)
    .fetch_one(&mut **tx)
    .await
    .map_err(map_sqlx_error)?;
    Ok(last_id - count + 1)
}

async fn set_deleted_at(
    store: &PostgresStore,
    entity_type: &str,
    id: EntityId,
    at: Option<OffsetDateTime>,
) -> Result<bool, RepoError> {
    let guard = if at.is_some() {
        "deleted_at IS NULL"
    } else {
        "deleted_at IS NOT NULL"
    };
    let mut qb = QueryBuilder::<Postgres>::new("UPDATE entities SET deleted_at = ");
    qb.push_bind(at)
        .push(" WHERE entity_type = ")
        .push_bind(entity_type.to_string())
        .push(" AND id = ")
        .push_bind(id)
        .push(" AND ")
        .push(guard);
    let result = qb
        .build()
        .execute(store.pool())
        .await
        .map_err(map_sqlx_error)?;
    Ok(result.rows_affected() > 0)
}

#[async_trait]
impl Storage for PostgresStore {
    async fn find(
        &self,
        entity_type: &str,
        id: EntityId,
        trashed: Trashed,
    ) -> Result<Option<Entity>, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new(SELECT_ENTITIES);
        push_filters(
            &mut qb,
            &Query::new(entity_type).filter(Condition::eq(ID_COLUMN, id)).trashed(trashed),
        )?;
        let row = qb
            .build_query_as::<EntityRow>()
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row.map(Entity::from))
    }

    async fn find_where(&self, query: &Query) -> Result<Vec<Entity>, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new(SELECT_ENTITIES);
        push_filters(&mut qb, query)?;
        push_ordering(&mut qb, query)?;
        if let Some(limit) = query.limit {
            qb.push(" LIMIT ").push_bind(to_sql_count(limit)?);
        }
        if let Some(offset) = query.offset {
            qb.push(" OFFSET ").push_bind(to_sql_count(offset)?);
        }
        let rows = qb
            .build_query_as::<EntityRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(Entity::from).collect())
    }

    async fn count(&self, query: &Query) -> Result<u64, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM entities");
        push_filters(&mut qb, query)?;
        let total: i64 = qb
            .build_query_scalar::<i64>()
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        from_sql_count(total)
    }

    async fn insert(
        &self,
        entity_type: &str,
        attributes: Attributes,
        now: Option<OffsetDateTime>,
    ) -> Result<Entity, RepoError> {
        let mut tx = self.pool().begin().await.map_err(map_sqlx_error)?;
        let id = allocate_ids(&mut tx, entity_type, 1).await?;
        let row = sqlx::query_as::<_, EntityRow>(
            "INSERT INTO entities (entity_type, id, data, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $4) \
             RETURNING entity_type, id, data, created_at, updated_at, deleted_at",
        )
        .bind(entity_type)
        .bind(id)
        .bind(Json(attributes))
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(row.into())
    }

    async fn insert_many(
        &self,
        entity_type: &str,
        rows: Vec<Attributes>,
        now: Option<OffsetDateTime>,
    ) -> Result<u64, RepoError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let count = to_sql_count(rows.len() as u64)?;
        let mut tx = self.pool().begin().await.map_err(map_sqlx_error)?;
        let first_id = allocate_ids(&mut tx, entity_type, count).await?;

        let mut qb = QueryBuilder::<Postgres>::new(
            "INSERT INTO entities (entity_type, id, data, created_at, updated_at) ",
        );
        qb.push_values(rows.into_iter().zip(first_id..), |mut values, (attributes, id)| {
            values
                .push_bind(entity_type.to_string())
                .push_bind(id)
                .push_bind(Json(attributes))
                .push_bind(now)
                .push_bind(now);
        });
        let result = qb
            .build()
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn update(
        &self,
        entity_type: &str,
        id: EntityId,
        attributes: Attributes,
        touched: Option<OffsetDateTime>,
    ) -> Result<Entity, RepoError> {
        let row = sqlx::query_as::<_, EntityRow>(
            "UPDATE entities SET data = data || $1, updated_at = COALESCE($2, updated_at) \
             WHERE entity_type = $3 AND id = $4 AND deleted_at IS NULL \
             RETURNING entity_type, id, data, created_at, updated_at, deleted_at",
        )
        .bind(Json(attributes))
        .bind(touched)
        .bind(entity_type)
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        row.map(Entity::from).ok_or(RepoError::NotFound)
    }

    async fn delete(
        &self,
        entity_type: &str,
        id: EntityId,
        at: OffsetDateTime,
    ) -> Result<bool, RepoError> {
        set_deleted_at(self, entity_type, id, Some(at)).await
    }

    async fn force_delete(&self, entity_type: &str, id: EntityId) -> Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM entities WHERE entity_type = $1 AND id = $2")
            .bind(entity_type)
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn restore(&self, entity_type: &str, id: EntityId) -> Result<bool, RepoError> {
        set_deleted_at(self, entity_type, id, None).await
    }
}
