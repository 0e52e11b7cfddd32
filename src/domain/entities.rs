//! Persisted records as seen by the repository layer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

/// Primary key type shared by every entity.
pub type EntityId = i64;

/// Attribute bag written to or read from storage.
pub type Attributes = Map<String, Value>;

pub const ID_COLUMN: &str = "id";
pub const CREATED_AT_COLUMN: &str = "created_at";
pub const UPDATED_AT_COLUMN: &str = "updated_at";
pub const DELETED_AT_COLUMN: &str = "deleted_at";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_type: String,
    pub id: EntityId,
    pub attributes: Attributes,
    pub created_at: Option<OffsetDateTime>,
    pub updated_at: Option<OffsetDateTime>,
    pub deleted_at: Option<OffsetDateTime>,
}

impl Entity {
    /// Soft-deleted records stay in storage with `deleted_at` set.
    pub fn is_trashed(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Resolve a column to a comparable JSON value.
    ///
    /// Timestamps resolve to their unix time in nanoseconds so that ordering
    /// and range conditions behave the same as for numeric attributes.
    pub fn column_value(&self, column: &str) -> Value {
        match column {
            ID_COLUMN => Value::from(self.id),
            CREATED_AT_COLUMN => timestamp_value(self.created_at),
            UPDATED_AT_COLUMN => timestamp_value(self.updated_at),
            DELETED_AT_COLUMN => timestamp_value(self.deleted_at),
            other => self.attributes.get(other).cloned().unwrap_or(Value::Null),
        }
    }
}

fn timestamp_value(at: Option<OffsetDateTime>) -> Value {
    match at {
        Some(at) => Value::from(at.unix_timestamp_nanos() as i64),
        None => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::*;

    fn sample() -> Entity {
        let mut attributes = Attributes::new();
        attributes.insert("status".to_string(), json!("active"));
        Entity {
            entity_type: "Order".to_string(),
            id: 42,
            attributes,
            created_at: Some(datetime!(2024-01-01 00:00 UTC)),
            updated_at: None,
            deleted_at: None,
        }
    }

    #[test]
    fn column_value_resolves_builtin_columns() {
        let entity = sample();
        assert_eq!(entity.column_value("id"), json!(42));
        assert_eq!(entity.column_value("status"), json!("active"));
        assert_eq!(entity.column_value("updated_at"), Value::Null);
        assert_eq!(entity.column_value("missing"), Value::Null);
        assert!(entity.column_value("created_at").is_i64());
    }

    #[test]
    fn trashed_follows_deleted_at() {
        let mut entity = sample();
        assert!(!entity.is_trashed());
        entity.deleted_at = Some(datetime!(2024-02-01 00:00 UTC));
        assert!(entity.is_trashed());
    }

    #[test]
    fn entity_survives_json_encoding() {
        let entity = sample();
        let value = serde_json::to_value(&entity).expect("encode entity");
        let decoded: Entity = serde_json::from_value(value).expect("decode entity");
        assert_eq!(decoded, entity);
    }
}
