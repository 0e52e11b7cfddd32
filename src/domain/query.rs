//! Storage-agnostic query description.
//!
//! Scopes narrow a [`Query`] and storage adapters execute it: the in-memory
//! store evaluates conditions with [`Query::matches`], the Postgres store
//! translates them into SQL.

use std::cmp::Ordering;

use serde_json::Value;

use super::entities::Entity;

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq { field: String, value: Value },
    In { field: String, values: Vec<Value> },
    /// Case-insensitive substring match on the textual value.
    Contains { field: String, needle: String },
    Gte { field: String, value: Value },
    Lte { field: String, value: Value },
}

impl Condition {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn one_of(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::In {
            field: field.into(),
            values,
        }
    }

    pub fn contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::Contains {
            field: field.into(),
            needle: needle.into(),
        }
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gte {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lte {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn field(&self) -> &str {
        match self {
            Self::Eq { field, .. }
            | Self::In { field, .. }
            | Self::Contains { field, .. }
            | Self::Gte { field, .. }
            | Self::Lte { field, .. } => field,
        }
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        let actual = entity.column_value(self.field());
        match self {
            Self::Eq { value, .. } => loose_eq(&actual, value),
            Self::In { values, .. } => values.iter().any(|value| loose_eq(&actual, value)),
            Self::Contains { needle, .. } => text_of(&actual)
                .is_some_and(|text| text.to_lowercase().contains(&needle.to_lowercase())),
            Self::Gte { value, .. } => {
                !actual.is_null() && compare_values(&actual, value) != Ordering::Less
            }
            Self::Lte { value, .. } => {
                !actual.is_null() && compare_values(&actual, value) != Ordering::Greater
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Visibility of soft-deleted rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Trashed {
    #[default]
    Exclude,
    Include,
    Only,
}

impl Trashed {
    pub fn admits(self, entity: &Entity) -> bool {
        match self {
            Self::Exclude => !entity.is_trashed(),
            Self::Include => true,
            Self::Only => entity.is_trashed(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub entity_type: String,
    pub conditions: Vec<Condition>,
    pub order_by: Vec<OrderBy>,
    pub trashed: Trashed,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Query {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            conditions: Vec::new(),
            order_by: Vec::new(),
            trashed: Trashed::default(),
            limit: None,
            offset: None,
        }
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by.push(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn trashed(mut self, trashed: Trashed) -> Self {
        self.trashed = trashed;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// The same filter without any window, used for counting.
    pub fn unbounded(&self) -> Self {
        Self {
            limit: None,
            offset: None,
            ..self.clone()
        }
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        entity.entity_type == self.entity_type
            && self.trashed.admits(entity)
            && self
                .conditions
                .iter()
                .all(|condition| condition.matches(entity))
    }

    /// Order two entities by the query's sort keys, falling back to the id.
    pub fn compare(&self, left: &Entity, right: &Entity) -> Ordering {
        for order in &self.order_by {
            let ordering = compare_values(
                &left.column_value(&order.field),
                &right.column_value(&order.field),
            );
            let ordering = match order.direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        left.id.cmp(&right.id)
    }
}

/// Total order over JSON scalars: null < bool < number < string < other.
pub fn compare_values(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => match (l.as_i64(), r.as_i64()) {
            (Some(l), Some(r)) => l.cmp(&r),
            _ => {
                let l = l.as_f64().unwrap_or(f64::NAN);
                let r = r.as_f64().unwrap_or(f64::NAN);
                l.partial_cmp(&r).unwrap_or(Ordering::Equal)
            }
        },
        (Value::String(l), Value::String(r)) => l.cmp(r),
        (Value::Bool(l), Value::Bool(r)) => l.cmp(r),
        _ => rank(left).cmp(&rank(right)),
    }
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Equality that tolerates numbers arriving as strings (query-string input).
fn loose_eq(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match (actual, expected) {
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            n.to_string() == s.trim()
        }
        _ => false,
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
