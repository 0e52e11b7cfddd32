//! Entity type declarations.
//!
//! An [`EntityDescriptor`] states everything the repository needs to know
//! about an entity type: writable columns, timestamp and soft-delete
//! behaviour, cache lifetime, extra invalidation tags and the named scopes
//! that narrow queries.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::entities::{Attributes, CREATED_AT_COLUMN, ID_COLUMN, UPDATED_AT_COLUMN};
use super::error::DomainError;
use super::query::{Condition, Direction, Query};

pub const SORT_SCOPE: &str = "sort";

/// Which family of cache entries a mutation invalidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InvalidationScope {
    List,
    Detail,
}

pub type ScopeFn =
    Arc<dyn Fn(&EntityDescriptor, Query, &Value) -> Result<Query, DomainError> + Send + Sync>;

/// Named query filters declared by an entity type.
#[derive(Clone, Default)]
pub struct ScopeRegistry {
    scopes: HashMap<String, ScopeFn>,
}

impl ScopeRegistry {
    pub fn register(&mut self, name: impl Into<String>, scope: ScopeFn) {
        self.scopes.insert(name.into(), scope);
    }

    pub fn get(&self, name: &str) -> Option<&ScopeFn> {
        self.scopes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.scopes.contains_key(name)
    }

    pub fn names(&self) -> BTreeSet<&str> {
        self.scopes.keys().map(String::as_str).collect()
    }
}

impl fmt::Debug for ScopeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    name: String,
    fillable: Vec<String>,
    timestamps: bool,
    soft_deletes: bool,
    cache_ttl: Option<Duration>,
    custom_tags: BTreeMap<InvalidationScope, BTreeSet<String>>,
    scopes: ScopeRegistry,
}

impl EntityDescriptor {
    /// Declare an entity type with timestamps, no soft deletes and the
    /// built-in `sort` scope.
    pub fn new(name: impl Into<String>) -> Self {
        let mut scopes = ScopeRegistry::default();
        scopes.register(SORT_SCOPE, Arc::new(sort_scope));
        Self {
            name: name.into(),
            fillable: Vec::new(),
            timestamps: true,
            soft_deletes: false,
            cache_ttl: None,
            custom_tags: BTreeMap::new(),
            scopes,
        }
    }

    pub fn fillable<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fillable = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn without_timestamps(mut self) -> Self {
        self.timestamps = false;
        self
    }

    pub fn soft_deletes(mut self) -> Self {
        self.soft_deletes = true;
        self
    }

    /// Cache lifetime for this type; the configured default applies
    /// otherwise.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Extra tag flushed whenever this entity type is mutated in `scope`.
    pub fn custom_tag(mut self, scope: InvalidationScope, tag: impl Into<String>) -> Self {
        self.custom_tags.entry(scope).or_default().insert(tag.into());
        self
    }

    pub fn scope<F>(mut self, name: impl Into<String>, scope: F) -> Self
    where
        F: Fn(&EntityDescriptor, Query, &Value) -> Result<Query, DomainError>
            + Send
            + Sync
            + 'static,
    {
        self.scopes.register(name, Arc::new(scope));
        self
    }

    /// Register a scope that filters `column` by equality, or by membership
    /// when the parameter is an array.
    pub fn filter_scope(self, name: impl Into<String>, column: impl Into<String>) -> Self {
        let column = column.into();
        self.scope(name, move |_, query, value| {
            let condition = match value {
                Value::Array(values) => Condition::one_of(column.clone(), values.clone()),
                other => Condition::eq(column.clone(), other.clone()),
            };
            Ok(query.filter(condition))
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fillable_columns(&self) -> &[String] {
        &self.fillable
    }

    pub fn uses_timestamps(&self) -> bool {
        self.timestamps
    }

    pub fn uses_soft_deletes(&self) -> bool {
        self.soft_deletes
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.cache_ttl
    }

    pub fn scopes(&self) -> &ScopeRegistry {
        &self.scopes
    }

    pub fn custom_tags(&self, scope: InvalidationScope) -> BTreeSet<String> {
        self.custom_tags.get(&scope).cloned().unwrap_or_default()
    }

    /// Columns that may appear in filters and orderings.
    pub fn allowed_columns(&self) -> Vec<String> {
        let mut columns = vec![ID_COLUMN.to_string()];
        columns.extend(self.fillable.iter().cloned());
        if self.timestamps {
            columns.push(CREATED_AT_COLUMN.to_string());
            columns.push(UPDATED_AT_COLUMN.to_string());
        }
        columns
    }

    pub fn is_allowed_column(&self, column: &str) -> bool {
        column == ID_COLUMN
            || self.fillable.iter().any(|c| c == column)
            || (self.timestamps && (column == CREATED_AT_COLUMN || column == UPDATED_AT_COLUMN))
    }

    pub fn default_sort(&self) -> &'static str {
        if self.timestamps {
            "created_at:-1"
        } else {
            "id:-1"
        }
    }

    /// Keep only writable columns.
    pub fn only_fillable(&self, data: &Attributes) -> Attributes {
        data.iter()
            .filter(|(key, _)| self.fillable.iter().any(|c| c == *key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Apply every parameter that names a registered scope; the rest are
    /// ignored.
    pub fn apply_scopes(&self, mut query: Query, params: &Attributes) -> Result<Query, DomainError> {
        for (name, value) in params {
            if let Some(scope) = self.scopes.get(name) {
                query = scope(self, query, value)?;
            }
        }
        Ok(query)
    }
}

/// `field:dir[,field:dir...]`; `dir` of `1` sorts ascending, anything else
/// descending. Unknown columns are skipped.
fn sort_scope(
    descriptor: &EntityDescriptor,
    mut query: Query,
    value: &Value,
) -> Result<Query, DomainError> {
    let spec = match value {
        Value::String(spec) => spec.clone(),
        Value::Null => descriptor.default_sort().to_string(),
        other => {
            return Err(DomainError::validation(format!(
                "sort expects a string, got `{other}`"
            )));
        }
    };

    for part in spec.split(',').map(str::trim).filter(|part| !part.is_empty()) {
        let (field, direction) = match part.split_once(':') {
            Some((field, dir)) => (field.trim(), dir.trim()),
            None => (part, "1"),
        };
        if !descriptor.is_allowed_column(field) {
            continue;
        }
        let direction = if direction == "1" {
            Direction::Asc
        } else {
            Direction::Desc
        };
        query = query.order_by(field, direction);
    }
    Ok(query)
}
