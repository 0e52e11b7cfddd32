//! Cache key derivation.
//!
//! A [`CacheKey`] is the SHA-256 digest of a namespace, an operation name and
//! a canonical rendering of the operation's bindings. Canonicalisation
//! flattens nested values into dotted paths and sorts them, so structurally
//! equal bindings always produce the same key regardless of insertion order.

use std::fmt;

use heck::ToSnakeCase;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::domain::entities::{EntityId, ID_COLUMN};

use super::finite::all_finite;

const SEGMENT_DELIMITER: char = '\u{1f}';

/// Opaque, fixed-length (64 hex characters) cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("bindings could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("bindings must be a map or a list, got `{0}`")]
    NotAMapping(String),
    #[error("bindings contain a non-finite number")]
    NonFinite,
}

/// Derive the key for `operation` in `namespace` with the given bindings.
pub fn generate<B>(namespace: &str, operation: &str, bindings: &B) -> Result<CacheKey, EncodingError>
where
    B: Serialize + ?Sized,
{
    if !all_finite(bindings) {
        return Err(EncodingError::NonFinite);
    }
    let value = serde_json::to_value(bindings)?;
    let canonical = canonicalize(&value)?;

    let mut hasher = Sha256::new();
    hasher.update(snake_segments(namespace).as_bytes());
    hasher.update(SEGMENT_DELIMITER.to_string().as_bytes());
    hasher.update(snake_segments(operation).as_bytes());
    hasher.update(SEGMENT_DELIMITER.to_string().as_bytes());
    hasher.update(canonical.as_bytes());
    Ok(CacheKey(hex::encode(hasher.finalize())))
}

/// Stable textual form of a bindings value.
///
/// Produces a JSON array of `[path, scalar]` pairs sorted by path. Empty maps
/// and lists are kept as leaves so that `{"a": {}}` and `{}` differ.
pub fn canonicalize(bindings: &Value) -> Result<String, EncodingError> {
    let mut pairs: Vec<(String, Value)> = Vec::new();
    match bindings {
        Value::Object(_) | Value::Array(_) => flatten("", bindings, &mut pairs),
        Value::Null => {}
        other => return Err(EncodingError::NotAMapping(other.to_string())),
    }
    pairs.sort_by(|left, right| left.0.cmp(&right.0));

    let rendered: Vec<Value> = pairs
        .into_iter()
        .map(|(path, value)| Value::Array(vec![Value::String(path), value]))
        .collect();
    Ok(serde_json::to_string(&rendered)?)
}

fn flatten(prefix: &str, value: &Value, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, nested) in map {
                flatten(&join_path(prefix, key), nested, out);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (index, nested) in items.iter().enumerate() {
                flatten(&join_path(prefix, &index.to_string()), nested, out);
            }
        }
        leaf => out.push((prefix.to_string(), leaf.clone())),
    }
}

fn join_path(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{prefix}.{segment}")
    }
}

/// Snake-case each dot separated segment: `Order.getById` -> `order.get_by_id`.
pub fn snake_segments(input: &str) -> String {
    input
        .split('.')
        .map(|segment| segment.to_snake_case())
        .collect::<Vec<_>>()
        .join(".")
}

/// Which detail lookup a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailLookup {
    Active,
    WithTrashed,
}

impl DetailLookup {
    pub const ALL: [DetailLookup; 2] = [DetailLookup::Active, DetailLookup::WithTrashed];

    pub fn operation(self, entity: &str) -> String {
        match self {
            Self::Active => format!("{entity}.getById"),
            Self::WithTrashed => format!("{entity}.getByIdInTrash"),
        }
    }
}

/// Key of a single-record lookup by `column`.
///
/// Used by the repository to cache lookups and by the tag policy to flush
/// them, which keeps both derivations identical.
pub fn detail_lookup_key(
    namespace: &str,
    entity: &str,
    lookup: DetailLookup,
    column: &str,
    value: &Value,
) -> Result<CacheKey, EncodingError> {
    let mut bindings = serde_json::Map::new();
    bindings.insert(column.to_string(), normalize_lookup_value(column, value));
    generate(namespace, &lookup.operation(entity), &bindings)
}

/// Primary key lookup key for `id`.
pub fn primary_lookup_key(
    namespace: &str,
    entity: &str,
    lookup: DetailLookup,
    id: EntityId,
) -> Result<CacheKey, EncodingError> {
    detail_lookup_key(namespace, entity, lookup, ID_COLUMN, &Value::from(id))
}

/// Numeric strings looked up by primary key are keyed as integers, so `"42"`
/// and `42` share a cache entry.
pub fn normalize_lookup_value(column: &str, value: &Value) -> Value {
    if column == ID_COLUMN
        && let Value::String(text) = value
        && let Ok(id) = text.trim().parse::<EntityId>()
    {
        return Value::from(id);
    }
    value.clone()
}
