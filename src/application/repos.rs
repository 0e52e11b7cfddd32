//! Storage trait describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

use crate::application::pagination::PaginationError;
use crate::cache::EncodingError;
use crate::domain::entities::{Attributes, Entity, EntityId};
use crate::domain::error::DomainError;
use crate::domain::query::{Query, Trashed};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
    #[error(transparent)]
    Pagination(#[from] PaginationError),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}

/// Persistence of entities of any declared type.
///
/// Timestamps are supplied by the caller: `None` leaves them unset, which is
/// how entity types without timestamps are stored.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn find(
        &self,
        entity_type: &str,
        id: EntityId,
        trashed: Trashed,
    ) -> Result<Option<Entity>, RepoError>;

    /// Rows matching `query`, ordered and windowed as it requests.
    async fn find_where(&self, query: &Query) -> Result<Vec<Entity>, RepoError>;

    /// Number of rows matching `query`, ignoring its window.
    async fn count(&self, query: &Query) -> Result<u64, RepoError>;

    async fn insert(
        &self,
        entity_type: &str,
        attributes: Attributes,
        now: Option<OffsetDateTime>,
    ) -> Result<Entity, RepoError>;

    /// Insert all rows with shared timestamps; returns the number inserted.
    async fn insert_many(
        &self,
        entity_type: &str,
        rows: Vec<Attributes>,
        now: Option<OffsetDateTime>,
    ) -> Result<u64, RepoError>;

    /// Merge `attributes` into a live row.
    async fn update(
        &self,
        entity_type: &str,
        id: EntityId,
        attributes: Attributes,
        touched: Option<OffsetDateTime>,
    ) -> Result<Entity, RepoError>;

    /// Mark a live row as deleted. Returns false when no live row matched.
    async fn delete(
        &self,
        entity_type: &str,
        id: EntityId,
        at: OffsetDateTime,
    ) -> Result<bool, RepoError>;

    /// Remove a row, trashed or not.
    async fn force_delete(&self, entity_type: &str, id: EntityId) -> Result<bool, RepoError>;

    /// Clear the deletion mark of a trashed row.
    async fn restore(&self, entity_type: &str, id: EntityId) -> Result<bool, RepoError>;
}
