//! Error types for the permission engine

use sea_orm::DbErr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthzError {
    /// A role, menu, API, department or user id does not exist
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// An assignment referenced ids that do not exist
    #[error("Unknown {entity} ids: {ids:?}")]
    InvalidReference { entity: &'static str, ids: Vec<i64> },

    /// Duplicate primary key in a binding write
    #[error("Duplicate {entity} binding for id {id}")]
    AlreadyExists { entity: &'static str, id: i64 },

    /// Rejected by the role assignment guard
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Cache store failure; callers degrade to a store read
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Rebuild transaction rolled back
    #[error("Permission materialization failed: {0}")]
    MaterializationFailed(#[source] DbErr),

    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

pub type Result<T> = std::result::Result<T, AuthzError>;
