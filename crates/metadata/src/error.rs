//! Warehouse store error types.

use thiserror::Error;

/// Warehouse operation errors.
#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("cannot remove the active artifact row {0}; reconcile it instead")]
    ActiveRowRemoval(i64),
}

/// Result type for warehouse operations.
pub type WarehouseResult<T> = std::result::Result<T, WarehouseError>;

/// Whether a sqlx error is a unique-constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.kind() == sqlx::error::ErrorKind::UniqueViolation
    )
}
