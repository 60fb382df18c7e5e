/// Errors that can occur within the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A required record was not found in the database.
    #[error("Storage: {entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// A user-driven create collided with an existing row. Carries the id
    /// of the row that already holds the unique key so API layers can
    /// surface an idempotent 409.
    #[error("Storage: {entity} already exists (existing_id={existing_id})")]
    Conflict {
        entity: &'static str,
        existing_id: String,
    },

    /// A metric arrived with a type that differs from its definition.
    /// Rejects the whole batch; definitions are immutable after creation.
    #[error("Storage: metric '{metric}' is declared {expected} but batch carries {got}")]
    TypeDrift {
        metric: String,
        expected: String,
        got: String,
    },

    /// An underlying database error.
    #[error("Storage: database error: {0}")]
    Db(#[from] sea_orm::DbErr),

    /// JSON (de)serialization failure, e.g. the accepted_status_codes column.
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored enum column held a value no variant matches.
    #[error("Storage: invalid value in column '{column}': {value}")]
    InvalidColumn { column: &'static str, value: String },

    /// Generic storage error for cases not covered by other variants.
    #[error("Storage: {0}")]
    Other(String),
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    /// True when the underlying error is a unique-index violation. The
    /// incident open path and ingest dedup use the index as the conflict
    /// oracle and recover from this in place.
    pub fn is_unique_violation(err: &sea_orm::DbErr) -> bool {
        matches!(
            err.sql_err(),
            Some(sea_orm::SqlErr::UniqueConstraintViolation(_))
        )
    }
}
