// Relational store errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Row not found
    #[error("{0} not found")]
    NotFound(String),

    /// Unique constraint violated
    #[error("conflict: {0}")]
    Conflict(String),

    /// Any other database failure
    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row".to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            }
            _ => StoreError::Database(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::Database(err.to_string())
    }
}
