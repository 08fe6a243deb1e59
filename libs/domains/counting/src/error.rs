use sea_orm::{DbErr, SqlErr};
use thiserror::Error;

/// Persistence failure for a decoded result.
///
/// The pipeline treats every kind the same way: log and move on.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage connection error: {0}")]
    Connection(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error: {0}")]
    Internal(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl From<DbErr> for StorageError {
    fn from(err: DbErr) -> Self {
        if let Some(sql_err) = err.sql_err() {
            return match sql_err {
                SqlErr::UniqueConstraintViolation(msg) => StorageError::Constraint(msg),
                SqlErr::ForeignKeyConstraintViolation(msg) => StorageError::Constraint(msg),
                other => StorageError::Internal(format!("{:?}", other)),
            };
        }

        match err {
            DbErr::Conn(_) | DbErr::ConnectionAcquire(_) => {
                StorageError::Connection(err.to_string())
            }
            DbErr::Json(_) | DbErr::Type(_) => StorageError::Serialization(err.to_string()),
            other => StorageError::Internal(other.to_string()),
        }
    }
}
