//! Error types for hermes.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or logically inconsistent input. Raised before any mutation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The store rejected a write on a uniqueness constraint.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn not_found(kind: &'static str, id: impl std::fmt::Display) -> Self {
        Error::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                Error::Conflict(db_err.message().to_string())
            }
            other => Error::Database(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
