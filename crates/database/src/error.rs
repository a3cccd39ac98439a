use core_types::ErrorKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Failed to connect to the database: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("An error occurred during JSON serialization/deserialization: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to decode database row: {0}")]
    Decode(String),

    #[error("The requested data was not found in the database.")]
    NotFound,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Domain error: {0}")]
    Domain(#[from] core_types::CoreError),
}

impl DbError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::NotFound => ErrorKind::NotFound,
            DbError::Conflict(..) => ErrorKind::Conflict,
            DbError::Domain(e) => e.kind(),
            _ => ErrorKind::Internal,
        }
    }
}

/// Translates a unique-constraint violation into a `Conflict`, leaving every
/// other database error untouched.
pub(crate) fn map_unique_violation(err: sqlx::Error, what: &str) -> DbError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.code().as_deref() == Some("23505") {
            return DbError::Conflict(format!("{} already exists", what));
        }
    }
    DbError::Connection(err)
}
