//! Error types for the local store.

use thiserror::Error;

/// All errors that can occur in local store operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },

    /// The row changed between planning and applying a mutation.
    #[error("concurrent modification: {0}")]
    Conflict(String),

    #[error("schema conflict: {0}")]
    SchemaConflict(String),

    #[error("database is closed")]
    Closed,

    #[error("background task failed: {0}")]
    Task(String),

    #[error(
        "failed to initialize the local database after {attempts} attempt(s): {reason}. \
         Clear the application's local storage and retry."
    )]
    InitializationFatal { attempts: u32, reason: String },
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Message fragments SQLite emits when the on-disk schema is inconsistent
/// with the one this build registers.
const CONFLICT_MARKERS: &[&str] = &[
    "already exists",
    "no such column",
    "no such table",
    "malformed",
    "not a database",
    "createindex",
];

impl StorageError {
    /// True for the class of errors recoverable by deleting and recreating
    /// the local database. Only consulted for failures raised while opening
    /// or seeding, where a constraint violation means the existing schema
    /// objects clash with the ones this build registers.
    pub fn is_schema_conflict(&self) -> bool {
        match self {
            Self::SchemaConflict(_) => true,
            Self::Sqlite(err) => {
                if let rusqlite::Error::SqliteFailure(code, _) = err {
                    if matches!(
                        code.code,
                        rusqlite::ErrorCode::DatabaseCorrupt
                            | rusqlite::ErrorCode::NotADatabase
                            | rusqlite::ErrorCode::ConstraintViolation
                    ) {
                        return true;
                    }
                }
                let msg = err.to_string().to_lowercase();
                CONFLICT_MARKERS.iter().any(|m| msg.contains(m))
            }
            _ => false,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InitializationFatal { .. })
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}
