//! Application-level error type.

use dms_ledger::LedgerError;
use dms_storage::StorageError;
use dms_sync::SyncError;
use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("background task failed: {0}")]
    Task(String),
}

impl CoreError {
    /// Startup could not produce a usable store; the user has to clear local
    /// storage.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_fatal())
    }
}

impl From<tokio::task::JoinError> for CoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}
