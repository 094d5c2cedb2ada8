//! Sync error types.

use dms_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors raised while delivering outbox entries.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transient delivery failure: {0}")]
    Transient(String),

    #[error("delivery timed out after {0}s")]
    Timeout(u64),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("authentication required")]
    AuthRequired,

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("rejected by server ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("retry budget exhausted after {attempts} attempts")]
    RetryBudgetExhausted { attempts: u32 },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sync engine not running")]
    ChannelClosed,

    #[error("background task failed: {0}")]
    Task(String),
}

impl SyncError {
    /// Whether another attempt could succeed without user action.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) | Self::Timeout(_) | Self::AuthFailed(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}
