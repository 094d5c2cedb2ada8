//! Guarded database open with bounded retries.

use crate::error::{StorageError, StorageResult};
use crate::store::StoreLifecycle;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Retry policy for [`safe_open`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenPolicy {
    /// Total open attempts, including the first.
    pub max_attempts: u32,
    /// Delay before attempt `n + 1` is `retry_base_ms · n`.
    pub retry_base_ms: u64,
}

impl Default for OpenPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_base_ms: 250,
        }
    }
}

impl OpenPolicy {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_base_ms.saturating_mul(u64::from(attempt)))
    }
}

/// How a successful [`safe_open`] got there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenReport {
    /// Open attempts made, the successful one included.
    pub attempts: u32,
    /// The physical database was deleted along the way.
    pub wiped: bool,
}

/// Open the store, retrying with a linearly growing delay.
///
/// A schema conflict deletes the physical database before the next attempt;
/// any other failure retries against the same file. Exhausting the policy
/// yields [`StorageError::InitializationFatal`].
pub async fn safe_open<L>(store: &Arc<L>, policy: &OpenPolicy) -> StorageResult<OpenReport>
where
    L: StoreLifecycle + ?Sized + 'static,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_error = None;
    let mut wiped = false;

    for attempt in 1..=attempts {
        let s = Arc::clone(store);
        match tokio::task::spawn_blocking(move || s.open()).await? {
            Ok(()) => {
                if attempt > 1 {
                    info!(attempt, "local database opened after retry");
                }
                return Ok(OpenReport {
                    attempts: attempt,
                    wiped,
                });
            }
            Err(err) => {
                warn!(attempt, max_attempts = attempts, error = %err, "database open failed");
                debug!(diagnostics = ?store.diagnostics(), "store state after failed open");

                if err.is_schema_conflict() {
                    let s = Arc::clone(store);
                    match tokio::task::spawn_blocking(move || s.destroy()).await? {
                        Ok(()) => {
                            wiped = true;
                            info!(attempt, "deleted conflicting local database");
                        }
                        Err(e) => warn!(attempt, error = %e, "failed to delete local database"),
                    }
                } else {
                    store.close();
                }

                last_error = Some(err);
                if attempt < attempts {
                    tokio::time::sleep(policy.delay_after(attempt)).await;
                }
            }
        }
    }

    let reason = last_error
        .map(|e| e.to_string())
        .unwrap_or_else(|| "unknown error".to_string());
    error!(attempts, %reason, "local database could not be opened");
    Err(StorageError::InitializationFatal { attempts, reason })
}
