//! Sync configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the outbox and the background sync engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Base URL of the remote API (e.g. "https://api.dmsplus.app").
    pub api_base_url: String,

    /// Period of the background drain while online (seconds).
    pub sync_interval_secs: u64,

    /// Upper bound for delivering a single item (seconds).
    pub item_timeout_secs: u64,

    /// Failed attempts after which an item becomes `Failed`.
    pub max_retry_attempts: u32,

    /// Base delay before a failed item is retried; doubles per attempt (seconds).
    pub retry_backoff_secs: u64,

    /// Age after which delivered items are purged (days).
    pub purge_synced_after_days: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.dmsplus.app".to_string(),
            sync_interval_secs: 300, // 5 minutes
            item_timeout_secs: 30,
            max_retry_attempts: 3,
            retry_backoff_secs: 30,
            purge_synced_after_days: 90,
        }
    }
}

impl SyncConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }

    pub fn item_timeout(&self) -> Duration {
        Duration::from_secs(self.item_timeout_secs)
    }

    /// Delay an item with `retry_count` failed attempts waits before its next
    /// attempt: `backoff · 2^(retry_count − 1)`, zero before the first failure.
    pub fn retry_delay(&self, retry_count: u32) -> Duration {
        if retry_count == 0 {
            return Duration::ZERO;
        }
        let factor = 1u64 << (retry_count - 1).min(16);
        Duration::from_secs(self.retry_backoff_secs.saturating_mul(factor))
    }
}
