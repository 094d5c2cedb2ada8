//! Engine configuration.
//!
//! Loaded from JSON (every field optional) and then adjusted from the
//! environment:
//!
//! | Variable                 | Field                      |
//! |--------------------------|----------------------------|
//! | `DMS_DB_PATH`            | `storage.path`             |
//! | `DMS_API_BASE_URL`       | `sync.api_base_url`        |
//! | `DMS_SYNC_INTERVAL_SECS` | `sync.sync_interval_secs`  |

use crate::error::{CoreError, CoreResult};
use dms_storage::{OpenPolicy, RecoveryConfig};
use dms_sync::SyncConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

pub const ENV_DB_PATH: &str = "DMS_DB_PATH";
pub const ENV_API_BASE_URL: &str = "DMS_API_BASE_URL";
pub const ENV_SYNC_INTERVAL_SECS: &str = "DMS_SYNC_INTERVAL_SECS";

/// Where the local database lives and how hard to try opening it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file. `None` keeps everything in memory.
    pub path: Option<PathBuf>,

    /// Databases from earlier app generations, deleted on startup.
    pub legacy_paths: Vec<PathBuf>,

    pub max_open_retries: u32,

    /// First back-off between open attempts; grows linearly per attempt.
    pub retry_base_delay_ms: u64,

    /// Pause between deleting a conflicting database and recreating it.
    pub recreate_settle_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            legacy_paths: Vec::new(),
            max_open_retries: 3,
            retry_base_delay_ms: 250,
            recreate_settle_ms: 500,
        }
    }
}

impl StorageConfig {
    pub fn recovery(&self) -> RecoveryConfig {
        RecoveryConfig {
            open: OpenPolicy {
                max_attempts: self.max_open_retries,
                retry_base_ms: self.retry_base_delay_ms,
            },
            legacy_paths: self.legacy_paths.clone(),
            settle_ms: self.recreate_settle_ms,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DmsConfig {
    pub storage: StorageConfig,
    pub sync: SyncConfig,
}

impl DmsConfig {
    pub fn from_json_str(json: &str) -> CoreResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Apply `DMS_*` variables from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup(ENV_DB_PATH).filter(|p| !p.is_empty()) {
            self.storage.path = Some(PathBuf::from(path));
        }
        if let Some(url) = lookup(ENV_API_BASE_URL).filter(|u| !u.is_empty()) {
            self.sync.api_base_url = url;
        }
        if let Some(raw) = lookup(ENV_SYNC_INTERVAL_SECS) {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => self.sync.sync_interval_secs = secs,
                _ => warn!(value = %raw, "ignoring invalid {ENV_SYNC_INTERVAL_SECS}"),
            }
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.sync.max_retry_attempts == 0 {
            return Err(CoreError::Config("sync.max_retry_attempts must be at least 1".into()));
        }
        if self.sync.item_timeout_secs == 0 {
            return Err(CoreError::Config("sync.item_timeout_secs must be at least 1".into()));
        }
        if self.sync.api_base_url.trim().is_empty() {
            return Err(CoreError::Config("sync.api_base_url must not be empty".into()));
        }
        Ok(())
    }
}
