//! Outbox entries, sync status snapshots and the key/value config table.

use crate::{ParseEnumError, SyncItemId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Kind of local mutation an outbox entry replays remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    Insert,
    Update,
    Delete,
}

impl SyncOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncOperation {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(ParseEnumError {
                kind: "sync operation",
                value: other.to_string(),
            }),
        }
    }
}

/// Delivery state of an outbox entry (and of the record it describes).
///
/// `Synced` is terminal. `Failed` only leaves through an explicit reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    #[default]
    Pending,
    Synced,
    Failed,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncState {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            other => Err(ParseEnumError {
                kind: "sync state",
                value: other.to_string(),
            }),
        }
    }
}

/// Append-only outbox entry. Only `status`, `retry_count` and `last_attempt`
/// change after creation; the payload snapshot never does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueItem {
    pub id: SyncItemId,
    pub table_name: String,
    pub record_id: i64,
    pub operation: SyncOperation,
    pub payload: serde_json::Value,
    pub status: SyncState,
    pub retry_count: u32,
    pub last_attempt: Option<i64>,
    pub created_at: i64,
    /// Stable across retries so the server can drop duplicates.
    pub idempotency_key: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSyncItem {
    pub table_name: String,
    pub record_id: i64,
    pub operation: SyncOperation,
    pub payload: serde_json::Value,
}

impl NewSyncItem {
    pub fn new(
        table_name: impl Into<String>,
        record_id: i64,
        operation: SyncOperation,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            record_id,
            operation,
            payload,
        }
    }
}

/// Observational snapshot of the outbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub is_online: bool,
    pub is_syncing: bool,
    pub pending_items: u64,
    pub failed_items: u64,
    pub last_sync: Option<DateTime<Utc>>,
}

/// One row of the flat key/value config table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfigEntry {
    pub key: String,
    pub value: String,
    pub description: Option<String>,
    pub updated_at: i64,
}
