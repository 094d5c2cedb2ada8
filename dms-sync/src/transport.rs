//! Delivery collaborators.
//!
//! [`Transport`] pushes one outbox entry to the remote API. [`AuthProvider`]
//! supplies the bearer credential; refreshing and expiring it is entirely its
//! own business. [`HttpTransport`] is the reqwest implementation of the
//! former.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use dms_types::{SyncOperation, SyncQueueItem, tables};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Header carrying the entry's stable key so retries are not applied twice.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Delivers a single outbox entry.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Push `item` to the remote side. `Ok` means the server holds it.
    async fn deliver(&self, item: &SyncQueueItem) -> SyncResult<()>;

    /// Whether delivery can be attempted at all (e.g. credentials present).
    /// A drain is skipped without touching retry counters when this is false.
    async fn ready(&self) -> bool {
        true
    }
}

/// Source of the bearer credential.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn token(&self) -> Option<String>;

    async fn is_authenticated(&self) -> bool {
        self.token().await.is_some()
    }
}

/// In-process token holder, set after login and cleared on logout.
#[derive(Default)]
pub struct StaticToken {
    token: RwLock<Option<String>>,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }

    pub async fn set(&self, token: impl Into<String>) {
        *self.token.write().await = Some(token.into());
    }

    pub async fn clear(&self) {
        *self.token.write().await = None;
    }
}

#[async_trait]
impl AuthProvider for StaticToken {
    async fn token(&self) -> Option<String> {
        self.token.read().await.clone()
    }
}

/// Remote path for a local table.
pub fn endpoint_for_table(table: &str) -> String {
    match table {
        tables::INVOICE_LINES => "/api/invoice-details".to_string(),
        tables::STOCK_LOTS => "/api/stock".to_string(),
        other => format!("/api/{}", other.replace('_', "-")),
    }
}

/// HTTP transport for the DMS REST API.
pub struct HttpTransport {
    client: Client,
    base_url: String,
    auth: Arc<dyn AuthProvider>,
}

impl HttpTransport {
    pub fn new(config: &SyncConfig, auth: Arc<dyn AuthProvider>) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.item_timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            auth,
        })
    }

    fn url_for(&self, item: &SyncQueueItem) -> String {
        let base = format!("{}{}", self.base_url, endpoint_for_table(&item.table_name));
        match item.operation {
            SyncOperation::Insert => base,
            SyncOperation::Update | SyncOperation::Delete => format!("{base}/{}", item.record_id),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn deliver(&self, item: &SyncQueueItem) -> SyncResult<()> {
        let token = self.auth.token().await.ok_or(SyncError::AuthRequired)?;
        let url = self.url_for(item);

        let request = match item.operation {
            SyncOperation::Insert => self.client.post(&url).json(&item.payload),
            SyncOperation::Update => self.client.put(&url).json(&item.payload),
            SyncOperation::Delete => self.client.delete(&url),
        };
        let resp = request
            .bearer_auth(&token)
            .header(IDEMPOTENCY_KEY_HEADER, item.idempotency_key.to_string())
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        // 409 on insert = the server already has this record
        if status == StatusCode::CONFLICT && item.operation == SyncOperation::Insert {
            debug!(item_id = %item.id, table = %item.table_name, "record already exists remotely");
            return Ok(());
        }
        if status == StatusCode::NOT_FOUND && item.operation == SyncOperation::Delete {
            debug!(item_id = %item.id, table = %item.table_name, "record already gone remotely");
            return Ok(());
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(SyncError::AuthFailed(format!("{} on {url}", status.as_u16())));
        }
        if status.is_server_error()
            || status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
        {
            return Err(SyncError::Transient(format!("{} on {url}", status.as_u16())));
        }

        let body = resp.text().await.unwrap_or_default();
        Err(SyncError::Rejected {
            status: status.as_u16(),
            body,
        })
    }

    async fn ready(&self) -> bool {
        self.auth.is_authenticated().await
    }
}
