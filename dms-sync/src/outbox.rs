//! Durable outbox of local mutations awaiting remote delivery.
//!
//! Every local write leaves one queue entry behind. A drain walks the due
//! entries oldest first and delivers them one at a time:
//!
//! - **Delivered**: the entry becomes `Synced` and never changes again
//! - **Failed attempt**: `retry_count` goes up; the entry stays `Pending`
//!   until the count reaches the configured maximum, then it is `Failed`
//! - **Failed entries** only come back through [`Outbox::retry_failed`]
//!
//! At most one drain runs at a time. A call that arrives while another is in
//! flight returns [`DrainOutcome::AlreadyRunning`] instead of queueing.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::Transport;
use chrono::{DateTime, Utc};
use dms_storage::{StorageResult, Store};
use dms_types::{
    NewSyncItem, SyncOperation, SyncQueueItem, SyncState, SyncStatus, config_keys, now_millis,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Counters for one completed drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    /// Entries a delivery was attempted for.
    pub attempted: usize,
    pub synced: usize,
    /// Failed this time but still within the retry budget.
    pub retrying: usize,
    /// Failed this time and moved to `Failed`.
    pub exhausted: usize,
    /// Still backing off from an earlier failure; left untouched.
    pub deferred: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrainOutcome {
    Completed(DrainReport),
    /// Another drain was in flight.
    AlreadyRunning,
    Offline,
    /// The transport cannot deliver right now (e.g. signed out).
    NotReady,
}

/// Resets the in-flight flag when a drain ends, however it ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Outbox {
    store: Arc<dyn Store>,
    transport: Arc<dyn Transport>,
    config: SyncConfig,
    online: AtomicBool,
    draining: AtomicBool,
}

impl Outbox {
    pub fn new(store: Arc<dyn Store>, transport: Arc<dyn Transport>, config: SyncConfig) -> Self {
        Self {
            store,
            transport,
            config,
            online: AtomicBool::new(true),
            draining: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Returns true when this call brought the outbox back online.
    pub fn set_online(&self, online: bool) -> bool {
        let was = self.online.swap(online, Ordering::SeqCst);
        if was != online {
            info!(online, "connectivity changed");
        }
        online && !was
    }

    pub fn is_syncing(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    async fn blocking<T, F>(&self, f: F) -> SyncResult<T>
    where
        F: FnOnce(&dyn Store) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        Ok(tokio::task::spawn_blocking(move || f(store.as_ref())).await??)
    }

    // ── Enqueue ──

    /// Append an entry. Best effort: a failure is logged and reported as
    /// `None`, never raised to the caller whose write already happened.
    pub async fn enqueue(&self, item: NewSyncItem) -> Option<SyncQueueItem> {
        let table = item.table_name.clone();
        let record_id = item.record_id;
        match self.blocking(move |s| s.enqueue_sync_item(&item)).await {
            Ok(queued) => {
                debug!(item_id = %queued.id, table = %table, record_id, "queued for sync");
                Some(queued)
            }
            Err(e) => {
                error!(table = %table, record_id, error = %e, "failed to queue record for sync");
                None
            }
        }
    }

    /// Snapshot `record` as JSON and enqueue it.
    pub async fn enqueue_record<T: Serialize>(
        &self,
        table: &str,
        record_id: i64,
        operation: SyncOperation,
        record: &T,
    ) -> Option<SyncQueueItem> {
        match serde_json::to_value(record) {
            Ok(payload) => {
                self.enqueue(NewSyncItem::new(table, record_id, operation, payload))
                    .await
            }
            Err(e) => {
                error!(table, record_id, error = %e, "failed to snapshot record for sync");
                None
            }
        }
    }

    // ── Drain ──

    /// Deliver every due entry, sequentially.
    pub async fn drain(&self) -> SyncResult<DrainOutcome> {
        if !self.is_online() {
            debug!("offline, skipping drain");
            return Ok(DrainOutcome::Offline);
        }
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("drain already in progress");
            return Ok(DrainOutcome::AlreadyRunning);
        }
        let _guard = DrainGuard(&self.draining);

        if !self.transport.ready().await {
            info!("transport not ready, skipping drain");
            return Ok(DrainOutcome::NotReady);
        }

        let max = self.config.max_retry_attempts;
        let items = self.blocking(move |s| s.sync_items_due(max)).await?;
        if items.is_empty() {
            debug!("no items to sync");
            return Ok(DrainOutcome::Completed(DrainReport::default()));
        }

        let mut report = DrainReport::default();
        for item in items {
            if !self.is_due(&item, now_millis()) {
                report.deferred += 1;
                continue;
            }
            report.attempted += 1;

            let timeout = self.config.item_timeout();
            let result = match tokio::time::timeout(timeout, self.transport.deliver(&item)).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout(self.config.item_timeout_secs)),
            };

            match result {
                Ok(()) => {
                    self.mark_delivered(&item).await?;
                    report.synced += 1;
                }
                Err(err) => match self.mark_failed(&item, &err).await? {
                    Some(updated) if updated.status == SyncState::Failed => report.exhausted += 1,
                    _ => report.retrying += 1,
                },
            }
        }

        if report.synced > 0 {
            self.save_last_sync().await;
        }
        info!(
            synced = report.synced,
            retrying = report.retrying,
            exhausted = report.exhausted,
            deferred = report.deferred,
            "sync completed"
        );
        Ok(DrainOutcome::Completed(report))
    }

    /// Entries that failed before wait `retry_delay(retry_count)` after their
    /// last attempt.
    fn is_due(&self, item: &SyncQueueItem, now: i64) -> bool {
        let Some(last) = item.last_attempt else {
            return true;
        };
        let wait = self.config.retry_delay(item.retry_count).as_millis() as i64;
        now.saturating_sub(last) >= wait
    }

    async fn mark_delivered(&self, item: &SyncQueueItem) -> SyncResult<()> {
        let id = item.id;
        let table = item.table_name.clone();
        let record_id = item.record_id;
        self.blocking(move |s| {
            if s.mark_sync_item_synced(id, now_millis())? {
                s.set_record_sync_status(&table, record_id, SyncState::Synced)?;
            }
            Ok(())
        })
        .await?;
        debug!(item_id = %item.id, table = %item.table_name, record_id, "item synced");
        Ok(())
    }

    async fn mark_failed(
        &self,
        item: &SyncQueueItem,
        err: &SyncError,
    ) -> SyncResult<Option<SyncQueueItem>> {
        let id = item.id;
        let table = item.table_name.clone();
        let record_id = item.record_id;
        let max = self.config.max_retry_attempts;
        let updated = self
            .blocking(move |s| {
                let updated = s.record_sync_failure(id, now_millis(), max)?;
                if matches!(&updated, Some(u) if u.status == SyncState::Failed) {
                    s.set_record_sync_status(&table, record_id, SyncState::Failed)?;
                }
                Ok(updated)
            })
            .await?;

        match &updated {
            Some(u) if u.status == SyncState::Failed => {
                let exhausted = SyncError::RetryBudgetExhausted {
                    attempts: u.retry_count,
                };
                warn!(item_id = %item.id, table = %item.table_name, error = %err, "{exhausted}");
            }
            Some(u) => {
                warn!(
                    item_id = %item.id,
                    table = %item.table_name,
                    attempt = u.retry_count,
                    transient = err.is_transient(),
                    error = %err,
                    "sync attempt failed"
                );
            }
            None => {}
        }
        Ok(updated)
    }

    async fn save_last_sync(&self) {
        let now = Utc::now().to_rfc3339();
        let saved = self
            .blocking(move |s| {
                s.config_set(
                    config_keys::LAST_SYNC,
                    &now,
                    Some("Last successful sync timestamp"),
                )
            })
            .await;
        if let Err(e) = saved {
            error!(error = %e, "failed to save last sync date");
        }
    }

    // ── Maintenance ──

    /// Put every `Failed` entry back to `Pending` with a fresh budget and
    /// drain right away when online. Returns the number of entries reset.
    pub async fn retry_failed(&self) -> SyncResult<u64> {
        let reset = self.blocking(|s| s.reset_failed_sync_items()).await?;
        info!(reset, "failed sync items reset");
        if reset > 0 && self.is_online() {
            self.drain().await?;
        }
        Ok(reset)
    }

    /// Drop every `Failed` entry.
    pub async fn clear_failed(&self) -> SyncResult<u64> {
        let cleared = self.blocking(|s| s.delete_failed_sync_items()).await?;
        info!(cleared, "failed sync items cleared");
        Ok(cleared)
    }

    /// Drop delivered entries older than `purge_synced_after_days`.
    pub async fn purge_synced(&self) -> SyncResult<u64> {
        let cutoff = now_millis() - i64::from(self.config.purge_synced_after_days) * MS_PER_DAY;
        let purged = self.blocking(move |s| s.purge_synced_before(cutoff)).await?;
        if purged > 0 {
            info!(purged, "purged delivered sync items");
        }
        Ok(purged)
    }

    // ── Status ──

    pub async fn last_sync(&self) -> SyncResult<Option<DateTime<Utc>>> {
        let entry = self.blocking(|s| s.config_get(config_keys::LAST_SYNC)).await?;
        Ok(entry
            .and_then(|e| DateTime::parse_from_rfc3339(&e.value).ok())
            .map(|at| at.with_timezone(&Utc)))
    }

    /// Observational snapshot; changes nothing.
    pub async fn status(&self) -> SyncResult<SyncStatus> {
        let (pending_items, failed_items) = self
            .blocking(|s| {
                Ok((
                    s.count_sync_items(SyncState::Pending)?,
                    s.count_sync_items(SyncState::Failed)?,
                ))
            })
            .await?;
        Ok(SyncStatus {
            is_online: self.is_online(),
            is_syncing: self.is_syncing(),
            pending_items,
            failed_items,
            last_sync: self.last_sync().await?,
        })
    }
}
