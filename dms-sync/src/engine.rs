//! Background sync loop.
//!
//! Drains the outbox on a fixed interval while online, right away when
//! connectivity comes back, and on demand through [`SyncHandle`]. Delivered
//! entries past their retention are purged once a day.

use crate::error::{SyncError, SyncResult};
use crate::outbox::{DrainOutcome, Outbox};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

const PURGE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCommand {
    ForceSync,
    SetOnline(bool),
    RetryFailed,
    Stop,
}

/// Handle for sending commands to the sync engine.
#[derive(Clone)]
pub struct SyncHandle {
    command_tx: mpsc::Sender<SyncCommand>,
    outbox: Arc<Outbox>,
    /// Set while a `ForceSync` sits in the channel unclaimed.
    force_pending: Arc<AtomicBool>,
}

impl SyncHandle {
    async fn send(&self, command: SyncCommand) -> SyncResult<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| SyncError::ChannelClosed)
    }

    /// Request an immediate drain. A no-op while a drain is in flight or
    /// another request is still queued.
    pub async fn force_sync(&self) -> SyncResult<()> {
        if self.outbox.is_syncing() {
            debug!("drain in flight, ignoring force sync");
            return Ok(());
        }
        if self.force_pending.swap(true, Ordering::SeqCst) {
            debug!("force sync already queued");
            return Ok(());
        }
        let sent = self.send(SyncCommand::ForceSync).await;
        if sent.is_err() {
            self.force_pending.store(false, Ordering::SeqCst);
        }
        sent
    }

    pub async fn set_online(&self, online: bool) -> SyncResult<()> {
        self.send(SyncCommand::SetOnline(online)).await
    }

    pub async fn retry_failed(&self) -> SyncResult<()> {
        self.send(SyncCommand::RetryFailed).await
    }

    pub async fn stop(&self) -> SyncResult<()> {
        self.send(SyncCommand::Stop).await
    }
}

pub struct SyncEngine {
    outbox: Arc<Outbox>,
    command_rx: mpsc::Receiver<SyncCommand>,
    force_pending: Arc<AtomicBool>,
}

/// Creates a sync engine and its command handle. Spawn [`SyncEngine::run`]
/// to start it.
pub fn create_sync_engine(outbox: Arc<Outbox>) -> (SyncHandle, SyncEngine) {
    let (command_tx, command_rx) = mpsc::channel(64);
    let force_pending = Arc::new(AtomicBool::new(false));
    let handle = SyncHandle {
        command_tx,
        outbox: Arc::clone(&outbox),
        force_pending: Arc::clone(&force_pending),
    };
    let engine = SyncEngine {
        outbox,
        command_rx,
        force_pending,
    };
    (handle, engine)
}

impl SyncEngine {
    /// Runs the event loop until [`SyncCommand::Stop`] or every handle is
    /// dropped.
    pub async fn run(mut self) {
        let period = self.outbox.config().sync_interval();
        info!(interval_secs = period.as_secs(), "sync engine started");

        // A drain that overruns its period must not be followed by a burst
        // of catch-up ticks.
        let mut sync_interval = tokio::time::interval(period);
        sync_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut purge_interval = tokio::time::interval(PURGE_INTERVAL);
        purge_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Skip first immediate tick
        sync_interval.tick().await;

        loop {
            tokio::select! {
                _ = sync_interval.tick() => {
                    if self.outbox.is_online() {
                        self.drain("interval").await;
                    }
                }
                _ = purge_interval.tick() => {
                    if let Err(e) = self.outbox.purge_synced().await {
                        error!(error = %e, "purging delivered items failed");
                    }
                }
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(SyncCommand::ForceSync) => {
                            self.force_pending.store(false, Ordering::SeqCst);
                            self.drain("forced").await;
                        }
                        Some(SyncCommand::SetOnline(online)) => {
                            if self.outbox.set_online(online) {
                                self.drain("reconnected").await;
                            }
                        }
                        Some(SyncCommand::RetryFailed) => {
                            if let Err(e) = self.outbox.retry_failed().await {
                                error!(error = %e, "retrying failed items failed");
                            }
                        }
                        Some(SyncCommand::Stop) => {
                            info!("sync engine stopping");
                            break;
                        }
                        None => {
                            info!("command channel closed, stopping sync engine");
                            break;
                        }
                    }
                }
            }
        }

        info!("sync engine stopped");
    }

    async fn drain(&self, trigger: &'static str) {
        match self.outbox.drain().await {
            Ok(DrainOutcome::Completed(report)) => {
                debug!(trigger, attempted = report.attempted, "drain finished");
            }
            Ok(outcome) => debug!(trigger, ?outcome, "drain skipped"),
            Err(e) => error!(trigger, error = %e, "drain failed"),
        }
    }
}
