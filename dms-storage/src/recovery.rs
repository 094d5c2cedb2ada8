//! Startup initialization and corruption recovery.

use crate::error::{StorageError, StorageResult};
use crate::lifecycle::{OpenPolicy, OpenReport, safe_open};
use crate::store::{SeedData, Store, StoreLifecycle};
use crate::delete_database_files;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub open: OpenPolicy,
    /// Database files left behind by earlier generations of the app.
    pub legacy_paths: Vec<PathBuf>,
    /// Pause between deleting and recreating the database.
    pub settle_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            open: OpenPolicy::default(),
            legacy_paths: Vec::new(),
            settle_ms: 500,
        }
    }
}

/// Outcome of [`RecoverySupervisor::initialize`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitReport {
    /// Seed rows were written during this run.
    pub seeded: bool,
    /// The database had to be deleted and rebuilt.
    pub recreated: bool,
}

/// Brings the local store to a usable state on startup.
pub struct RecoverySupervisor<S: ?Sized> {
    store: Arc<S>,
    config: RecoveryConfig,
    seed: SeedData,
}

impl<S> RecoverySupervisor<S>
where
    S: Store + StoreLifecycle + ?Sized + 'static,
{
    pub fn new(store: Arc<S>, config: RecoveryConfig) -> Self {
        Self {
            store,
            config,
            seed: SeedData::default(),
        }
    }

    pub fn with_seed(mut self, seed: SeedData) -> Self {
        self.seed = seed;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Remove legacy databases, open the store and seed it on first run.
    ///
    /// A conflict while opening is handled inside [`safe_open`], which may
    /// wipe the file; that is reported as `recreated`. A conflict raised
    /// while seeding triggers one full recreate. Any other failure is fatal.
    pub async fn initialize(&self) -> StorageResult<InitReport> {
        self.remove_legacy_databases();

        match self.open_and_seed().await {
            Ok((opened, seeded)) => Ok(InitReport {
                seeded,
                recreated: opened.wiped,
            }),
            Err(err) if err.is_schema_conflict() => {
                warn!(error = %err, "schema conflict during initialization, recreating database");
                self.recreate().await
            }
            Err(err) => Err(self.fatal(err)),
        }
    }

    /// Close, delete the current and legacy databases, wait, then reopen and
    /// seed from scratch.
    pub async fn recreate(&self) -> StorageResult<InitReport> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.destroy()).await??;
        self.remove_legacy_databases();
        tokio::time::sleep(Duration::from_millis(self.config.settle_ms)).await;

        let (_, seeded) = self.open_and_seed().await.map_err(|e| self.fatal(e))?;
        info!(seeded, "local database recreated");
        Ok(InitReport {
            seeded,
            recreated: true,
        })
    }

    async fn open_and_seed(&self) -> StorageResult<(OpenReport, bool)> {
        let opened = safe_open(&self.store, &self.config.open).await?;
        let store = Arc::clone(&self.store);
        let seed = self.seed.clone();
        let seeded = tokio::task::spawn_blocking(move || store.seed_defaults(&seed)).await??;
        Ok((opened, seeded))
    }

    fn remove_legacy_databases(&self) {
        for path in &self.config.legacy_paths {
            if let Err(err) = delete_database_files(path) {
                warn!(path = %path.display(), error = %err, "failed to remove legacy database");
            }
        }
    }

    fn fatal(&self, err: StorageError) -> StorageError {
        if err.is_fatal() {
            return err;
        }
        StorageError::InitializationFatal {
            attempts: self.config.open.max_attempts.max(1),
            reason: err.to_string(),
        }
    }
}
