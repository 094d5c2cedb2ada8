//! SQLite storage layer for DMS.
//!
//! Owns the single local database handle and everything around it: schema
//! registration, guarded open with retries, corruption recovery and seeding.
//!
//! # Architecture
//!
//! - [`Store`] is the table-access capability the ledger and outbox use
//! - [`StoreLifecycle`] is the open/close/destroy surface recovery drives
//! - [`LocalStore`] implements both over one `rusqlite` connection
//! - [`MemoryStore`] implements both over in-memory maps for tests
//! - [`safe_open`] and [`RecoverySupervisor`] bring a store up on startup

mod error;
mod lifecycle;
mod local;
mod memory;
mod recovery;
pub mod schema;
mod store;
mod validate;

pub use error::{StorageError, StorageResult};
pub use lifecycle::{OpenPolicy, OpenReport, safe_open};
pub use local::{LocalStore, StoreLocation};
pub use memory::MemoryStore;
pub use recovery::{InitReport, RecoveryConfig, RecoverySupervisor};
pub use store::{PostedInvoice, Posting, SeedData, Store, StoreDiagnostics, StoreLifecycle};

use std::path::{Path, PathBuf};
use tracing::warn;

/// Journal side files SQLite keeps next to the database.
fn side_files(path: &Path) -> [PathBuf; 2] {
    let name = path.as_os_str().to_string_lossy();
    [
        PathBuf::from(format!("{name}-wal")),
        PathBuf::from(format!("{name}-shm")),
    ]
}

/// Open a SQLite connection with stale WAL recovery.
///
/// If the initial open or the first read fails and a `-wal` file exists
/// alongside the database, the journal files are removed and the open is
/// retried once. This handles an unclean shutdown that leaves a journal
/// SQLite refuses to replay.
pub fn open_sqlite_with_wal_recovery(path: &Path) -> StorageResult<rusqlite::Connection> {
    match open_and_verify(path) {
        Ok(conn) => Ok(conn),
        Err(first_err) => {
            let [wal, shm] = side_files(path);
            if wal.exists() {
                warn!(wal = %wal.display(), error = %first_err, "SQLite open failed, removing stale WAL and retrying");
                if std::fs::remove_file(&wal).is_ok() {
                    let _ = std::fs::remove_file(&shm);
                    return open_and_verify(path);
                }
            }
            Err(first_err)
        }
    }
}

fn open_and_verify(path: &Path) -> StorageResult<rusqlite::Connection> {
    let conn = rusqlite::Connection::open(path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))?;
    Ok(conn)
}

/// Delete a database file and its journal side files. Missing files are not
/// an error.
pub fn delete_database_files(path: &Path) -> StorageResult<()> {
    let [wal, shm] = side_files(path);
    for file in [path.to_path_buf(), wal, shm] {
        match std::fs::remove_file(&file) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
