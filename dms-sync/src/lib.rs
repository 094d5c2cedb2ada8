//! Sync outbox for DMS.
//!
//! Local writes are recorded in the store's `sync_queue` and pushed to the
//! remote API later, one entry at a time, with bounded retries:
//!
//! - [`Outbox`] owns the queue state machine (enqueue, drain, retry, purge)
//! - [`Transport`] and [`AuthProvider`] are the delivery collaborators;
//!   [`HttpTransport`] is the reqwest implementation
//! - [`SyncEngine`] runs drains on a timer and on connectivity changes

pub mod config;
pub mod engine;
pub mod error;
pub mod outbox;
pub mod transport;

pub use config::SyncConfig;
pub use engine::{SyncCommand, SyncEngine, SyncHandle, create_sync_engine};
pub use error::{SyncError, SyncResult};
pub use outbox::{DrainOutcome, DrainReport, Outbox};
pub use transport::{
    AuthProvider, HttpTransport, IDEMPOTENCY_KEY_HEADER, StaticToken, Transport, endpoint_for_table,
};
