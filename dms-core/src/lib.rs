//! DMS offline engine.
//!
//! Field sales and distribution bookkeeping that keeps working without a
//! network: a local SQLite store with startup recovery, a FIFO stock ledger,
//! outstanding balance allocation and an outbox that replays local writes to
//! the server when connectivity allows.
//!
//! ```no_run
//! use dms_core::{Dms, DmsConfig, init_tracing};
//! use dms_sync::{HttpTransport, StaticToken};
//! use std::sync::Arc;
//!
//! # async fn run() -> dms_core::CoreResult<()> {
//! init_tracing();
//! let mut config = DmsConfig::from_file("dms.json")?;
//! config.apply_env_overrides();
//!
//! let auth = Arc::new(StaticToken::new("token"));
//! let transport = Arc::new(HttpTransport::new(&config.sync, auth)?);
//! let dms = Dms::open(config, transport).await?;
//! println!("{:?}", dms.sync_status().await?);
//! dms.close().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
mod dms;
pub mod error;
pub mod telemetry;

pub use config::{DmsConfig, StorageConfig};
pub use dms::Dms;
pub use error::{CoreError, CoreResult};
pub use telemetry::init_tracing;
