//! Logging setup.

/// Install the global `tracing` subscriber.
///
/// Honors `RUST_LOG`, falls back to `info`, writes to stderr. Safe to call
/// more than once; later calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
