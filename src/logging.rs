//! Logging setup for embedding processes.

use tracing_subscriber::EnvFilter;

/// Install a stderr `tracing` subscriber filtered via `RUST_LOG`.
///
/// Defaults to `info` when the variable is unset. Calling this more than once
/// per process is a no-op.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
