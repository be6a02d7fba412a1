//! Installs a `tracing_subscriber` `fmt` layer driven by `RUST_LOG`,
//! defaulting to `info` when the variable is unset.

use tracing_subscriber::EnvFilter;

/// Initialize process-wide logging. Safe to call more than once; later
/// calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
