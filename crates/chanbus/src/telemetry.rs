//! Log output for binaries and tests.
//!
//! Filtering follows `RUST_LOG`; without it the bus logs at `info`.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

/// Installs a formatted subscriber. Later calls are no-ops.
pub fn init() {
    init_with(DEFAULT_FILTER);
}

/// Like `init`, with `fallback` used when `RUST_LOG` is unset or invalid.
pub fn init_with(fallback: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).try_init();
}
