//! Telemetry helpers for structured logging and tracing.

use tracing_subscriber::EnvFilter;

/// Install an env-filtered fmt subscriber unless one is already set.
///
/// `RUST_LOG` controls the filter; without it nothing is logged.
pub fn init_tracing() {
    init_tracing_with_default("off");
}

/// Like [`init_tracing`] but falls back to `default_directive` when `RUST_LOG`
/// is unset or unparsable, e.g. `"lifecycle_pool=debug"`.
pub fn init_tracing_with_default(default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    // Fails only when a global subscriber is already installed.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}
