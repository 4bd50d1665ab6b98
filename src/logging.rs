//! Subscriber setup for binaries and tests embedding the engine.
//!
//! The engine itself only emits `tracing` events; installing a subscriber
//! is left to the host. [`init_logging`] is a convenience for hosts that
//! want the usual fmt output filtered by `RUST_LOG`.

use tracing_subscriber::EnvFilter;

/// Installs a fmt subscriber filtered by `RUST_LOG`, falling back to `default_filter`.
///
/// Calling it more than once is harmless: later calls leave the first
/// subscriber in place.
///
/// # Examples
///
/// ```
/// taskscope::logging::init_logging("taskscope=debug");
/// taskscope::logging::init_logging("info");
/// ```
pub fn init_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(default_filter, "logging initialized");
    }
}
