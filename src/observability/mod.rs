//! Logging setup
//!
//! The library only emits `tracing` events; installing a subscriber is
//! left to the binary. Log lines go to stderr so stdout stays reserved
//! for command output.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, e.g. `aerostore=debug`
pub const LOG_ENV: &str = "AEROSTORE_LOG";

const DEFAULT_FILTER: &str = "info";

/// Filter from `AEROSTORE_LOG`, falling back to `info`
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs the global fmt subscriber
///
/// Returns an error if a global subscriber is already set.
pub fn init_tracing() -> Result<(), String> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .map_err(|e| format!("failed to initialize logging: {}", e))
}
