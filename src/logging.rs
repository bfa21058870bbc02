//! Logging configuration and initialization

use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::config::RuntimeConfig;

/// Build the filter for a configured level and CLI verbosity.
///
/// Each `-v` raises the level one step above the configured one; `RUST_LOG`
/// still wins when set.
pub fn env_filter(config: &RuntimeConfig, verbose: u8) -> EnvFilter {
    let level = match verbose {
        0 => config.log_level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize tracing/logging for the process
pub fn init_logging(config: &RuntimeConfig, verbose: u8) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(config, verbose))
        .with_target(verbose >= 2)
        .with_thread_ids(verbose >= 3)
        .with_line_number(verbose >= 3)
        .init();

    debug!("taskexec started with verbosity level: {}", verbose);
}
