//! Logging setup
//!
//! Library code emits `tracing` events; binaries and scripts call
//! [`init_logging`] once to print them.

use tracing_subscriber::EnvFilter;

/// Install a stdout subscriber
///
/// `RUST_LOG` takes precedence; otherwise the level is `debug` when `debug`
/// is set and `info` when not. Returns `false` if a global subscriber was
/// already installed, in which case nothing changes.
pub fn init_logging(debug: bool) -> bool {
    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stdout)
        .try_init()
        .is_ok()
}
