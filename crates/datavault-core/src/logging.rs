//! Logging bootstrap shared by the binaries.

use env_logger::{Builder, Env};

/// Initialise the global logger, honouring `RUST_LOG` when set.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init(default_level: &str) {
    let _ = Builder::from_env(Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .try_init();
}
