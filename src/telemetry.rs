//! Logging setup for the probe binary.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Environment variable holding filter directives, e.g. `ddp_probe=trace`.
pub const LOG_FILTER_ENV: &str = "RUST_LOG";

pub fn default_level(debug: bool) -> LevelFilter {
    if debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    }
}

/// Builds the filter: directives from `RUST_LOG` when set, otherwise
/// everything at `info`, or `debug` when `debug` is on.
pub fn env_filter(debug: bool) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(default_level(debug).into())
        .with_env_var(LOG_FILTER_ENV)
        .from_env_lossy()
}

/// Installs a stderr formatter. A second call is a no-op.
pub fn init_tracing(debug: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(debug))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
