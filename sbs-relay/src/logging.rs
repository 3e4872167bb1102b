//! Logging setup for the relay.
//!
//! Compact single-line output on stderr so stdout stays free for the
//! `config` subcommand. Configurable via RUST_LOG.

use std::io;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Default filter directive when RUST_LOG is not set.
pub fn default_directive(quiet: bool) -> &'static str {
    if quiet {
        "warn"
    } else {
        "info"
    }
}

/// Initialize the global subscriber. RUST_LOG wins over `quiet`.
pub fn init_logging(quiet: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(quiet)));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .compact();

    // A second init (tests) is harmless; keep the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .try_init();
}
