//! Diagnostic logging.
//!
//! # Responsibilities
//! - Initialize the `tracing` subscriber
//! - Resolve the log level from `RUST_LOG` or the configuration
//!
//! # Design Decisions
//! - Diagnostics go to stderr; stdout carries the merged service output
//! - Falls back to `info` when the configured level does not parse

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. Later calls are ignored.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init();
}
