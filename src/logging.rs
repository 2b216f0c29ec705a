//! Logging configuration
//!
//! Structured logging with tracing. Diagnostics go to stderr so progress and
//! results on stdout stay readable.

use tracing::Level;
use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

/// Initialize logging with environment-based filtering
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("onion_vanity=info,t3v=info"));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_names(true)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Initialize logging with specific level
pub fn init_with_level(level: Level) {
    let filter = EnvFilter::new(format!("onion_vanity={},t3v={}", level, level));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}
