//! Logging utilities for the simple-netlink crates.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_LEVEL: &str = "info";

/// Initialize tracing with sensible defaults.
///
/// Uses the RUST_LOG environment variable to control log levels.
/// Default level is INFO.
pub fn init() {
    init_with(None, None);
}

/// Initialize tracing with JSON formatting (useful for structured logging).
pub fn init_json() {
    init_with(None, Some("json"));
}

/// Initialize tracing from explicit settings.
///
/// `level` is an `EnvFilter` directive used when RUST_LOG is unset; `format`
/// selects `"json"` output, anything else gives the plain formatter. Calling
/// this more than once is harmless, later calls are ignored.
pub fn init_with(level: Option<&str>, format: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.unwrap_or(DEFAULT_LEVEL)));

    let result = if format.is_some_and(|f| f.eq_ignore_ascii_case("json")) {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
