//! Logging initialization.
//!
//! Thin mapping from [`Config`] onto the `observability` package. Library
//! crates never call this; the embedding application does, once.

use crate::{Config, Paths};
use observability::LogConfig;

const SERVICE_NAME: &str = "cardking";

/// Install the tracing subscriber described by `config`.
///
/// Returns `false` when logging is disabled for this environment and nothing
/// was installed.
pub fn init_logging(config: &Config, paths: &Paths) -> bool {
    if !config.enable_logging {
        return false;
    }

    observability::init_with_config(LogConfig {
        service_name: SERVICE_NAME.into(),
        default_level: parse_level(&config.log_level).to_string().to_lowercase(),
        log_path: Some(paths.log_file()),
        also_stderr: config.log_stderr,
    });

    tracing::debug!(environment = %config.environment, "logging initialized");
    true
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.trim().to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
