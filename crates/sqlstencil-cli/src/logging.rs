//! Logging setup for the sqlstencil binary
//!
//! Console output goes to stderr so query results on stdout stay clean.
//! Optional JSON logs roll daily under the configured log directory.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::Config;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Directory where JSON log files are written
    pub log_dir: PathBuf,

    /// Whether to write JSON logs to files
    pub enable_json_logs: bool,

    /// Whether to include file/line information in console logs
    pub include_location: bool,

    /// Default log level filter
    pub default_filter: String,
}

impl LoggingConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            log_dir: config.log_directory(),
            enable_json_logs: config.json_logs,
            include_location: cfg!(debug_assertions),
            default_filter: config.log_filter.clone(),
        }
    }

    /// RUST_LOG takes precedence over the configured filter
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_filter))
    }
}

/// Install the global subscriber.
///
/// The returned guard flushes the JSON writer on drop and must be held for
/// the life of the program.
pub fn init(config: LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter = config.env_filter();
    let mut layers = Vec::new();

    let console_layer = fmt::layer()
        .with_target(true)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_writer(std::io::stderr)
        .pretty()
        .with_filter(env_filter.clone())
        .boxed();
    layers.push(console_layer);

    let mut guard = None;
    if config.enable_json_logs {
        std::fs::create_dir_all(&config.log_dir)?;
        let file_appender = tracing_appender::rolling::daily(&config.log_dir, "sqlstencil.log");
        let (non_blocking, worker) = tracing_appender::non_blocking(file_appender);
        guard = Some(worker);

        // NEW fires once per span; ENTER would repeat on every async re-poll
        let json_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_ansi(false)
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(non_blocking)
            .with_filter(env_filter)
            .boxed();
        layers.push(json_layer);
    }

    tracing_subscriber::registry().with(layers).try_init()?;

    tracing::debug!(
        log_dir = %config.log_dir.display(),
        json_enabled = config.enable_json_logs,
        "Logging initialized"
    );
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_follows_settings() {
        let settings = Config {
            json_logs: true,
            log_filter: "debug".into(),
            log_dir: Some(PathBuf::from("/tmp/sqlstencil-logs")),
            ..Config::default()
        };
        let config = LoggingConfig::from_config(&settings);

        assert!(config.enable_json_logs);
        assert_eq!(config.default_filter, "debug");
        assert_eq!(config.log_dir, PathBuf::from("/tmp/sqlstencil-logs"));
    }
}
