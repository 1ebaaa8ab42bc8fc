//! Configuration file handling
//!
//! Settings live in `<config_dir>/sqlstencil/config.toml`. Every field is
//! optional; a missing file means defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlstencil_query::ClientOptions;

pub const CONFIG_FILE_NAME: &str = "config.toml";

/// CLI settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the query backend
    pub endpoint: String,
    pub flush_interval_ms: u64,
    pub request_timeout_secs: u64,
    /// Default tracing filter; `RUST_LOG` wins when set
    pub log_filter: String,
    /// Also write daily-rolling JSON logs
    pub json_logs: bool,
    /// Directory for JSON logs; defaults to the local data dir
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/api".to_string(),
            flush_interval_ms: 32,
            request_timeout_secs: 30,
            log_filter: "warn,sqlstencil_cli=info,sqlstencil_query=info".to_string(),
            json_logs: false,
            log_dir: None,
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing file yields defaults; an unreadable or malformed one is an
    /// error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match config_file() {
                Ok(path) => path,
                Err(_) => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::parse(&text).with_context(|| format!("Invalid config file: {:?}", path))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions::new()
            .with_flush_interval(Duration::from_millis(self.flush_interval_ms))
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs))
    }

    pub fn log_directory(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(default_log_dir)
    }
}

pub fn config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .context("Could not determine config directory")
        .map(|p| p.join("sqlstencil"))
}

pub fn config_file() -> Result<PathBuf> {
    config_dir().map(|p| p.join(CONFIG_FILE_NAME))
}

pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sqlstencil")
        .join("logs")
}
