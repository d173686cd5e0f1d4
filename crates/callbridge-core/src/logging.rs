//! Logging setup and host log forwarding

use std::str::FromStr;

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

/// Errors from logging setup
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoggingError {
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    #[error("A global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Configuration for the logging system
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// The log level to use
    pub level: Level,
    /// Whether to include file and line information
    pub file_info: bool,
    /// Whether to log spans
    pub log_spans: bool,
    /// Application name included in the startup line
    pub app_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Level::INFO,
            file_info: false,
            log_spans: false,
            app_name: "callbridge".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn new(level: Level, app_name: impl Into<String>) -> Self {
        LoggingConfig {
            level,
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    pub fn with_spans(mut self) -> Self {
        self.log_spans = true;
        self
    }
}

/// Install a global `fmt` subscriber; `RUST_LOG` directives still apply
pub fn setup_logging(config: LoggingConfig) -> Result<(), LoggingError> {
    let filter = EnvFilter::from_default_env().add_directive(config.level.into());

    let span_events = if config.log_spans {
        FmtSpan::ACTIVE
    } else {
        FmtSpan::NONE
    };

    fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(span_events)
        .with_file(config.file_info)
        .with_line_number(config.file_info)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)?;

    tracing::info!("Starting {} v{}", config.app_name, crate::VERSION);
    Ok(())
}

/// Parse a tracing level from a string
pub fn parse_log_level(level: &str) -> Result<Level, LoggingError> {
    Level::from_str(level).map_err(|_| LoggingError::InvalidLevel(level.to_string()))
}

/// Severity of a log line forwarded from the host UI layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl FromStr for LogLevel {
    type Err = LoggingError;

    fn from_str(level: &str) -> Result<Self, Self::Err> {
        match level.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(LoggingError::InvalidLevel(level.to_string())),
        }
    }
}

/// Re-emit a host log line under the `callbridge::host` target
pub fn log(message: &str, level: LogLevel) {
    match level {
        LogLevel::Debug => tracing::debug!(target: "callbridge::host", "{}", message),
        LogLevel::Info => tracing::info!(target: "callbridge::host", "{}", message),
        LogLevel::Warn => tracing::warn!(target: "callbridge::host", "{}", message),
        LogLevel::Error => tracing::error!(target: "callbridge::host", "{}", message),
    }
}
