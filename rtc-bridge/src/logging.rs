//! Logging setup for hosts embedding the bridge
//!
//! Library code only emits `tracing` events; nothing is printed until the
//! host installs a subscriber, either directly or through [`init_logging`].

use std::str::FromStr;

use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Mode selector read by [`init_logging_from_env`]
pub const LOG_MODE_ENV: &str = "RTC_BRIDGE_LOG_MODE";
/// Filter directives, tried before `RUST_LOG`
pub const LOG_LEVEL_ENV: &str = "RTC_BRIDGE_LOG_LEVEL";

/// How the bridge's `tracing` output is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoggingMode {
    /// No subscriber; the embedding host owns stdout and stderr
    #[default]
    Silent,
    /// Compact lines with thread names, `info` by default
    Development,
    /// Multi-line output with thread ids and source locations, `debug` by default
    Debug,
    /// One JSON object per event for log shippers, `info` by default
    Json,
}

impl LoggingMode {
    fn default_directives(self) -> &'static str {
        match self {
            LoggingMode::Debug => "debug",
            _ => "info",
        }
    }
}

impl FromStr for LoggingMode {
    type Err = LoggingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "silent" | "off" => Ok(LoggingMode::Silent),
            "development" | "dev" => Ok(LoggingMode::Development),
            "debug" => Ok(LoggingMode::Debug),
            "json" => Ok(LoggingMode::Json),
            other => Err(LoggingError::InvalidEnv(format!(
                "{LOG_MODE_ENV}={other} (expected silent, development, debug or json)"
            ))),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Invalid logging environment: {0}")]
    InvalidEnv(String),
}

/// Install a global subscriber for `mode`
///
/// ```rust,ignore
/// rtc_bridge::init_logging(LoggingMode::Development)?;
/// ```
///
/// Filter directives come from `RTC_BRIDGE_LOG_LEVEL`, then `RUST_LOG`,
/// then the mode's default. Fails if a subscriber is already installed.
pub fn init_logging(mode: LoggingMode) -> Result<(), LoggingError> {
    let layer = match mode {
        LoggingMode::Silent => return Ok(()),
        LoggingMode::Development => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_names(true)
            .boxed(),
        LoggingMode::Debug => fmt::layer()
            .pretty()
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        LoggingMode::Json => fmt::layer()
            .json()
            .with_current_span(false)
            .with_thread_names(true)
            .boxed(),
    };
    let filter = env_filter(mode.default_directives())?;

    Registry::default()
        .with(layer)
        .with(filter)
        .try_init()
        .map_err(|e| LoggingError::TracingInit(e.to_string()))
}

/// [`init_logging`] with the mode named by `RTC_BRIDGE_LOG_MODE`
///
/// Unset means [`LoggingMode::Silent`].
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    let mode = match std::env::var(LOG_MODE_ENV) {
        Ok(value) => value.parse()?,
        Err(_) => LoggingMode::Silent,
    };
    init_logging(mode)
}

fn env_filter(default_directives: &str) -> Result<EnvFilter, LoggingError> {
    let directives = std::env::var(LOG_LEVEL_ENV)
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| default_directives.to_string());

    EnvFilter::try_new(&directives)
        .map_err(|e| LoggingError::InvalidEnv(format!("{directives}: {e}")))
}

pub fn is_initialized() -> bool {
    tracing::dispatcher::has_been_set()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_mode_installs_nothing() {
        assert!(init_logging(LoggingMode::Silent).is_ok());
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!("debug".parse::<LoggingMode>().unwrap(), LoggingMode::Debug);
        assert_eq!(" JSON ".parse::<LoggingMode>().unwrap(), LoggingMode::Json);
        assert_eq!("".parse::<LoggingMode>().unwrap(), LoggingMode::Silent);
        assert!(matches!(
            "loud".parse::<LoggingMode>(),
            Err(LoggingError::InvalidEnv(_))
        ));
    }

    #[test]
    fn test_default_directives() {
        assert_eq!(LoggingMode::Debug.default_directives(), "debug");
        assert_eq!(LoggingMode::Json.default_directives(), "info");
        assert_eq!(LoggingMode::default(), LoggingMode::Silent);
    }
}
