//! Subscriber setup for the `dwscan` binary.
//!
//! `RUST_LOG` filters as usual; without it the level given on the command line (or `warn`)
//! applies. `DWSCAN_LOG_FORMAT` picks `pretty` or `json` output when no format is passed.

use std::env;
use std::io;
use std::str::FromStr;

use anyhow::{anyhow, bail, Result};
use tracing::Level;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

pub const ENV_LOG_FORMAT: &str = "DWSCAN_LOG_FORMAT";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => bail!("Unknown log format: {s}. Use 'pretty' or 'json'"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => bail!("Unknown log level: {s}. Use 'error', 'warn', 'info', 'debug' or 'trace'"),
        }
    }
}

/// Format from `DWSCAN_LOG_FORMAT`, falling back to pretty output.
pub fn format_from_env() -> LogFormat {
    env::var(ENV_LOG_FORMAT)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_default()
}

/// Installs the global subscriber. Logs go to stderr so they never mix with the report.
pub fn init_logging(level: Option<LogLevel>, format: Option<LogFormat>) -> Result<()> {
    let default_level = level.map_or(Level::WARN, Level::from);
    let filter = match level {
        Some(_) => EnvFilter::new(default_level.to_string()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level.to_string())),
    };

    let layer = match format.unwrap_or_else(format_from_env) {
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_writer(io::stderr)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_writer(io::stderr)
            .with_filter(filter)
            .boxed(),
    };

    Registry::default()
        .with(layer)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {e}"))
}
