//! Tracing setup.
//!
//! Structured logging for the hub and the CLI via `tracing` and
//! `tracing-subscriber`:
//! - pretty, compact or JSON output
//! - `RUST_LOG` overrides the configured level
//! - idempotent initialisation, so tests and embedding applications can call
//!   it freely
//!
//! # Example
//! ```no_run
//! use sensor_hub::{config::HubConfig, logging};
//! use tracing::info;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HubConfig::load()?;
//! logging::init_from_config(&config)?;
//! info!(ports = config.ports.len(), "Hub starting");
//! # Ok(())
//! # }
//! ```

use crate::config::HubConfig;
use crate::error::{HubError, HubResult};
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Multi-line, coloured (for development)
    Pretty,
    /// Single-line, no colours
    Compact,
    /// One JSON object per line (for log aggregation)
    Json,
}

/// Logging configuration options
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum level when `RUST_LOG` is unset
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
    /// Whether to include file and line numbers
    pub with_file_and_line: bool,
    /// Whether to include thread names (readers share tokio's blocking pool, so
    /// the `port` field, not the thread, identifies a reader's lines)
    pub with_thread_names: bool,
    /// Whether to enable ANSI colours (Pretty only)
    pub with_ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Compact,
            with_file_and_line: false,
            with_thread_names: true,
            with_ansi: true,
        }
    }
}

impl LoggingConfig {
    /// Logging config from hub configuration
    pub fn from_hub_config(config: &HubConfig) -> HubResult<Self> {
        let level = parse_log_level(&config.application.log_level)?;
        Ok(Self {
            level,
            ..Default::default()
        })
    }

    /// Logging config with the given level
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Set output format
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable ANSI colours
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Initialise logging from hub configuration.
pub fn init_from_config(config: &HubConfig) -> HubResult<()> {
    init(LoggingConfig::from_hub_config(config)?)
}

/// Initialise the global subscriber.
///
/// Returns `Ok(())` if a subscriber is already installed.
pub fn init(config: LoggingConfig) -> HubResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let layer = match config.format {
        OutputFormat::Pretty => fmt::layer()
            .pretty()
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_thread_names(config.with_thread_names)
            .with_ansi(config.with_ansi)
            .with_filter(env_filter)
            .boxed(),
        OutputFormat::Compact => fmt::layer()
            .compact()
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_thread_names(config.with_thread_names)
            .with_ansi(false)
            .with_filter(env_filter)
            .boxed(),
        OutputFormat::Json => fmt::layer()
            .json()
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_thread_names(config.with_thread_names)
            .with_filter(env_filter)
            .boxed(),
    };

    // Already-installed subscriber is expected in tests and embedders.
    if tracing_subscriber::registry().with(layer).try_init().is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
    Ok(())
}

/// Parse a log level name, case-insensitively.
pub fn parse_log_level(level: &str) -> HubResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(HubError::Configuration(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        ))),
    }
}
