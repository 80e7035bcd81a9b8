//! Hub configuration using Figment.
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration, `config/hub.toml` by default)
//! 2. environment variables prefixed with `SENSOR_HUB_`
//!
//! # Example
//! ```no_run
//! use sensor_hub::config::HubConfig;
//!
//! let config = HubConfig::load()?;
//! println!("Application: {}", config.application.name);
//! # Ok::<(), sensor_hub::error::HubError>(())
//! ```
//!
//! ```toml
//! [application]
//! name = "sensor-hub"
//! log_level = "info"
//!
//! [serial]
//! baud_rate = 9600
//! read_timeout_ms = 50
//!
//! [[ports]]
//! id = "/dev/ttyUSB0"
//!
//! [[ports]]
//! id = "/dev/ttyUSB1"
//! baud_rate = 115200
//! ```

use crate::error::{HubError, HubResult};
use crate::hardware::connection::DEFAULT_BAUD_RATE;
use crate::protocol::framing::DEFAULT_MAX_FRAME_LEN;
use crate::session::{SessionSettings, DEFAULT_CLOSE_GRACE};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/hub.toml";

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "SENSOR_HUB_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Serial defaults shared by every port
    #[serde(default)]
    pub serial: SerialConfig,
    /// Ports to register at startup
    #[serde(default)]
    pub ports: Vec<PortDefinition>,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Serial defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Baud rate for ports that do not set their own
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Single read timeout in milliseconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    /// How long closing a port waits for its reader, in milliseconds
    #[serde(default = "default_close_grace")]
    pub close_grace_ms: u64,
    /// Capacity of the event broadcast channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Longest accepted payload before a terminator, in bytes
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

/// One port to register
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDefinition {
    /// Device path or name (e.g. "/dev/ttyUSB0", "COM16")
    pub id: String,
    /// Per-port baud rate override
    #[serde(default)]
    pub baud_rate: Option<u32>,
    /// Whether this port is registered at startup
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl PortDefinition {
    /// Enabled port using the shared baud rate.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            baud_rate: None,
            enabled: true,
        }
    }

    /// Enabled port with its own baud rate.
    pub fn with_baud_rate(id: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            baud_rate: Some(baud_rate),
            ..Self::new(id)
        }
    }
}

// Default value functions
fn default_name() -> String {
    "sensor-hub".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_read_timeout() -> u64 {
    50
}

fn default_close_grace() -> u64 {
    DEFAULT_CLOSE_GRACE.as_millis() as u64
}

fn default_event_capacity() -> usize {
    1024
}

fn default_max_frame_len() -> usize {
    DEFAULT_MAX_FRAME_LEN
}

fn default_enabled() -> bool {
    true
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout(),
            close_grace_ms: default_close_grace(),
            event_capacity: default_event_capacity(),
            max_frame_len: default_max_frame_len(),
        }
    }
}

impl HubConfig {
    /// Load from `config/hub.toml` and environment variables.
    ///
    /// Environment variables override the file with prefix `SENSOR_HUB_`,
    /// nested keys separated by `__`.
    /// Example: `SENSOR_HUB_SERIAL__BAUD_RATE=115200`
    pub fn load() -> HubResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path plus environment overrides.
    ///
    /// A missing file is not an error: defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> HubResult<Self> {
        let config: Self = Self::figment(path.as_ref()).extract()?;
        config.validate()?;
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(HubConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> HubResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(HubError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.serial.baud_rate == 0 {
            return Err(HubError::Configuration("baud_rate must be non-zero".into()));
        }

        if !(1..=1000).contains(&self.serial.read_timeout_ms) {
            return Err(HubError::Configuration(format!(
                "Invalid read_timeout_ms {}. Must be 1-1000",
                self.serial.read_timeout_ms
            )));
        }

        if self.serial.event_capacity == 0 {
            return Err(HubError::Configuration(
                "event_capacity must be non-zero".into(),
            ));
        }

        if self.serial.max_frame_len == 0 {
            return Err(HubError::Configuration(
                "max_frame_len must be non-zero".into(),
            ));
        }

        let mut ids = HashSet::new();
        for port in &self.ports {
            if port.id.trim().is_empty() {
                return Err(HubError::Configuration("Empty port id".into()));
            }
            if port.baud_rate == Some(0) {
                return Err(HubError::Configuration(format!(
                    "Port '{}' has a zero baud_rate",
                    port.id
                )));
            }
            if !ids.insert(&port.id) {
                return Err(HubError::Configuration(format!(
                    "Duplicate port id: {}",
                    port.id
                )));
            }
        }

        Ok(())
    }

    /// Ports to register at startup.
    pub fn enabled_ports(&self) -> Vec<&PortDefinition> {
        self.ports.iter().filter(|port| port.enabled).collect()
    }

    /// Effective baud rate for a port definition.
    pub fn baud_rate_for(&self, port: &PortDefinition) -> u32 {
        port.baud_rate.unwrap_or(self.serial.baud_rate)
    }

    /// Runtime settings for the hub.
    pub fn hub_settings(&self) -> HubSettings {
        HubSettings {
            default_baud_rate: self.serial.baud_rate,
            read_timeout: Duration::from_millis(self.serial.read_timeout_ms),
            close_grace: Duration::from_millis(self.serial.close_grace_ms),
            event_capacity: self.serial.event_capacity,
            max_frame_len: self.serial.max_frame_len,
        }
    }
}

/// Runtime settings consumed by [`SerialHub`](crate::hub::SerialHub).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubSettings {
    /// Baud rate used by `register_configured_ports` when a port sets none
    pub default_baud_rate: u32,
    /// Single read timeout for every port
    pub read_timeout: Duration,
    /// Reader join timeout on close
    pub close_grace: Duration,
    /// Event channel capacity
    pub event_capacity: usize,
    /// Longest payload before a terminator
    pub max_frame_len: usize,
}

impl HubSettings {
    /// Session settings for one port at `baud_rate`.
    pub fn session_settings(&self, baud_rate: u32) -> SessionSettings {
        let mut settings = SessionSettings::new(baud_rate);
        settings.line = settings.line.with_read_timeout(self.read_timeout);
        settings.close_grace = self.close_grace;
        settings.max_frame_len = self.max_frame_len;
        settings
    }

    /// Override the read timeout.
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Override the close grace period.
    pub fn with_close_grace(mut self, close_grace: Duration) -> Self {
        self.close_grace = close_grace;
        self
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        HubConfig::default().hub_settings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_config_file() {
        let file = write_config(
            r#"
            [application]
            name = "Test Hub"
            log_level = "debug"

            [serial]
            baud_rate = 115200
            read_timeout_ms = 20

            [[ports]]
            id = "COM16"

            [[ports]]
            id = "COM17"
            baud_rate = 9600
            enabled = false
            "#,
        );

        let config = HubConfig::load_from(file.path()).unwrap();
        assert_eq!(config.application.name, "Test Hub");
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.serial.close_grace_ms, 1000);
        assert_eq!(config.ports.len(), 2);

        let enabled = config.enabled_ports();
        assert_eq!(enabled.len(), 1);
        assert_eq!(config.baud_rate_for(enabled[0]), 115_200);
        assert_eq!(config.baud_rate_for(&config.ports[1]), 9600);

        let settings = config.hub_settings();
        assert_eq!(settings.read_timeout, Duration::from_millis(20));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = HubConfig::load_from("does/not/exist.toml").unwrap();
        assert_eq!(config, HubConfig::default());
        assert_eq!(config.serial.baud_rate, 9600);
        assert!(config.ports.is_empty());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = HubConfig::default();
        config.application.log_level = "loud".into();
        assert!(matches!(
            config.validate(),
            Err(HubError::Configuration(_))
        ));
    }

    #[test]
    fn test_read_timeout_bounds() {
        let mut config = HubConfig::default();
        config.serial.read_timeout_ms = 0;
        assert!(config.validate().is_err());
        config.serial.read_timeout_ms = 5000;
        assert!(config.validate().is_err());
        config.serial.read_timeout_ms = 30;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duplicate_port_ids() {
        let config = HubConfig {
            ports: vec![PortDefinition::new("COM3"), PortDefinition::new("COM3")],
            ..HubConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_port_id() {
        let config = HubConfig {
            ports: vec![PortDefinition::new("  ")],
            ..HubConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_error_is_reported() {
        let file = write_config("[serial]\nbaud_rate = \"fast\"\n");
        assert!(matches!(
            HubConfig::load_from(file.path()),
            Err(HubError::Config(_))
        ));
    }

    #[test]
    fn test_session_settings_follow_hub_settings() {
        let settings = HubSettings::default()
            .with_read_timeout(Duration::from_millis(15))
            .with_close_grace(Duration::from_millis(200));
        let session = settings.session_settings(19_200);
        assert_eq!(session.line.baud_rate, 19_200);
        assert_eq!(session.line.read_timeout, Duration::from_millis(15));
        assert_eq!(session.close_grace, Duration::from_millis(200));
    }
}
