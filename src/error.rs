//! Custom error types for the hub.
//!
//! This module defines the primary error type, `HubError`, for the whole crate.
//! Using the `thiserror` crate, it provides a consistent way to describe the
//! failures a serial hub can run into, from device availability to config
//! parsing.
//!
//! ## Error Hierarchy
//!
//! - **`PortOpen`**: The device could not be opened (missing, in use, bad
//!   permissions). Reported once per attempt; the session is left `Failed`.
//! - **`Write`**: A command write failed. Transient; the port stays open.
//! - **`ReadFailure`**: A non-timeout read error. Ends that port's reader task.
//! - **`PortNotOpen`** / **`UnknownPort`**: An operation addressed a port that
//!   cannot take it. Hub operations degrade these to a diagnostic.
//! - **`Config`** / **`Configuration`**: Parse errors from `figment` and semantic
//!   validation errors in an otherwise well-formed configuration.
//! - **`Io`**: Wraps standard `std::io::Error` for everything else.
//!
//! Per-field decode failures inside a sensor frame are not errors at all: the
//! classifier records them as skipped indices and carries on.

use thiserror::Error;

/// Convenience alias for results using the hub error type.
pub type HubResult<T> = std::result::Result<T, HubError>;

#[derive(Error, Debug)]
pub enum HubError {
    #[error("Failed to open serial port '{port}': {reason}")]
    PortOpen { port: String, reason: String },

    #[error("Write to '{port}' failed: {source}")]
    Write {
        port: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Read from '{port}' failed: {source}")]
    ReadFailure {
        port: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serial port '{0}' is not open")]
    PortNotOpen(String),

    #[error("Port '{0}' is not registered")]
    UnknownPort(String),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for HubError {
    fn from(value: figment::Error) -> Self {
        HubError::Config(Box::new(value))
    }
}

impl HubError {
    /// Port the error is about, when there is one.
    pub fn port(&self) -> Option<&str> {
        match self {
            HubError::PortOpen { port, .. }
            | HubError::Write { port, .. }
            | HubError::ReadFailure { port, .. } => Some(port),
            HubError::PortNotOpen(port) | HubError::UnknownPort(port) => Some(port),
            HubError::Config(_) | HubError::Configuration(_) | HubError::Io(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_open_message_names_device() {
        let err = HubError::PortOpen {
            port: "/dev/ttyUSB0".into(),
            reason: "No such file or directory".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/dev/ttyUSB0"));
        assert!(msg.contains("No such file"));
        assert_eq!(err.port(), Some("/dev/ttyUSB0"));
    }

    #[test]
    fn write_error_keeps_io_source() {
        let err = HubError::Write {
            port: "COM3".into(),
            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged"),
        };
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("unplugged"));
    }

    #[test]
    fn configuration_errors_have_no_port() {
        let err = HubError::Configuration("duplicate port id".into());
        assert_eq!(err.port(), None);
    }
}
