//! Outbound command encoding.

use super::TERMINATOR;
use std::borrow::Cow;
use std::fmt;

/// Commands understood by the actuator boards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Stop all actuators on the board (`S;`).
    Stop,
    /// Drive one vibration channel (`V<channel><intensity:03>;`).
    Vibrate {
        /// Actuator channel on the board.
        channel: u8,
        /// Drive level, zero-padded to three digits on the wire.
        intensity: u8,
    },
    /// Run a preset pattern stored on the board (`P<n>;`).
    Preset(u32),
    /// Caller-supplied command text, sent as-is plus terminator.
    Raw(String),
}

impl Command {
    /// Wire encoding, always ending in exactly one terminator.
    pub fn encode(&self) -> String {
        match self {
            Command::Stop => format!("S{TERMINATOR}"),
            Command::Vibrate { channel, intensity } => {
                format!("V{channel}{intensity:03}{TERMINATOR}")
            }
            Command::Preset(number) => format!("P{number}{TERMINATOR}"),
            Command::Raw(text) => terminate(text).into_owned(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl From<&str> for Command {
    fn from(value: &str) -> Self {
        Command::Raw(value.to_string())
    }
}

impl From<String> for Command {
    fn from(value: String) -> Self {
        Command::Raw(value)
    }
}

/// Append the terminator unless the command already ends with one.
pub fn terminate(command: &str) -> Cow<'_, str> {
    if command.ends_with(TERMINATOR) {
        Cow::Borrowed(command)
    } else {
        Cow::Owned(format!("{command}{TERMINATOR}"))
    }
}
