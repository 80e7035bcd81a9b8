//! # Sensor Hub Library
//!
//! This crate connects a host to several microcontroller boards over serial
//! ports. Each board streams `;`-terminated frames carrying pressure readings
//! or free-text messages and accepts short commands that drive vibration
//! actuators. The hub keeps the latest reading per sensor, the mean per port,
//! and fans events out to any number of subscribers.
//!
//! ## Crate Structure
//!
//! - **`protocol`**: Wire format. Frame splitting, payload classification and
//!   command encoding. Pure functions, no I/O.
//! - **`hardware`**: The `Connector`/`SerialConnection` seam, the
//!   `serialport`-backed system implementation and an in-memory mock.
//! - **`session`**: `PortSession`, one serial connection with its background
//!   reader and the Closed/Opening/Open/Closing/Failed lifecycle.
//! - **`hub`**: `SerialHub`, the registry of sessions, per-port aggregation
//!   and command fan-out.
//! - **`events`**: `HubEvent` notifications delivered over a broadcast channel.
//! - **`config`**: Figment-based configuration (TOML plus `SENSOR_HUB_*`
//!   environment overrides).
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`error`**: The `HubError` enum shared by every module.

pub mod config;
pub mod error;
pub mod events;
pub mod hardware;
pub mod hub;
pub mod logging;
pub mod protocol;
pub mod session;

pub use config::{HubConfig, HubSettings, PortDefinition};
pub use error::{HubError, HubResult};
pub use events::{HubEvent, HubEventKind};
pub use hub::{PortId, SerialHub};
pub use protocol::{classify, Command, FrameReader, Payload, SensorIndex};
pub use session::{PortSession, SessionListener, SessionSettings, SessionState};
