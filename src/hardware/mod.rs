//! Hardware Connections
//!
//! Low-level serial communication: the connection/connector seam, the
//! serialport-backed system implementation and an in-memory mock.

pub mod connection;
pub mod mock;

pub use connection::{
    list_available_ports, Connector, LineSettings, PortInfo, SerialConnection, SystemConnector,
    DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT,
};
pub use mock::{MockConnector, MockDevice};
