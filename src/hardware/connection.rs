//! Serial connection seam.
//!
//! Sessions never touch `serialport` directly: they open connections through a
//! [`Connector`] and talk to a boxed [`SerialConnection`]. The system
//! implementation wraps the serialport crate; tests plug in
//! [`MockConnector`](super::mock::MockConnector).

use crate::error::{HubError, HubResult};
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::debug;

/// Default line speed when a port definition does not set one.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default read timeout. Short enough that a reader notices a stop request
/// within a few tens of milliseconds.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Line parameters for opening a port.
///
/// Framing is fixed at 8 data bits, no parity, 1 stop bit, no flow control;
/// only the speed and the read timeout vary per port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSettings {
    /// Baud rate, e.g. 9600 or 115200.
    pub baud_rate: u32,
    /// Timeout for a single blocking read.
    pub read_timeout: Duration,
}

impl LineSettings {
    /// Line settings at `baud_rate` with the default read timeout.
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Override the read timeout.
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }
}

impl Default for LineSettings {
    fn default() -> Self {
        Self::new(DEFAULT_BAUD_RATE)
    }
}

/// An open, bidirectional serial connection.
///
/// Reads return `ErrorKind::TimedOut` (or `Ok(0)`) when nothing arrived within
/// the read timeout; callers treat both as "try again".
pub trait SerialConnection: Read + Write + Send {
    /// A second handle to the same device, so one thread can read while
    /// another writes.
    fn try_clone_connection(&self) -> io::Result<Box<dyn SerialConnection>>;
}

/// Opens serial connections by port identifier.
pub trait Connector: Send + Sync {
    /// Open `port` with the given line settings.
    fn open(&self, port: &str, settings: &LineSettings) -> HubResult<Box<dyn SerialConnection>>;
}

/// Connector for the operating system's serial devices.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemConnector;

impl SystemConnector {
    /// Create a system connector.
    pub fn new() -> Self {
        Self
    }
}

impl Connector for SystemConnector {
    #[cfg(feature = "instrument_serial")]
    fn open(&self, port: &str, settings: &LineSettings) -> HubResult<Box<dyn SerialConnection>> {
        use serialport::{DataBits, FlowControl, Parity, StopBits};

        let handle = serialport::new(port, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(settings.read_timeout)
            .open()
            .map_err(|e| HubError::PortOpen {
                port: port.to_string(),
                reason: e.to_string(),
            })?;

        debug!(
            port,
            baud_rate = settings.baud_rate,
            "Serial port opened (8-N-1)"
        );
        Ok(Box::new(SystemPort(handle)))
    }

    #[cfg(not(feature = "instrument_serial"))]
    fn open(&self, port: &str, settings: &LineSettings) -> HubResult<Box<dyn SerialConnection>> {
        debug!(port, baud_rate = settings.baud_rate, "Serial support disabled");
        Err(HubError::PortOpen {
            port: port.to_string(),
            reason: "serial support not enabled. Rebuild with --features instrument_serial"
                .to_string(),
        })
    }
}

#[cfg(feature = "instrument_serial")]
struct SystemPort(Box<dyn serialport::SerialPort>);

#[cfg(feature = "instrument_serial")]
impl Read for SystemPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

#[cfg(feature = "instrument_serial")]
impl Write for SystemPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

#[cfg(feature = "instrument_serial")]
impl SerialConnection for SystemPort {
    fn try_clone_connection(&self) -> io::Result<Box<dyn SerialConnection>> {
        let handle = self.0.try_clone().map_err(io::Error::from)?;
        Ok(Box::new(SystemPort(handle)))
    }
}

/// A serial device visible to the operating system.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PortInfo {
    /// Device path or name, usable as a port identifier.
    pub name: String,
    /// Human-readable transport description (USB, PCI, Bluetooth, ...).
    pub kind: String,
}

/// Enumerate serial devices present on this machine.
#[cfg(feature = "instrument_serial")]
pub fn list_available_ports() -> HubResult<Vec<PortInfo>> {
    use serialport::SerialPortType;

    let ports = serialport::available_ports().map_err(io::Error::from)?;
    Ok(ports
        .into_iter()
        .map(|p| {
            let kind = match p.port_type {
                SerialPortType::UsbPort(usb) => match usb.product {
                    Some(product) => format!("USB {:04x}:{:04x} {}", usb.vid, usb.pid, product),
                    None => format!("USB {:04x}:{:04x}", usb.vid, usb.pid),
                },
                SerialPortType::PciPort => "PCI".to_string(),
                SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                SerialPortType::Unknown => "Unknown".to_string(),
            };
            PortInfo {
                name: p.port_name,
                kind,
            }
        })
        .collect())
}

/// Enumerate serial devices present on this machine.
#[cfg(not(feature = "instrument_serial"))]
pub fn list_available_ports() -> HubResult<Vec<PortInfo>> {
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_settings_defaults() {
        let settings = LineSettings::default();
        assert_eq!(settings.baud_rate, 9600);
        assert_eq!(settings.read_timeout, Duration::from_millis(50));
    }

    #[test]
    fn line_settings_builder() {
        let settings = LineSettings::new(115_200).with_read_timeout(Duration::from_millis(20));
        assert_eq!(settings.baud_rate, 115_200);
        assert_eq!(settings.read_timeout, Duration::from_millis(20));
    }

    #[test]
    fn opening_missing_device_reports_port_open() {
        let err = SystemConnector::new()
            .open("/dev/sensor-hub-does-not-exist", &LineSettings::default())
            .err();
        match err {
            Some(HubError::PortOpen { port, .. }) => {
                assert_eq!(port, "/dev/sensor-hub-does-not-exist")
            }
            other => panic!("expected PortOpen, got {other:?}"),
        }
    }
}
