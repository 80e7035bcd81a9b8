//! Mock serial hardware.
//!
//! Provides an in-memory serial device for testing the hub without boards
//! attached. A [`MockDevice`] is the "far end" of the wire: tests push bytes
//! the board would send with [`MockDevice::feed`] and inspect what the hub
//! wrote with [`MockDevice::written_string`]. Failures can be injected at
//! open, read and write time.
//!
//! # Example
//!
//! ```rust,ignore
//! let connector = Arc::new(MockConnector::new());
//! let device = connector.device("/dev/ttyUSB0");
//! let hub = SerialHub::new(connector.clone(), HubSettings::default());
//!
//! hub.register_port("/dev/ttyUSB0", 9600).await?;
//! device.feed("10,20;");
//! ```

use super::connection::{Connector, LineSettings, SerialConnection};
use crate::error::{HubError, HubResult};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct DeviceState {
    inbound: Mutex<VecDeque<u8>>,
    data_ready: Condvar,
    written: Mutex<Vec<u8>>,
    pending_read_error: Mutex<Option<io::ErrorKind>>,
    fail_writes: AtomicBool,
    open_count: AtomicUsize,
    last_settings: Mutex<Option<LineSettings>>,
}

/// Simulated board on the far end of one serial port.
///
/// Cloning yields another handle to the same device.
#[derive(Clone, Default)]
pub struct MockDevice {
    state: Arc<DeviceState>,
}

impl MockDevice {
    /// Create a device with no pending data.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes for the hub to read, as if the board had sent them.
    pub fn feed(&self, bytes: impl AsRef<[u8]>) {
        lock(&self.state.inbound).extend(bytes.as_ref());
        self.state.data_ready.notify_all();
    }

    /// Everything the hub has written so far.
    pub fn written(&self) -> Vec<u8> {
        lock(&self.state.written).clone()
    }

    /// Written bytes decoded as text.
    pub fn written_string(&self) -> String {
        String::from_utf8_lossy(&self.written()).into_owned()
    }

    /// Forget previously written bytes.
    pub fn clear_written(&self) {
        lock(&self.state.written).clear();
    }

    /// Make the next read fail with `kind` (after any queued bytes are gone).
    pub fn fail_next_read(&self, kind: io::ErrorKind) {
        *lock(&self.state.pending_read_error) = Some(kind);
        self.state.data_ready.notify_all();
    }

    /// Make every write fail until switched back off.
    pub fn set_fail_writes(&self, fail: bool) {
        self.state.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// How many times the device has been opened.
    pub fn open_count(&self) -> usize {
        self.state.open_count.load(Ordering::SeqCst)
    }

    /// Line settings used by the most recent open.
    pub fn last_settings(&self) -> Option<LineSettings> {
        *lock(&self.state.last_settings)
    }

    fn connect(&self, settings: &LineSettings) -> MockConnection {
        self.state.open_count.fetch_add(1, Ordering::SeqCst);
        *lock(&self.state.last_settings) = Some(*settings);
        MockConnection {
            state: self.state.clone(),
            read_timeout: settings.read_timeout,
        }
    }
}

/// Connection handle returned by [`MockConnector::open`].
pub struct MockConnection {
    state: Arc<DeviceState>,
    read_timeout: Duration,
}

impl Read for MockConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let deadline = Instant::now() + self.read_timeout;
        let mut inbound = lock(&self.state.inbound);

        loop {
            if !inbound.is_empty() {
                let n = buf.len().min(inbound.len());
                for (slot, byte) in buf.iter_mut().zip(inbound.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }

            if let Some(kind) = lock(&self.state.pending_read_error).take() {
                return Err(io::Error::new(kind, "injected read failure"));
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "Operation timed out"));
            }

            inbound = self
                .state
                .data_ready
                .wait_timeout(inbound, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl Write for MockConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.state.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "injected write failure",
            ));
        }
        lock(&self.state.written).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SerialConnection for MockConnection {
    fn try_clone_connection(&self) -> io::Result<Box<dyn SerialConnection>> {
        Ok(Box::new(MockConnection {
            state: self.state.clone(),
            read_timeout: self.read_timeout,
        }))
    }
}

/// Connector serving [`MockDevice`]s by port identifier.
///
/// Devices are created on first use, so any identifier opens successfully
/// unless it has been marked unavailable.
#[derive(Default)]
pub struct MockConnector {
    devices: Mutex<HashMap<String, MockDevice>>,
    unavailable: Mutex<HashSet<String>>,
}

impl MockConnector {
    /// Create a connector with no devices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Device behind `port`, created if needed.
    pub fn device(&self, port: &str) -> MockDevice {
        lock(&self.devices)
            .entry(port.to_string())
            .or_default()
            .clone()
    }

    /// Make opening `port` fail (device missing or busy) until cleared.
    pub fn set_unavailable(&self, port: &str, unavailable: bool) {
        let mut set = lock(&self.unavailable);
        if unavailable {
            set.insert(port.to_string());
        } else {
            set.remove(port);
        }
    }
}

impl Connector for MockConnector {
    fn open(&self, port: &str, settings: &LineSettings) -> HubResult<Box<dyn SerialConnection>> {
        if lock(&self.unavailable).contains(port) {
            return Err(HubError::PortOpen {
                port: port.to_string(),
                reason: "Device or resource busy".to_string(),
            });
        }
        Ok(Box::new(self.device(port).connect(settings)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(connector: &MockConnector, port: &str) -> Box<dyn SerialConnection> {
        let settings = LineSettings::default().with_read_timeout(Duration::from_millis(10));
        connector.open(port, &settings).unwrap()
    }

    #[test]
    fn read_returns_fed_bytes() {
        let connector = MockConnector::new();
        let mut conn = open(&connector, "COM3");
        connector.device("COM3").feed("1.0;");

        let mut buf = [0u8; 16];
        let n = conn.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"1.0;");
    }

    #[test]
    fn read_times_out_when_idle() {
        let connector = MockConnector::new();
        let mut conn = open(&connector, "COM3");
        let mut buf = [0u8; 4];
        let err = conn.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn injected_read_error_fires_once() {
        let connector = MockConnector::new();
        let mut conn = open(&connector, "COM3");
        connector.device("COM3").fail_next_read(io::ErrorKind::BrokenPipe);

        let mut buf = [0u8; 4];
        assert_eq!(conn.read(&mut buf).unwrap_err().kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(conn.read(&mut buf).unwrap_err().kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn clones_share_the_device() {
        let connector = MockConnector::new();
        let conn = open(&connector, "COM4");
        let mut writer = conn.try_clone_connection().unwrap();
        writer.write_all(b"S;").unwrap();
        assert_eq!(connector.device("COM4").written_string(), "S;");
    }

    #[test]
    fn write_failures_can_be_injected() {
        let connector = MockConnector::new();
        let mut conn = open(&connector, "COM4");
        connector.device("COM4").set_fail_writes(true);
        assert!(conn.write_all(b"S;").is_err());
        connector.device("COM4").set_fail_writes(false);
        conn.write_all(b"S;").unwrap();
        assert_eq!(connector.device("COM4").written(), b"S;");
    }

    #[test]
    fn unavailable_port_fails_to_open() {
        let connector = MockConnector::new();
        connector.set_unavailable("COM9", true);
        let settings = LineSettings::default();
        assert!(matches!(
            connector.open("COM9", &settings),
            Err(HubError::PortOpen { .. })
        ));
        connector.set_unavailable("COM9", false);
        assert!(connector.open("COM9", &settings).is_ok());
        assert_eq!(connector.device("COM9").open_count(), 1);
        assert_eq!(connector.device("COM9").last_settings(), Some(settings));
    }
}
