//! Port sessions.
//!
//! A [`PortSession`] owns one serial connection: it opens the device, runs a
//! single background reader, writes commands and closes everything down. The
//! reader splits bytes into frames, classifies them and reports results to a
//! [`SessionListener`]; nothing else reads from the device.
//!
//! ```text
//!   Closed ──open()──▶ Opening ──ok──▶ Open ──close()──▶ Closing ──▶ Closed
//!                         │
//!                         └──device error──▶ Failed
//! ```
//!
//! The reader runs on `tokio::task::spawn_blocking` and polls a cancel flag
//! between timeout-bounded reads. Writes use a separate cloned handle, so a
//! command never waits on an in-flight read.

use crate::error::{HubError, HubResult};
use crate::hardware::{Connector, LineSettings, SerialConnection};
use crate::protocol::{classify, terminate, Command, FrameReader, Payload, SensorIndex};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Default time `close()` waits for the reader to exit.
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_millis(1000);

const READ_CHUNK: usize = 256;

/// Back-off after a zero-length read so an EOF-style device cannot spin the reader.
const IDLE_BACKOFF: Duration = Duration::from_millis(5);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Lifecycle state of a [`PortSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Not connected.
    Closed,
    /// Device open in progress.
    Opening,
    /// Connected and reading.
    Open,
    /// Shutdown in progress.
    Closing,
    /// The device could not be opened. Not retried automatically.
    Failed,
}

/// Receives decoded traffic from a session's reader.
///
/// Called on the reader thread, in frame order. Implementations must not
/// write to the same session from inside a callback.
pub trait SessionListener: Send + Sync {
    /// A frame classified as free text.
    fn on_message(&self, port: &str, text: &str);

    /// A sensor frame; `update` holds only the indices present in that frame.
    fn on_sensor_update(&self, port: &str, update: &BTreeMap<SensorIndex, f64>);

    /// The reader hit a non-timeout error and has stopped.
    /// `error` is always [`HubError::ReadFailure`].
    fn on_read_failure(&self, port: &str, error: &HubError);
}

/// Per-session tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Line speed and read timeout.
    pub line: LineSettings,
    /// How long `close()` waits for the reader before abandoning it.
    pub close_grace: Duration,
    /// Longest payload accepted before a terminator.
    pub max_frame_len: usize,
}

impl SessionSettings {
    /// Settings for `baud_rate` with default timeouts.
    pub fn new(baud_rate: u32) -> Self {
        Self {
            line: LineSettings::new(baud_rate),
            close_grace: DEFAULT_CLOSE_GRACE,
            max_frame_len: crate::protocol::framing::DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// Owner of one serial connection and its reader task.
pub struct PortSession {
    port: String,
    settings: SessionSettings,
    connector: Arc<dyn Connector>,
    listener: Arc<dyn SessionListener>,
    state: Arc<Mutex<SessionState>>,
    writer: Mutex<Option<Box<dyn SerialConnection>>>,
    reader: Mutex<Option<ReaderHandle>>,
    readings: Arc<Mutex<BTreeMap<SensorIndex, f64>>>,
}

/// Control side of one reader task. Every `open()` gets fresh flags, so a
/// reader abandoned by `close()` never sees a later session's state.
struct ReaderHandle {
    cancel_flag: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl PortSession {
    /// Create a closed session for `port`.
    pub fn new(
        port: impl Into<String>,
        settings: SessionSettings,
        connector: Arc<dyn Connector>,
        listener: Arc<dyn SessionListener>,
    ) -> Self {
        Self {
            port: port.into(),
            settings,
            connector,
            listener,
            state: Arc::new(Mutex::new(SessionState::Closed)),
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            readings: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Port identifier.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Settings the session opens with.
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    /// Whether the reader task is still running.
    pub fn is_reading(&self) -> bool {
        lock(&self.reader)
            .as_ref()
            .is_some_and(|reader| reader.alive.load(Ordering::SeqCst))
    }

    /// Open and reading.
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Open && self.is_reading()
    }

    /// Open the device and start the reader.
    ///
    /// Opening an open session is a no-op. On failure the session is left
    /// `Failed` and the error is returned; nothing is retried.
    pub async fn open(&self) -> HubResult<()> {
        {
            let mut state = lock(&self.state);
            match *state {
                SessionState::Closed | SessionState::Failed => *state = SessionState::Opening,
                SessionState::Open => return Ok(()),
                SessionState::Opening | SessionState::Closing => {
                    return Err(HubError::PortNotOpen(self.port.clone()))
                }
            }
        }

        let (reader, writer) = match self.connect() {
            Ok(pair) => pair,
            Err(e) => {
                *lock(&self.state) = SessionState::Failed;
                error!(port = %self.port, error = %e, "Failed to open port");
                return Err(e);
            }
        };

        *lock(&self.writer) = Some(writer);
        let cancel_flag = Arc::new(AtomicBool::new(false));
        let alive = Arc::new(AtomicBool::new(true));

        let context = ReaderContext {
            port: self.port.clone(),
            connection: reader,
            max_frame_len: self.settings.max_frame_len,
            listener: self.listener.clone(),
            state: self.state.clone(),
            cancel_flag: cancel_flag.clone(),
            reader_alive: alive.clone(),
            readings: self.readings.clone(),
        };
        *lock(&self.state) = SessionState::Open;
        let task = tokio::task::spawn_blocking(move || run_reader(context));
        *lock(&self.reader) = Some(ReaderHandle {
            cancel_flag,
            alive,
            task,
        });

        info!(
            port = %self.port,
            baud_rate = self.settings.line.baud_rate,
            "Opened port"
        );
        Ok(())
    }

    fn connect(&self) -> HubResult<(Box<dyn SerialConnection>, Box<dyn SerialConnection>)> {
        let writer = self.connector.open(&self.port, &self.settings.line)?;
        let reader = writer
            .try_clone_connection()
            .map_err(|e| HubError::PortOpen {
                port: self.port.clone(),
                reason: format!("cannot clone handle for reader: {e}"),
            })?;
        Ok((reader, writer))
    }

    /// Write one command, appending the terminator if absent.
    ///
    /// A failed write is logged and returned but leaves the port open.
    pub fn write(&self, command: &str) -> HubResult<()> {
        let framed = terminate(command);
        let mut guard = lock(&self.writer);

        let Some(connection) = guard.as_mut() else {
            warn!(port = %self.port, command = %framed, "Cannot send command: port is not open");
            return Err(HubError::PortNotOpen(self.port.clone()));
        };

        let result = connection
            .write_all(framed.as_bytes())
            .and_then(|()| connection.flush());

        match result {
            Ok(()) => {
                debug!(port = %self.port, command = %framed, "Sent command");
                Ok(())
            }
            Err(source) => {
                warn!(port = %self.port, command = %framed, error = %source, "Write failed");
                Err(HubError::Write {
                    port: self.port.clone(),
                    source,
                })
            }
        }
    }

    /// Write a typed command.
    pub fn send(&self, command: &Command) -> HubResult<()> {
        self.write(&command.encode())
    }

    /// Stop the board, stop the reader and release the device.
    ///
    /// Sends the stop command once, waits up to the close grace period for the
    /// reader and abandons it if it does not exit in time. Closing a session
    /// that is not open is a no-op.
    pub async fn close(&self) {
        {
            let mut state = lock(&self.state);
            if *state != SessionState::Open {
                return;
            }
            *state = SessionState::Closing;
        }

        let _ = self.send(&Command::Stop);

        let reader = lock(&self.reader).take();
        if let Some(reader) = reader {
            reader.cancel_flag.store(true, Ordering::SeqCst);
            match tokio::time::timeout(self.settings.close_grace, reader.task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(port = %self.port, error = %e, "Reader task panicked"),
                Err(_) => warn!(
                    port = %self.port,
                    grace_ms = self.settings.close_grace.as_millis() as u64,
                    "Reader did not stop in time; abandoning it"
                ),
            }
        }

        lock(&self.writer).take();
        *lock(&self.state) = SessionState::Closed;
        info!(port = %self.port, "Closed port");
    }

    /// Copy of this session's running sensor map.
    pub fn sensor_snapshot(&self) -> BTreeMap<SensorIndex, f64> {
        lock(&self.readings).clone()
    }

    /// Last value for `index`, or 0 when never seen.
    pub fn sensor_value(&self, index: SensorIndex) -> f64 {
        lock(&self.readings).get(&index).copied().unwrap_or(0.0)
    }

    /// Number of sensor indices observed so far.
    pub fn sensor_count(&self) -> usize {
        lock(&self.readings).len()
    }

    /// Observed sensor indices in ascending order.
    pub fn sensor_indices(&self) -> Vec<SensorIndex> {
        lock(&self.readings).keys().copied().collect()
    }
}

impl Drop for PortSession {
    fn drop(&mut self) {
        // Reader exits at its next timeout boundary.
        let reader = self.reader.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(reader) = reader {
            reader.cancel_flag.store(true, Ordering::SeqCst);
        }
    }
}

impl std::fmt::Debug for PortSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortSession")
            .field("port", &self.port)
            .field("state", &self.state())
            .field("reading", &self.is_reading())
            .finish()
    }
}

struct ReaderContext {
    port: String,
    connection: Box<dyn SerialConnection>,
    max_frame_len: usize,
    listener: Arc<dyn SessionListener>,
    state: Arc<Mutex<SessionState>>,
    cancel_flag: Arc<AtomicBool>,
    reader_alive: Arc<AtomicBool>,
    readings: Arc<Mutex<BTreeMap<SensorIndex, f64>>>,
}

/// Clears the alive flag however the reader exits, including by panic.
struct AliveGuard(Arc<AtomicBool>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn run_reader(mut ctx: ReaderContext) {
    let _alive = AliveGuard(ctx.reader_alive.clone());
    let mut frames = FrameReader::with_max_frame_len(ctx.max_frame_len);
    let mut buf = [0u8; READ_CHUNK];

    debug!(port = %ctx.port, "Reader started");

    while !ctx.cancel_flag.load(Ordering::SeqCst) {
        match ctx.connection.read(&mut buf) {
            Ok(0) => std::thread::sleep(IDLE_BACKOFF),
            // Bytes picked up after an abandoning close belong to no session.
            Ok(_) if ctx.cancel_flag.load(Ordering::SeqCst) => break,
            Ok(n) => {
                trace!(port = %ctx.port, bytes = n, "Read");
                for frame in frames.push(&buf[..n]) {
                    dispatch(&ctx, &frame);
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) => {}
            Err(e) => {
                let still_open = *lock(&ctx.state) == SessionState::Open;
                if still_open && !ctx.cancel_flag.load(Ordering::SeqCst) {
                    warn!(port = %ctx.port, error = %e, "Read failed; reader stopping");
                    let failure = HubError::ReadFailure {
                        port: ctx.port.clone(),
                        source: e,
                    };
                    ctx.listener.on_read_failure(&ctx.port, &failure);
                }
                break;
            }
        }
    }

    debug!(port = %ctx.port, "Reader stopped");
}

fn dispatch(ctx: &ReaderContext, frame: &str) {
    match classify(frame) {
        Payload::Sensors(sensors) => {
            if !sensors.skipped.is_empty() {
                debug!(
                    port = %ctx.port,
                    frame,
                    skipped = ?sensors.skipped,
                    "Skipped unparseable sensor fields"
                );
            }
            {
                let mut readings = lock(&ctx.readings);
                readings.extend(sensors.values.iter().map(|(i, v)| (*i, *v)));
            }
            debug!(port = %ctx.port, values = ?sensors.values, auto = sensors.auto, "Sensor frame");
            ctx.listener.on_sensor_update(&ctx.port, &sensors.values);
        }
        Payload::Text(text) => {
            debug!(port = %ctx.port, message = %text, "Message");
            ctx.listener.on_message(&ctx.port, &text);
        }
        Payload::Ignored { raw } => {
            warn!(port = %ctx.port, frame = %raw, "Sensor report had no valid fields");
        }
    }
}
