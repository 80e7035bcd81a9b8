//! Serial hub: the set of port sessions and their aggregated readings.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────── SerialHub ─────────────────────────────┐
//! │  sessions: port id ──▶ PortSession ──▶ reader task (one per port)  │
//! │                              │                                     │
//! │                    SessionListener (per port)                      │
//! │                              ▼                                     │
//! │  readings: port id ──▶ Mutex<PortReadings { sensors, average }>    │
//! │                              │                                     │
//! │                    broadcast::Sender<HubEvent> ──▶ subscribers     │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Sensing flows reader → listener → readings → events. Control flows caller
//! → session → device write. Each port's readings sit behind their own mutex,
//! so a merge and its average recomputation are atomic with respect to
//! readers of that port, and ports never contend with each other. The table
//! lock is only taken for writing when a port is added or removed.
//!
//! # Example
//!
//! ```rust,no_run
//! use sensor_hub::{SerialHub, HubSettings};
//!
//! # async fn example() {
//! let hub = SerialHub::with_system_ports(HubSettings::default());
//! let mut events = hub.subscribe();
//!
//! let _ = hub.register_port("/dev/ttyUSB0", 9600).await;
//! let _ = hub.set_vibration_port("/dev/ttyUSB0", 1, 128);
//!
//! while let Ok(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! let pressure = hub.get_average_pressure("/dev/ttyUSB0");
//! # let _ = pressure;
//! hub.shutdown().await;
//! # }
//! ```

use crate::config::{HubConfig, HubSettings, PortDefinition};
use crate::error::{HubError, HubResult};
use crate::events::{HubEvent, HubEventKind};
use crate::hardware::{Connector, SystemConnector};
use crate::protocol::{Command, SensorIndex};
use crate::session::{PortSession, SessionListener, SessionState};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Port identifier (device path or name).
pub type PortId = String;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Mean of the known values, 0 when there are none.
pub fn average(sensors: &BTreeMap<SensorIndex, f64>) -> f64 {
    if sensors.is_empty() {
        0.0
    } else {
        sensors.values().sum::<f64>() / sensors.len() as f64
    }
}

/// Retained state for one port.
#[derive(Debug)]
struct PortReadings {
    /// Registration the state belongs to; updates from older sessions are dropped.
    generation: u64,
    sensors: BTreeMap<SensorIndex, f64>,
    average: f64,
}

impl PortReadings {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            sensors: BTreeMap::new(),
            average: 0.0,
        }
    }
}

/// State shared with every session's listener.
struct Shared {
    readings: RwLock<HashMap<PortId, Mutex<PortReadings>>>,
    events: broadcast::Sender<HubEvent>,
}

impl Shared {
    fn publish(&self, port: &str, kind: HubEventKind) {
        // No subscribers is fine.
        let _ = self.events.send(HubEvent::new(port, kind));
    }

    fn merge(&self, port: &str, generation: u64, update: &BTreeMap<SensorIndex, f64>) {
        let (sensors, average) = {
            let table = read(&self.readings);
            let Some(entry) = table.get(port) else {
                debug!(port, "Dropping sensor update for unregistered port");
                return;
            };
            let mut readings = lock(entry);
            if readings.generation != generation {
                debug!(port, "Dropping sensor update from a stale session");
                return;
            }
            readings
                .sensors
                .extend(update.iter().map(|(index, value)| (*index, *value)));
            readings.average = average(&readings.sensors);
            (readings.sensors.clone(), readings.average)
        };

        for (index, value) in update {
            self.publish(
                port,
                HubEventKind::SensorUpdated {
                    index: *index,
                    value: *value,
                },
            );
        }
        debug!(port, average, sensors = sensors.len(), "Average pressure updated");
        self.publish(port, HubEventKind::PressureUpdated { sensors, average });
    }

    fn is_current(&self, port: &str, generation: u64) -> bool {
        read(&self.readings)
            .get(port)
            .is_some_and(|entry| lock(entry).generation == generation)
    }
}

/// Routes one session's notifications into the hub.
struct PortListener {
    generation: u64,
    shared: Arc<Shared>,
}

impl SessionListener for PortListener {
    fn on_message(&self, port: &str, text: &str) {
        if self.shared.is_current(port, self.generation) {
            self.shared.publish(
                port,
                HubEventKind::Message {
                    text: text.to_string(),
                },
            );
        }
    }

    fn on_sensor_update(&self, port: &str, update: &BTreeMap<SensorIndex, f64>) {
        self.shared.merge(port, self.generation, update);
    }

    fn on_read_failure(&self, port: &str, error: &HubError) {
        if self.shared.is_current(port, self.generation) {
            self.shared.publish(
                port,
                HubEventKind::ReadFailed {
                    reason: error.to_string(),
                },
            );
        }
    }
}

/// Multi-port serial hub.
///
/// Read accessors and command sends are synchronous and never block on I/O
/// other than the device write itself. Lifecycle operations are async because
/// closing a port waits (boundedly) for its reader.
pub struct SerialHub {
    connector: Arc<dyn Connector>,
    settings: HubSettings,
    sessions: Mutex<HashMap<PortId, Arc<PortSession>>>,
    shared: Arc<Shared>,
    next_generation: AtomicU64,
    /// Serialises register/unregister/reopen so a port id never has two live sessions.
    lifecycle: tokio::sync::Mutex<()>,
}

impl SerialHub {
    /// Create a hub that opens ports through `connector`.
    pub fn new(connector: Arc<dyn Connector>, settings: HubSettings) -> Self {
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        Self {
            connector,
            settings,
            sessions: Mutex::new(HashMap::new()),
            shared: Arc::new(Shared {
                readings: RwLock::new(HashMap::new()),
                events,
            }),
            next_generation: AtomicU64::new(1),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Create a hub backed by the operating system's serial ports.
    pub fn with_system_ports(settings: HubSettings) -> Self {
        Self::new(Arc::new(SystemConnector::new()), settings)
    }

    /// Runtime settings.
    pub fn settings(&self) -> &HubSettings {
        &self.settings
    }

    /// Subscribe to hub events. Each receiver sees every event.
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.shared.events.subscribe()
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Create and open a session for `id`.
    ///
    /// Registering an id that already has a session is a no-op with a
    /// warning. If the device cannot be opened the session stays registered
    /// in the `Failed` state (zero readings, commands ignored) and the error
    /// is returned; use [`reopen_port`](Self::reopen_port) to retry.
    pub async fn register_port(&self, id: &str, baud_rate: u32) -> HubResult<()> {
        if id.trim().is_empty() {
            warn!("Ignoring registration with empty port id");
            return Err(HubError::Configuration("Empty port id".into()));
        }

        let _guard = self.lifecycle.lock().await;

        if lock(&self.sessions).contains_key(id) {
            warn!(port = id, "Port is already registered");
            return Ok(());
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        write(&self.shared.readings).insert(id.to_string(), Mutex::new(PortReadings::new(generation)));

        let session = Arc::new(self.new_session(id, baud_rate, generation));
        lock(&self.sessions).insert(id.to_string(), session.clone());

        self.open_session(&session).await
    }

    /// Register every enabled port in `ports`; returns the ones that failed.
    pub async fn register_ports(&self, ports: &[PortDefinition]) -> Vec<HubError> {
        let mut failures = Vec::new();
        for port in ports.iter().filter(|port| port.enabled) {
            let baud_rate = port.baud_rate.unwrap_or(self.settings.default_baud_rate);
            if let Err(e) = self.register_port(&port.id, baud_rate).await {
                failures.push(e);
            }
        }
        failures
    }

    /// Register every enabled port from configuration.
    pub async fn register_configured_ports(&self, config: &HubConfig) -> Vec<HubError> {
        let ports: Vec<PortDefinition> = config
            .enabled_ports()
            .into_iter()
            .map(|port| PortDefinition {
                baud_rate: Some(config.baud_rate_for(port)),
                ..port.clone()
            })
            .collect();
        self.register_ports(&ports).await
    }

    /// Stop, close and forget the session for `id`, dropping its readings.
    ///
    /// Returns `false` (with a warning) if the port was not registered.
    pub async fn unregister_port(&self, id: &str) -> bool {
        let _guard = self.lifecycle.lock().await;

        let session = lock(&self.sessions).remove(id);
        write(&self.shared.readings).remove(id);

        let Some(session) = session else {
            warn!(port = id, "Cannot unregister unknown port");
            return false;
        };

        session.close().await;
        self.shared.publish(id, HubEventKind::PortClosed);
        info!(port = id, "Removed port");
        true
    }

    /// Close and reopen the session for `id`, keeping its retained readings.
    ///
    /// This is the caller-driven recovery path for a `Failed` port or one
    /// whose reader stopped after a read failure.
    pub async fn reopen_port(&self, id: &str) -> HubResult<()> {
        let _guard = self.lifecycle.lock().await;

        let Some(old) = lock(&self.sessions).get(id).cloned() else {
            warn!(port = id, "Cannot reopen unknown port");
            return Err(HubError::UnknownPort(id.to_string()));
        };

        old.close().await;

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        if let Some(entry) = read(&self.shared.readings).get(id) {
            lock(entry).generation = generation;
        }

        let session = Arc::new(self.new_session(id, old.settings().line.baud_rate, generation));
        lock(&self.sessions).insert(id.to_string(), session.clone());
        drop(old);

        self.open_session(&session).await
    }

    /// Replace the registered set with `ports`; returns registration failures.
    pub async fn update_ports(&self, ports: &[PortDefinition]) -> Vec<HubError> {
        for id in self.ports() {
            self.unregister_port(&id).await;
        }
        self.register_ports(ports).await
    }

    /// Close every session and drop all retained state.
    ///
    /// Each port gets its stop command as part of closing; ports close
    /// concurrently.
    pub async fn shutdown(&self) {
        let _guard = self.lifecycle.lock().await;

        let sessions: Vec<(PortId, Arc<PortSession>)> = lock(&self.sessions).drain().collect();
        write(&self.shared.readings).clear();

        let mut closing = JoinSet::new();
        for (id, session) in sessions {
            closing.spawn(async move {
                session.close().await;
                id
            });
        }
        while let Some(result) = closing.join_next().await {
            match result {
                Ok(id) => self.shared.publish(&id, HubEventKind::PortClosed),
                Err(e) => warn!(error = %e, "Port close task failed"),
            }
        }
        info!("Hub shut down");
    }

    fn new_session(&self, id: &str, baud_rate: u32, generation: u64) -> PortSession {
        let listener = Arc::new(PortListener {
            generation,
            shared: self.shared.clone(),
        });
        PortSession::new(
            id,
            self.settings.session_settings(baud_rate),
            self.connector.clone(),
            listener,
        )
    }

    async fn open_session(&self, session: &PortSession) -> HubResult<()> {
        match session.open().await {
            Ok(()) => {
                self.shared.publish(
                    session.port(),
                    HubEventKind::PortOpened {
                        baud_rate: session.settings().line.baud_rate,
                    },
                );
                Ok(())
            }
            Err(e) => {
                self.shared.publish(
                    session.port(),
                    HubEventKind::PortFailed {
                        reason: e.to_string(),
                    },
                );
                Err(e)
            }
        }
    }

    fn session(&self, id: &str) -> Option<Arc<PortSession>> {
        lock(&self.sessions).get(id).cloned()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Registered port ids, sorted.
    pub fn ports(&self) -> Vec<PortId> {
        let mut ports: Vec<PortId> = lock(&self.sessions).keys().cloned().collect();
        ports.sort();
        ports
    }

    /// Lifecycle state of the session for `id`.
    pub fn port_state(&self, id: &str) -> Option<SessionState> {
        self.session(id).map(|session| session.state())
    }

    /// Whether `id` is open with a live reader.
    pub fn is_connected(&self, id: &str) -> bool {
        self.session(id).is_some_and(|session| session.is_connected())
    }

    /// Mean of the known sensor values for `id`; 0 for unknown ports or
    /// ports with no readings yet.
    pub fn get_average_pressure(&self, id: &str) -> f64 {
        read(&self.shared.readings)
            .get(id)
            .map_or(0.0, |entry| lock(entry).average)
    }

    /// Last value for (`id`, `index`); 0 when absent.
    pub fn get_sensor_value(&self, id: &str, index: SensorIndex) -> f64 {
        read(&self.shared.readings)
            .get(id)
            .and_then(|entry| lock(entry).sensors.get(&index).copied())
            .unwrap_or(0.0)
    }

    /// Copy of the current sensor map for `id` (empty when unknown).
    pub fn sensor_snapshot(&self, id: &str) -> BTreeMap<SensorIndex, f64> {
        read(&self.shared.readings)
            .get(id)
            .map(|entry| lock(entry).sensors.clone())
            .unwrap_or_default()
    }

    /// Copy of every port's sensor map.
    pub fn all_readings(&self) -> HashMap<PortId, BTreeMap<SensorIndex, f64>> {
        read(&self.shared.readings)
            .iter()
            .map(|(id, entry)| (id.clone(), lock(entry).sensors.clone()))
            .collect()
    }

    /// Number of sensor indices seen on `id`.
    pub fn sensor_count(&self, id: &str) -> usize {
        read(&self.shared.readings)
            .get(id)
            .map_or(0, |entry| lock(entry).sensors.len())
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Write `command` to one port, appending the terminator if absent.
    ///
    /// Unknown ports and write failures are logged and returned; the port
    /// stays open either way.
    pub fn send_command_to_port(&self, id: &str, command: &str) -> HubResult<()> {
        let Some(session) = self.session(id) else {
            warn!(port = id, command, "Port not found");
            return Err(HubError::UnknownPort(id.to_string()));
        };
        session.write(command)
    }

    /// Write `command` to every registered port; returns how many accepted it.
    pub fn send_command_to_all(&self, command: &str) -> usize {
        let sessions: Vec<Arc<PortSession>> = lock(&self.sessions).values().cloned().collect();
        sessions
            .iter()
            .filter(|session| session.write(command).is_ok())
            .count()
    }

    /// Send a typed command to one port.
    pub fn send_to_port(&self, id: &str, command: &Command) -> HubResult<()> {
        self.send_command_to_port(id, &command.encode())
    }

    /// Send a typed command to every port.
    pub fn send_to_all(&self, command: &Command) -> usize {
        self.send_command_to_all(&command.encode())
    }

    /// Stop actuators on every port.
    pub fn stop_all(&self) -> usize {
        self.send_to_all(&Command::Stop)
    }

    /// Stop actuators on one port.
    pub fn stop_port(&self, id: &str) -> HubResult<()> {
        self.send_to_port(id, &Command::Stop)
    }

    /// Set a vibration channel on every port.
    pub fn set_vibration_all(&self, channel: u8, intensity: u8) -> usize {
        self.send_to_all(&Command::Vibrate { channel, intensity })
    }

    /// Set a vibration channel on one port.
    pub fn set_vibration_port(&self, id: &str, channel: u8, intensity: u8) -> HubResult<()> {
        self.send_to_port(id, &Command::Vibrate { channel, intensity })
    }

    /// Run a preset pattern on every port.
    pub fn execute_preset_all(&self, preset: u32) -> usize {
        self.send_to_all(&Command::Preset(preset))
    }

    /// Run a preset pattern on one port.
    pub fn execute_preset_port(&self, id: &str, preset: u32) -> HubResult<()> {
        self.send_to_port(id, &Command::Preset(preset))
    }
}

impl std::fmt::Debug for SerialHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialHub")
            .field("ports", &self.ports())
            .field("settings", &self.settings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{MockConnector, MockDevice};
    use std::time::Duration;
    use tokio::time::timeout;
    use tracing_test::traced_test;

    fn hub() -> (SerialHub, Arc<MockConnector>) {
        let connector = Arc::new(MockConnector::new());
        let settings = HubSettings::default()
            .with_read_timeout(Duration::from_millis(10))
            .with_close_grace(Duration::from_millis(500));
        (SerialHub::new(connector.clone(), settings), connector)
    }

    /// Wait for the consolidated update that follows a sensor frame.
    async fn next_pressure(
        events: &mut broadcast::Receiver<HubEvent>,
    ) -> (String, BTreeMap<SensorIndex, f64>, f64) {
        loop {
            let event = timeout(Duration::from_secs(2), events.recv())
                .await
                .expect("timed out waiting for pressure update")
                .unwrap();
            if let HubEventKind::PressureUpdated { sensors, average } = event.kind {
                return (event.port, sensors, average);
            }
        }
    }

    async fn registered(hub: &SerialHub, connector: &MockConnector, id: &str) -> MockDevice {
        let device = connector.device(id);
        hub.register_port(id, 9600).await.unwrap();
        device
    }

    #[test]
    fn average_of_empty_map_is_zero() {
        assert_eq!(average(&BTreeMap::new()), 0.0);
        assert_eq!(average(&BTreeMap::from([(0, 10.0), (1, 20.0)])), 15.0);
    }

    #[tokio::test]
    async fn average_tracks_merged_updates() {
        let (hub, connector) = hub();
        let mut events = hub.subscribe();
        let device = registered(&hub, &connector, "COM16").await;

        device.feed("10,20;");
        let (_, _, avg) = next_pressure(&mut events).await;
        assert_eq!(avg, 15.0);
        assert_eq!(hub.get_average_pressure("COM16"), 15.0);

        device.feed("30;");
        let (_, sensors, avg) = next_pressure(&mut events).await;
        assert_eq!(sensors, BTreeMap::from([(0, 30.0), (1, 20.0)]));
        assert_eq!(avg, 25.0);
        assert_eq!(hub.get_average_pressure("COM16"), 25.0);
        assert_eq!(hub.get_sensor_value("COM16", 1), 20.0);

        hub.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_port_reads_zero() {
        let (hub, _) = hub();
        assert_eq!(hub.get_average_pressure("COM99"), 0.0);
        assert_eq!(hub.get_sensor_value("COM99", 3), 0.0);
        assert!(hub.sensor_snapshot("COM99").is_empty());
        assert_eq!(hub.sensor_count("COM99"), 0);
        assert_eq!(hub.port_state("COM99"), None);
    }

    #[tokio::test]
    async fn per_index_events_precede_consolidated_update() {
        let (hub, connector) = hub();
        let device = registered(&hub, &connector, "COM3").await;
        let mut events = hub.subscribe();

        device.feed("SENSOR_AUTO:1.5,bad,3.0;");
        let mut kinds = Vec::new();
        while kinds.len() < 3 {
            let event = timeout(Duration::from_secs(2), events.recv())
                .await
                .unwrap()
                .unwrap();
            kinds.push(event.kind);
        }
        assert_eq!(
            kinds,
            vec![
                HubEventKind::SensorUpdated {
                    index: 0,
                    value: 1.5
                },
                HubEventKind::SensorUpdated {
                    index: 2,
                    value: 3.0
                },
                HubEventKind::PressureUpdated {
                    sensors: BTreeMap::from([(0, 1.5), (2, 3.0)]),
                    average: 2.25
                },
            ]
        );
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn text_frames_become_messages() {
        let (hub, connector) = hub();
        let device = registered(&hub, &connector, "COM3").await;
        let mut events = hub.subscribe();

        device.feed("hello world;");
        let event = timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event.kind,
            HubEventKind::Message {
                text: "hello world".into()
            }
        );
        assert!(hub.sensor_snapshot("COM3").is_empty());
        hub.shutdown().await;
    }

    #[tokio::test]
    #[traced_test]
    async fn duplicate_registration_is_a_warning() {
        let (hub, connector) = hub();
        let device = registered(&hub, &connector, "COM3").await;
        hub.register_port("COM3", 115_200).await.unwrap();

        assert_eq!(device.open_count(), 1);
        assert_eq!(hub.ports(), vec!["COM3".to_string()]);
        assert!(logs_contain("Port is already registered"));
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn failed_open_keeps_port_registered_as_failed() {
        let (hub, connector) = hub();
        connector.set_unavailable("COM7", true);
        let mut events = hub.subscribe();

        let err = hub.register_port("COM7", 9600).await.unwrap_err();
        assert!(matches!(err, HubError::PortOpen { .. }));
        assert_eq!(hub.port_state("COM7"), Some(SessionState::Failed));
        assert_eq!(hub.get_average_pressure("COM7"), 0.0);
        assert!(matches!(
            hub.send_command_to_port("COM7", "S"),
            Err(HubError::PortNotOpen(_))
        ));

        let event = events.recv().await.unwrap();
        assert!(matches!(event.kind, HubEventKind::PortFailed { .. }));

        connector.set_unavailable("COM7", false);
        hub.reopen_port("COM7").await.unwrap();
        assert_eq!(hub.port_state("COM7"), Some(SessionState::Open));
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn commands_reach_the_right_ports() {
        let (hub, connector) = hub();
        let a = registered(&hub, &connector, "COM3").await;
        let b = registered(&hub, &connector, "COM4").await;

        hub.send_command_to_port("COM3", "V1128").unwrap();
        hub.set_vibration_port("COM4", 2, 5).unwrap();
        assert_eq!(hub.execute_preset_all(7), 2);

        assert_eq!(a.written_string(), "V1128;P7;");
        assert_eq!(b.written_string(), "V2005;P7;");

        assert!(matches!(
            hub.send_command_to_port("COM99", "S"),
            Err(HubError::UnknownPort(_))
        ));
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn unregister_stops_and_forgets_port() {
        let (hub, connector) = hub();
        let mut events = hub.subscribe();
        let device = registered(&hub, &connector, "COM3").await;

        device.feed("4,6;");
        next_pressure(&mut events).await;
        assert_eq!(hub.get_average_pressure("COM3"), 5.0);

        assert!(hub.unregister_port("COM3").await);
        assert_eq!(device.written_string(), "S;");
        assert_eq!(hub.get_average_pressure("COM3"), 0.0);
        assert!(hub.ports().is_empty());
        assert!(!hub.unregister_port("COM3").await);
    }

    #[tokio::test]
    async fn reregistration_starts_from_empty_readings() {
        let (hub, connector) = hub();
        let mut events = hub.subscribe();
        let device = registered(&hub, &connector, "COM3").await;

        device.feed("8;");
        next_pressure(&mut events).await;
        hub.unregister_port("COM3").await;

        hub.register_port("COM3", 9600).await.unwrap();
        assert!(hub.sensor_snapshot("COM3").is_empty());
        assert_eq!(device.open_count(), 2);
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn reopen_keeps_readings() {
        let (hub, connector) = hub();
        let mut events = hub.subscribe();
        let device = registered(&hub, &connector, "COM3").await;

        device.feed("2,4;");
        next_pressure(&mut events).await;
        hub.reopen_port("COM3").await.unwrap();
        assert_eq!(hub.get_average_pressure("COM3"), 3.0);

        device.feed("SENSOR_AUTO:,10;");
        let (_, sensors, _) = next_pressure(&mut events).await;
        assert_eq!(sensors, BTreeMap::from([(0, 2.0), (1, 10.0)]));
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn read_failure_is_published() {
        let (hub, connector) = hub();
        let device = registered(&hub, &connector, "COM3").await;
        let mut events = hub.subscribe();

        assert!(hub.is_connected("COM3"));
        device.fail_next_read(std::io::ErrorKind::BrokenPipe);
        let event = timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event.kind, HubEventKind::ReadFailed { .. }));
        assert_eq!(hub.port_state("COM3"), Some(SessionState::Open));
        // Reader is gone, so the port no longer counts as connected.
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while hub.is_connected("COM3") {
            assert!(std::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!hub.is_connected("COM99"));
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn update_ports_replaces_registered_set() {
        let (hub, connector) = hub();
        registered(&hub, &connector, "COM3").await;
        registered(&hub, &connector, "COM4").await;

        let failures = hub
            .update_ports(&[
                PortDefinition::new("COM5"),
                PortDefinition::with_baud_rate("COM6", 115_200),
            ])
            .await;
        assert!(failures.is_empty());
        assert_eq!(hub.ports(), vec!["COM5".to_string(), "COM6".to_string()]);
        assert_eq!(
            connector.device("COM6").last_settings().map(|s| s.baud_rate),
            Some(115_200)
        );
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_every_port_once() {
        let (hub, connector) = hub();
        let a = registered(&hub, &connector, "COM3").await;
        let b = registered(&hub, &connector, "COM4").await;

        hub.shutdown().await;
        hub.shutdown().await;

        assert_eq!(a.written_string(), "S;");
        assert_eq!(b.written_string(), "S;");
        assert!(hub.ports().is_empty());
        assert!(hub.all_readings().is_empty());
    }

    #[tokio::test]
    async fn empty_port_id_is_rejected() {
        let (hub, _) = hub();
        assert!(matches!(
            hub.register_port(" ", 9600).await,
            Err(HubError::Configuration(_))
        ));
        assert!(hub.ports().is_empty());
    }
}
