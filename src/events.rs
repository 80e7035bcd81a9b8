//! Notifications published by the hub.
//!
//! Every subscriber gets its own `tokio::sync::broadcast` receiver and sees
//! every event independently. Events are serialisable so the CLI can stream
//! them as JSON lines.

use crate::protocol::SensorIndex;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// One hub notification, tagged with the port it concerns.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HubEvent {
    /// Port identifier
    pub port: String,
    /// When the hub produced the event
    pub timestamp: DateTime<Utc>,
    /// What happened
    #[serde(flatten)]
    pub kind: HubEventKind,
}

/// Event payloads.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HubEventKind {
    /// Free-text frame from the device.
    Message {
        /// Frame payload
        text: String,
    },
    /// A frame changed one sensor; emitted once per delivered index.
    SensorUpdated {
        /// Sensor index on this port
        index: SensorIndex,
        /// New value
        value: f64,
    },
    /// Consolidated state after a sensor frame was merged.
    PressureUpdated {
        /// Full current sensor map for the port
        sensors: BTreeMap<SensorIndex, f64>,
        /// Mean over `sensors`
        average: f64,
    },
    /// Session opened and its reader is running.
    PortOpened {
        /// Line speed used
        baud_rate: u32,
    },
    /// Session could not open the device.
    PortFailed {
        /// Error description
        reason: String,
    },
    /// Reader stopped after a non-timeout read error.
    ReadFailed {
        /// Error description
        reason: String,
    },
    /// Session closed and removed.
    PortClosed,
}

impl HubEvent {
    /// Build an event for `port` stamped with the current time.
    pub fn new(port: impl Into<String>, kind: HubEventKind) -> Self {
        Self {
            port: port.into(),
            timestamp: Utc::now(),
            kind,
        }
    }
}
