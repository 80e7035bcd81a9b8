//! Payload classification for inbound frames.
//!
//! Priority order, first match wins:
//!
//! 1. `SENSOR_AUTO:` prefix: the remainder is a multi-sensor report.
//! 2. Payload contains a comma: the whole payload is a multi-sensor report.
//! 3. Payload parses as a number: single reading for sensor 0.
//! 4. Anything else: free-text message.
//!
//! A multi-sensor report assigns field `i` to sensor index `i`. Fields that do
//! not parse are skipped, so the caller keeps the previous value for that
//! index. A report where nothing parses is [`Payload::Ignored`].

use std::collections::BTreeMap;

/// Tag prefix of an automatic sensor report.
pub const AUTO_REPORT_PREFIX: &str = "SENSOR_AUTO:";

/// Per-port sensor channel number.
pub type SensorIndex = usize;

/// Decoded sensor values from one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorFrame {
    /// Values keyed by sensor index, only for fields that parsed.
    pub values: BTreeMap<SensorIndex, f64>,
    /// Positions whose field could not be parsed.
    pub skipped: Vec<SensorIndex>,
    /// Whether the frame carried the `SENSOR_AUTO:` tag.
    pub auto: bool,
}

/// Classification result for one frame payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// One or more sensor readings.
    Sensors(SensorFrame),
    /// Opaque text message from the device.
    Text(String),
    /// A multi-sensor report in which no field parsed.
    Ignored {
        /// The payload as received.
        raw: String,
    },
}

impl Payload {
    /// Returns the sensor frame, if this payload carried readings.
    pub fn as_sensors(&self) -> Option<&SensorFrame> {
        match self {
            Payload::Sensors(frame) => Some(frame),
            _ => None,
        }
    }
}

/// Classify and decode a trimmed frame payload. Never fails.
pub fn classify(payload: &str) -> Payload {
    let payload = payload.trim();

    if let Some(report) = payload.strip_prefix(AUTO_REPORT_PREFIX) {
        return decode_report(payload, report, true);
    }

    if payload.contains(',') {
        return decode_report(payload, payload, false);
    }

    match parse_reading(payload) {
        Some(value) => Payload::Sensors(SensorFrame {
            values: BTreeMap::from([(0, value)]),
            skipped: Vec::new(),
            auto: false,
        }),
        None => Payload::Text(payload.to_string()),
    }
}

fn decode_report(raw: &str, report: &str, auto: bool) -> Payload {
    let mut values = BTreeMap::new();
    let mut skipped = Vec::new();

    for (index, field) in report.split(',').enumerate() {
        match parse_reading(field) {
            Some(value) => {
                values.insert(index, value);
            }
            None => skipped.push(index),
        }
    }

    if values.is_empty() {
        Payload::Ignored {
            raw: raw.to_string(),
        }
    } else {
        Payload::Sensors(SensorFrame {
            values,
            skipped,
            auto,
        })
    }
}

/// Parse one numeric field. `str::parse` is locale-independent; non-finite
/// values would poison the port average, so they count as unparseable.
fn parse_reading(field: &str) -> Option<f64> {
    field
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}
