//! Wire protocol spoken by the sensor/actuator boards.
//!
//! ASCII, semicolon-terminated frames in both directions:
//!
//! ```text
//! inbound   SENSOR_AUTO:<v0>,<v1>,...;   tagged multi-sensor report
//!           <v0>,<v1>,...;               plain multi-sensor report
//!           <v>;                         single reading for sensor 0
//!           anything else;               free-text message
//! outbound  <CMD>;                       S, V<ch><iii>, P<n>, or raw text
//! ```

pub mod classifier;
pub mod command;
pub mod framing;

pub use classifier::{classify, Payload, SensorFrame, SensorIndex, AUTO_REPORT_PREFIX};
pub use command::{terminate, Command};
pub use framing::FrameReader;

/// Frame terminator in both directions.
pub const TERMINATOR: char = ';';
