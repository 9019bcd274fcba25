//! `envsim-types` – shared vocabulary for the sensor fleet.
//!
//! Everything that crosses a crate boundary lives here: sensor kinds and
//! identities, the data/control message value objects, topic names and the
//! workspace-wide [`SimError`].

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Topic every sensor subscribes to for remote commands.
pub const CONTROL_TOPIC: &str = "sensors/control";

/// The four fixed measurement types simulated by the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorKind {
    #[serde(rename = "TEMPERATURE")]
    Temperature,
    #[serde(rename = "PRESSURE")]
    Pressure,
    #[serde(rename = "CO2")]
    Co2,
    #[serde(rename = "DISSOLVED_OXYGEN")]
    DissolvedOxygen,
}

impl SensorKind {
    /// Every kind, in fleet construction order.
    pub const ALL: [SensorKind; 4] = [
        SensorKind::Temperature,
        SensorKind::Pressure,
        SensorKind::Co2,
        SensorKind::DissolvedOxygen,
    ];

    /// Wire name used in the `sensorType` field.
    pub fn as_str(self) -> &'static str {
        match self {
            SensorKind::Temperature => "TEMPERATURE",
            SensorKind::Pressure => "PRESSURE",
            SensorKind::Co2 => "CO2",
            SensorKind::DissolvedOxygen => "DISSOLVED_OXYGEN",
        }
    }

    /// Measurement unit attached to every reading of this kind.
    pub fn unit(self) -> &'static str {
        match self {
            SensorKind::Temperature => "°C",
            SensorKind::Pressure => "hPa",
            SensorKind::Co2 => "ppm",
            SensorKind::DissolvedOxygen => "mg/L",
        }
    }

    /// Data topic this kind publishes readings to.
    pub fn topic(self) -> &'static str {
        match self {
            SensorKind::Temperature => "sensors/temperature",
            SensorKind::Pressure => "sensors/pressure",
            SensorKind::Co2 => "sensors/co2",
            SensorKind::DissolvedOxygen => "sensors/oxygen",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable identity of a single simulated sensor.
///
/// The `id` is handed out by the fleet's id allocator and is never reused
/// within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SensorIdentity {
    pub id: u64,
    pub kind: SensorKind,
}

impl SensorIdentity {
    pub fn new(id: u64, kind: SensorKind) -> Self {
        Self { id, kind }
    }

    pub fn unit(&self) -> &'static str {
        self.kind.unit()
    }

    pub fn topic(&self) -> &'static str {
        self.kind.topic()
    }

    /// Human-readable name, e.g. `"CO2 no.: 3"`.
    pub fn name(&self) -> String {
        format!("{} no.: {}", self.kind, self.id)
    }
}

impl fmt::Display for SensorIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} no.: {}", self.kind, self.id)
    }
}

/// Inclusive range the publish loop draws its inter-sample delay from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SleepBounds {
    lower: Duration,
    upper: Duration,
}

impl SleepBounds {
    /// Build bounds from a `lower..=upper` pair.
    ///
    /// Returns [`SimError::InvalidConfig`] when `lower > upper`.
    pub fn new(lower: Duration, upper: Duration) -> Result<Self, SimError> {
        if lower > upper {
            return Err(SimError::InvalidConfig(format!(
                "sleep lower bound {lower:?} exceeds upper bound {upper:?}"
            )));
        }
        Ok(Self { lower, upper })
    }

    /// Build bounds from fractional seconds, rejecting negative or
    /// non-finite values.
    pub fn from_secs_f64(lower: f64, upper: f64) -> Result<Self, SimError> {
        for v in [lower, upper] {
            if !v.is_finite() || v < 0.0 {
                return Err(SimError::InvalidConfig(format!(
                    "sleep bound must be a finite, non-negative number of seconds, got {v}"
                )));
            }
        }
        Self::new(Duration::from_secs_f64(lower), Duration::from_secs_f64(upper))
    }

    pub fn lower(&self) -> Duration {
        self.lower
    }

    pub fn upper(&self) -> Duration {
        self.upper
    }

    /// Draw a delay uniformly from `[lower, upper]`.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let lo = self.lower.as_secs_f64();
        let hi = self.upper.as_secs_f64();
        Duration::from_secs_f64(rng.gen_range(lo..=hi))
    }
}

impl Default for SleepBounds {
    fn default() -> Self {
        Self {
            lower: Duration::from_secs(1),
            upper: Duration::from_secs(10),
        }
    }
}

/// One reading as it appears on a data topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataMessage {
    pub sensor_id: u64,
    pub sensor_type: SensorKind,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub unit: String,
}

/// Commands understood on the control topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    StartAll,
    StopAll,
    Set,
    /// Any other command string; dispatch ignores it.
    Unknown(String),
}

impl Command {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "start" => Command::Start,
            "stop" => Command::Stop,
            "start_all" => Command::StartAll,
            "stop_all" => Command::StopAll,
            "set" => Command::Set,
            other => Command::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Command::Start => "start",
            Command::Stop => "stop",
            Command::StartAll => "start_all",
            Command::StopAll => "stop_all",
            Command::Set => "set",
            Command::Unknown(s) => s,
        }
    }
}

/// A decoded control message.
///
/// `command` is optional: a message that names a sensor and carries a value
/// but no command is an implicit "set value".
#[derive(Debug, Clone, PartialEq)]
pub struct ControlMessage {
    pub command: Option<Command>,
    pub sensor_id: Option<u64>,
    pub value: Option<f64>,
}

impl ControlMessage {
    pub fn broadcast(command: Command) -> Self {
        Self {
            command: Some(command),
            sensor_id: None,
            value: None,
        }
    }

    pub fn targeted(command: Command, sensor_id: u64) -> Self {
        Self {
            command: Some(command),
            sensor_id: Some(sensor_id),
            value: None,
        }
    }

    pub fn set_value(sensor_id: u64, value: f64) -> Self {
        Self {
            command: Some(Command::Set),
            sensor_id: Some(sensor_id),
            value: Some(value),
        }
    }
}

/// Error type shared by every crate in the workspace.
#[derive(Error, Debug)]
pub enum SimError {
    #[error("Broker connection failed: {0}")]
    Connection(String),

    #[error("Transport is not connected")]
    NotConnected,

    #[error("Publish to {topic} failed: {details}")]
    Publish { topic: String, details: String },

    #[error("Malformed control message: {0}")]
    Decode(String),

    #[error("Invalid reading value: {0}")]
    InvalidValue(f64),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Sensor {0} has been shut down")]
    Terminated(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn sensor_kind_wire_names() {
        for (kind, wire) in [
            (SensorKind::Temperature, "\"TEMPERATURE\""),
            (SensorKind::Pressure, "\"PRESSURE\""),
            (SensorKind::Co2, "\"CO2\""),
            (SensorKind::DissolvedOxygen, "\"DISSOLVED_OXYGEN\""),
        ] {
            assert_eq!(serde_json::to_string(&kind).unwrap(), wire);
            assert_eq!(format!("\"{}\"", kind.as_str()), wire);
        }
    }

    #[test]
    fn each_kind_has_distinct_topic() {
        let mut topics: Vec<_> = SensorKind::ALL.iter().map(|k| k.topic()).collect();
        topics.sort();
        topics.dedup();
        assert_eq!(topics.len(), 4);
        assert!(!topics.contains(&CONTROL_TOPIC));
    }

    #[test]
    fn identity_name_embeds_kind_and_id() {
        let identity = SensorIdentity::new(7, SensorKind::DissolvedOxygen);
        assert_eq!(identity.name(), "DISSOLVED_OXYGEN no.: 7");
        assert_eq!(identity.to_string(), identity.name());
        assert_eq!(identity.unit(), "mg/L");
        assert_eq!(identity.topic(), "sensors/oxygen");
    }

    #[test]
    fn sleep_bounds_reject_inverted_range() {
        let err = SleepBounds::new(Duration::from_secs(5), Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, SimError::InvalidConfig(_)));
    }

    #[test]
    fn sleep_bounds_reject_negative_and_nan() {
        assert!(SleepBounds::from_secs_f64(-1.0, 2.0).is_err());
        assert!(SleepBounds::from_secs_f64(0.0, f64::NAN).is_err());
    }

    #[test]
    fn sleep_bounds_draw_stays_in_range() {
        let bounds = SleepBounds::from_secs_f64(0.1, 0.3).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..1_000 {
            let d = bounds.draw(&mut rng);
            assert!(d >= bounds.lower() && d <= bounds.upper(), "{d:?} out of range");
        }
    }

    #[test]
    fn sleep_bounds_allow_degenerate_range() {
        let bounds = SleepBounds::from_secs_f64(0.5, 0.5).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(bounds.draw(&mut rng), Duration::from_millis(500));
    }

    #[test]
    fn command_parse_known_and_unknown() {
        assert_eq!(Command::parse("start_all"), Command::StartAll);
        assert_eq!(Command::parse("set"), Command::Set);
        let unknown = Command::parse("set_all");
        assert_eq!(unknown, Command::Unknown("set_all".to_string()));
        assert_eq!(unknown.as_str(), "set_all");
    }

    #[test]
    fn sim_error_display() {
        let err = SimError::Publish {
            topic: "sensors/co2".to_string(),
            details: "broker gone".to_string(),
        };
        assert!(err.to_string().contains("sensors/co2"));
        assert!(SimError::Terminated(4).to_string().contains('4'));
    }
}
