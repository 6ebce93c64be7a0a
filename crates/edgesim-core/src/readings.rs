//! Sensor readings and the three pipeline stages that operate on them
//!
//! A loop iteration runs `generate` → `transform` → `evaluate`. The sensor
//! table (generation range and anomaly threshold) is static.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Multiplier applied to every reading by [`transform`]
pub const SCALE_FACTOR: f64 = 1.01;

/// Range of the synthetic processing delay attached by [`evaluate`], in milliseconds
pub const CPU_DELAY_RANGE_MS: (f64, f64) = (250.0, 270.0);

/// Simulated industrial sensors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Sensor {
    Pressure,
    Vibration,
    FlowRate,
    Torque,
    MotorSpeed,
}

impl Sensor {
    /// All sensors, in generation order
    pub const ALL: [Sensor; 5] = [
        Sensor::Pressure,
        Sensor::Vibration,
        Sensor::FlowRate,
        Sensor::Torque,
        Sensor::MotorSpeed,
    ];

    /// Wire name of the sensor
    pub fn name(self) -> &'static str {
        match self {
            Sensor::Pressure => "PRESSURE",
            Sensor::Vibration => "VIBRATION",
            Sensor::FlowRate => "FLOW_RATE",
            Sensor::Torque => "TORQUE",
            Sensor::MotorSpeed => "MOTOR_SPEED",
        }
    }

    /// Generation range as `[low, high)`
    pub fn range(self) -> (f64, f64) {
        match self {
            Sensor::Pressure => (200.0, 300.0),
            Sensor::Vibration => (0.1, 2.0),
            Sensor::FlowRate => (10.0, 50.0),
            Sensor::Torque => (50.0, 150.0),
            Sensor::MotorSpeed => (1000.0, 3000.0),
        }
    }

    /// Value above which a reading is flagged anomalous
    pub fn threshold(self) -> f64 {
        match self {
            Sensor::Pressure => 280.0,
            Sensor::Vibration => 1.8,
            Sensor::FlowRate => 45.0,
            Sensor::Torque => 140.0,
            Sensor::MotorSpeed => 2800.0,
        }
    }
}

impl fmt::Display for Sensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown sensor name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown sensor: {0}")]
pub struct UnknownSensor(pub String);

impl FromStr for Sensor {
    type Err = UnknownSensor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Sensor::ALL
            .into_iter()
            .find(|sensor| sensor.name() == s)
            .ok_or_else(|| UnknownSensor(s.to_string()))
    }
}

/// Threshold lookup by wire name. Names outside the sensor table have none.
pub fn threshold_for(name: &str) -> Option<f64> {
    name.parse::<Sensor>().ok().map(Sensor::threshold)
}

/// True iff `value` strictly exceeds the sensor's threshold
pub fn is_anomalous(name: &str, value: f64) -> bool {
    threshold_for(name).is_some_and(|threshold| value > threshold)
}

/// Round to two decimal places
///
/// Rounds the exact binary value, ties to even, so `202.50499999999997`
/// (200.5 × 1.01) becomes 202.5. Scaling by 100 first would round twice.
pub fn round2(value: f64) -> f64 {
    if !value.is_finite() {
        return value;
    }
    format!("{:.2}", value).parse().unwrap_or(value)
}

/// Insertion-ordered mapping of sensor name to value for one iteration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Readings {
    entries: Vec<(String, f64)>,
}

impl Readings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value, keeping the original position on replace
    pub fn insert(&mut self, sensor: impl Into<String>, value: f64) {
        let sensor = sensor.into();
        match self.entries.iter_mut().find(|(name, _)| *name == sensor) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((sensor, value)),
        }
    }

    pub fn get(&self, sensor: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(name, _)| name == sensor)
            .map(|(_, value)| *value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), *value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for Readings {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        let mut readings = Readings::new();
        for (sensor, value) in iter {
            readings.insert(sensor, value);
        }
        readings
    }
}

impl fmt::Display for Readings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", name, value)?;
        }
        f.write_str("}")
    }
}

/// One evaluated reading, the body of a telemetry message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatedReading {
    pub sensor: String,
    pub value: f64,
    pub cpu_delay_ms: f64,
    pub anomaly: bool,
}

/// Static device description sent once at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupMetadata {
    pub device: String,
    pub location: String,
    #[serde(rename = "type")]
    pub device_type: String,
}

impl Default for StartupMetadata {
    fn default() -> Self {
        Self {
            device: "edge-device".to_string(),
            location: "Factory-Floor-3".to_string(),
            device_type: "Industrial-Edge-Node".to_string(),
        }
    }
}

/// Draw one value per sensor from its generation range
pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Readings {
    Sensor::ALL
        .into_iter()
        .map(|sensor| {
            let (low, high) = sensor.range();
            (sensor.name(), sample_rounded(rng, low, high))
        })
        .collect()
}

/// Scale every value by [`SCALE_FACTOR`]
pub fn transform(readings: &Readings) -> Readings {
    readings
        .iter()
        .map(|(name, value)| (name, round2(value * SCALE_FACTOR)))
        .collect()
}

/// Attach a synthetic delay and anomaly flag to every reading, preserving order
pub fn evaluate<R: Rng + ?Sized>(readings: &Readings, rng: &mut R) -> Vec<EvaluatedReading> {
    let (low, high) = CPU_DELAY_RANGE_MS;
    readings
        .iter()
        .map(|(name, value)| EvaluatedReading {
            sensor: name.to_string(),
            value,
            cpu_delay_ms: sample_rounded(rng, low, high),
            anomaly: is_anomalous(name, value),
        })
        .collect()
}

// Rounding can land on `high`; pull it back to the last two-decimal value inside the range.
fn sample_rounded<R: Rng + ?Sized>(rng: &mut R, low: f64, high: f64) -> f64 {
    let value = round2(rng.random_range(low..high));
    if value >= high {
        round2(high - 0.01)
    } else {
        value
    }
}
