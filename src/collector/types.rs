//! Sample and event types produced by the sensor and proximity sources.
//!
//! Sensor timestamps are seconds on a process-wide monotonic clock, never
//! wall-clock time.

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Instant;
use uuid::Uuid;

static CLOCK_BASE: OnceLock<Instant> = OnceLock::new();

/// Seconds elapsed on the monotonic clock shared by all sources.
pub fn monotonic_now() -> f64 {
    CLOCK_BASE.get_or_init(Instant::now).elapsed().as_secs_f64()
}

/// The three motion sensors feeding the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Accelerometer,
    Gyroscope,
    Magnetometer,
}

impl SensorKind {
    /// All sensors, in alignment order.
    pub const ALL: [SensorKind; 3] = [
        SensorKind::Accelerometer,
        SensorKind::Gyroscope,
        SensorKind::Magnetometer,
    ];

    /// Position of this sensor within an aligned triple.
    pub fn index(self) -> usize {
        match self {
            SensorKind::Accelerometer => 0,
            SensorKind::Gyroscope => 1,
            SensorKind::Magnetometer => 2,
        }
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorKind::Accelerometer => write!(f, "accelerometer"),
            SensorKind::Gyroscope => write!(f, "gyroscope"),
            SensorKind::Magnetometer => write!(f, "magnetometer"),
        }
    }
}

/// One three-axis reading from a single sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Monotonic timestamp in seconds
    pub timestamp: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Sample {
    pub fn new(timestamp: f64, x: f64, y: f64, z: f64) -> Self {
        Self { timestamp, x, y, z }
    }

    /// Euclidean norm of the three axes.
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Ranged distance bucket reported for a beacon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProximityLevel {
    Unknown,
    Immediate,
    Near,
    Far,
}

impl ProximityLevel {
    /// Whether this level is close enough to warrant an alert.
    pub fn is_close(self) -> bool {
        matches!(self, ProximityLevel::Immediate | ProximityLevel::Near)
    }
}

fn unknown_accuracy() -> f64 {
    -1.0
}

/// A single ranging observation from the proximity collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProximityEvent {
    /// Beacon region identifier
    pub source_id: Uuid,
    /// Ranged proximity bucket
    pub proximity: ProximityLevel,
    /// Estimated distance accuracy in meters (negative when unknown)
    #[serde(default = "unknown_accuracy")]
    pub accuracy: f64,
    /// Received signal strength; zero means the reading is noise
    pub signal_strength: i32,
    /// Monotonic arrival time in seconds
    #[serde(default = "monotonic_now")]
    pub timestamp: f64,
}

impl ProximityEvent {
    pub fn new(source_id: Uuid, proximity: ProximityLevel, signal_strength: i32) -> Self {
        Self {
            source_id,
            proximity,
            accuracy: -1.0,
            signal_strength,
            timestamp: monotonic_now(),
        }
    }

    /// Override the event timestamp.
    pub fn at(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Errors reported by a sensor or proximity source.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceError {
    /// The source failed while producing samples
    Transport { source: String, message: String },
    /// The source stopped producing (channel closed or unsubscribed)
    Terminated { source: String },
    /// The source could not be opened
    Unavailable { source: String, message: String },
}

impl SourceError {
    pub fn transport(source: impl ToString, message: impl Into<String>) -> Self {
        SourceError::Transport {
            source: source.to_string(),
            message: message.into(),
        }
    }

    pub fn terminated(source: impl ToString) -> Self {
        SourceError::Terminated {
            source: source.to_string(),
        }
    }

    pub fn unavailable(source: impl ToString, message: impl Into<String>) -> Self {
        SourceError::Unavailable {
            source: source.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Transport { source, message } => {
                write!(f, "{source} source failed: {message}")
            }
            SourceError::Terminated { source } => write!(f, "{source} source terminated"),
            SourceError::Unavailable { source, message } => {
                write!(f, "{source} source unavailable: {message}")
            }
        }
    }
}

impl std::error::Error for SourceError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_magnitude() {
        let sample = Sample::new(0.0, 3.0, 4.0, 0.0);
        assert!((sample.magnitude() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_proximity_level_is_close() {
        assert!(ProximityLevel::Near.is_close());
        assert!(ProximityLevel::Immediate.is_close());
        assert!(!ProximityLevel::Far.is_close());
        assert!(!ProximityLevel::Unknown.is_close());
    }

    #[test]
    fn test_monotonic_clock_advances() {
        let a = monotonic_now();
        let b = monotonic_now();
        assert!(b >= a);
    }

    #[test]
    fn test_proximity_event_timestamp_defaults_on_deserialize() {
        let json = r#"{
            "source_id": "18f17185-ab14-2018-0329-000000000015",
            "proximity": "near",
            "accuracy": 0.4,
            "signal_strength": -61
        }"#;
        let event: ProximityEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.proximity, ProximityLevel::Near);
        assert_eq!(event.signal_strength, -61);
        assert!(event.timestamp >= 0.0);
    }
}
