//! Synthetic motion source.
//!
//! Produces deterministic accelerometer/gyroscope/magnetometer traces that
//! resemble a phone held in the hands while walking, or carried in a pocket.
//! Used for demos, tests and machines without motion hardware.

use crate::collector::subscription::{Emitter, Subscription};
use crate::collector::types::{monotonic_now, Sample, SensorKind, SourceError};
use crate::collector::SensorSource;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::time::{Duration, Instant};

/// Rate used for timestamps when a caller asks for rate 0.
const FALLBACK_RATE_HZ: u32 = 50;

/// Shape of the synthetic motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionProfile {
    /// Device held in front of the user: steady gravity, restless rotation
    Hands,
    /// Device in a pocket: strong gait bounce, little rotation
    Pocket,
}

impl MotionProfile {
    /// Reading of `sensor` at `t` seconds into the trace.
    pub fn reading(self, sensor: SensorKind, t: f64) -> (f64, f64, f64) {
        let step = TAU * 1.8 * t;
        match (self, sensor) {
            (MotionProfile::Hands, SensorKind::Accelerometer) => (
                0.05 * step.sin(),
                -0.6 + 0.08 * (step + 1.0).sin(),
                -0.75 + 0.05 * step.cos(),
            ),
            (MotionProfile::Hands, SensorKind::Gyroscope) => (
                0.9 * (TAU * 0.7 * t).sin(),
                0.7 * (TAU * 1.1 * t + 0.5).sin(),
                0.5 * (TAU * 0.9 * t).cos(),
            ),
            (MotionProfile::Pocket, SensorKind::Accelerometer) => (
                0.3 * step.sin(),
                -0.95 + 0.4 * (2.0 * step).sin(),
                0.2 * step.cos(),
            ),
            (MotionProfile::Pocket, SensorKind::Gyroscope) => (
                0.05 * step.sin(),
                0.05 * (step + 0.5).sin(),
                0.05 * step.cos(),
            ),
            (_, SensorKind::Magnetometer) => (
                30.0 + 5.0 * (0.2 * t).sin(),
                -12.0 + 3.0 * (0.3 * t).cos(),
                -40.0,
            ),
        }
    }
}

/// Synthetic sensor source.
#[derive(Debug, Clone)]
pub struct SimulatedSensorSource {
    profile: MotionProfile,
    limit: Option<usize>,
    paced: bool,
    capacity: usize,
}

impl SimulatedSensorSource {
    /// Create an endless, real-time paced source.
    pub fn new(profile: MotionProfile) -> Self {
        Self {
            profile,
            limit: None,
            paced: true,
            capacity: 256,
        }
    }

    /// Stop each stream after `count` samples.
    pub fn with_limit(mut self, count: usize) -> Self {
        self.limit = Some(count);
        self
    }

    /// Emit as fast as the consumer accepts instead of at the sample rate.
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    /// Channel capacity per stream.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn profile(&self) -> MotionProfile {
        self.profile
    }
}

impl SensorSource for SimulatedSensorSource {
    fn subscribe(&self, sensor: SensorKind, rate_hz: u32) -> Result<Subscription<Sample>, SourceError> {
        let profile = self.profile;
        let limit = self.limit;
        let paced = self.paced && rate_hz > 0;
        let interval = 1.0 / f64::from(if rate_hz == 0 { FALLBACK_RATE_HZ } else { rate_hz });

        Subscription::spawn(sensor.to_string(), self.capacity, move |emitter: Emitter<Sample>| {
            let base = monotonic_now();
            let started = Instant::now();
            let mut index: usize = 0;

            while limit.map_or(true, |n| index < n) {
                let t = index as f64 * interval;
                if paced {
                    let due = Duration::from_secs_f64(t);
                    if let Some(wait) = due.checked_sub(started.elapsed()) {
                        std::thread::sleep(wait);
                    }
                }

                let (x, y, z) = profile.reading(sensor, t);
                if !emitter.emit(Sample::new(base + t, x, y, z)) {
                    return;
                }
                index += 1;
            }
            tracing::debug!(%sensor, samples = index, "simulated stream finished");
        })
    }
}
