//! Sensor and proximity sources for the motion alert agent.
//!
//! Every source is push-based: it owns a producer thread (or an external
//! feeder) and hands out [`Subscription`]s whose teardown releases the
//! underlying resource.

pub mod proximity;
pub mod replay;
pub mod simulated;
pub mod subscription;
pub mod types;

// Re-export commonly used types
pub use proximity::{ChannelProximitySource, ProximityFeeder, ProximitySource, SimulatedBeacon};
pub use replay::ReplaySource;
pub use simulated::{MotionProfile, SimulatedSensorSource};
pub use subscription::{Emitter, SourceMessage, Subscription};
pub use types::{monotonic_now, ProximityEvent, ProximityLevel, Sample, SensorKind, SourceError};

/// A provider of timestamped three-axis samples, one stream per sensor.
pub trait SensorSource {
    /// Start delivering samples for `sensor` at `rate_hz`.
    fn subscribe(&self, sensor: SensorKind, rate_hz: u32) -> Result<Subscription<Sample>, SourceError>;

    /// Subscribe to all three sensors in alignment order.
    ///
    /// On failure any subscription already opened is dropped, which releases it.
    fn subscribe_all(&self, rate_hz: u32) -> Result<[Subscription<Sample>; 3], SourceError> {
        let accelerometer = self.subscribe(SensorKind::Accelerometer, rate_hz)?;
        let gyroscope = self.subscribe(SensorKind::Gyroscope, rate_hz)?;
        let magnetometer = self.subscribe(SensorKind::Magnetometer, rate_hz)?;
        Ok([accelerometer, gyroscope, magnetometer])
    }
}
