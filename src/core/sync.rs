//! Ordinal alignment of the three sensor streams.
//!
//! The n-th accelerometer, gyroscope and magnetometer samples are combined
//! into the n-th [`AlignedTriple`], regardless of their timestamps. Samples
//! from faster sources wait in a bounded backlog until the slowest source
//! catches up; a source with a full backlog is simply not read, which
//! pushes back on its channel.

use crate::collector::subscription::{SourceMessage, Subscription};
use crate::collector::types::{Sample, SensorKind, SourceError};
use crossbeam_channel::{Receiver, Select};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How often a blocked stream re-checks its stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One sample from each sensor, all at the same ordinal position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignedTriple {
    /// Ordinal position shared by the three samples
    pub index: u64,
    pub accelerometer: Sample,
    pub gyroscope: Sample,
    pub magnetometer: Sample,
}

impl AlignedTriple {
    /// The constituent sample for `sensor`.
    pub fn sample(&self, sensor: SensorKind) -> &Sample {
        match sensor {
            SensorKind::Accelerometer => &self.accelerometer,
            SensorKind::Gyroscope => &self.gyroscope,
            SensorKind::Magnetometer => &self.magnetometer,
        }
    }

    /// Latest of the three sample timestamps.
    pub fn max_timestamp(&self) -> f64 {
        self.accelerometer
            .timestamp
            .max(self.gyroscope.timestamp)
            .max(self.magnetometer.timestamp)
    }

    /// Spread between the earliest and latest sample timestamps.
    ///
    /// Alignment is ordinal, so a growing skew means the sensor rates drift.
    pub fn timestamp_skew(&self) -> f64 {
        let earliest = self
            .accelerometer
            .timestamp
            .min(self.gyroscope.timestamp)
            .min(self.magnetometer.timestamp);
        self.max_timestamp() - earliest
    }
}

/// A push was attempted into a backlog that is already full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BacklogFull {
    pub sensor: SensorKind,
}

impl std::fmt::Display for BacklogFull {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} backlog is full", self.sensor)
    }
}

impl std::error::Error for BacklogFull {}

/// Push-driven synchronizer state.
#[derive(Debug)]
pub struct StreamSynchronizer {
    pending: [VecDeque<Sample>; 3],
    next_index: u64,
    backlog_capacity: usize,
}

impl StreamSynchronizer {
    /// Create a synchronizer holding at most `backlog_capacity` unmatched
    /// samples per sensor.
    pub fn new(backlog_capacity: usize) -> Self {
        Self {
            pending: Default::default(),
            next_index: 0,
            backlog_capacity: backlog_capacity.max(1),
        }
    }

    /// Whether another sample from `sensor` fits in its backlog.
    pub fn accepts(&self, sensor: SensorKind) -> bool {
        self.pending[sensor.index()].len() < self.backlog_capacity
    }

    /// Add a sample; returns a triple once every sensor has reached the
    /// next ordinal position.
    pub fn push(&mut self, sensor: SensorKind, sample: Sample) -> Result<Option<AlignedTriple>, BacklogFull> {
        if !self.accepts(sensor) {
            return Err(BacklogFull { sensor });
        }
        self.pending[sensor.index()].push_back(sample);

        if self.pending.iter().any(|q| q.is_empty()) {
            return Ok(None);
        }

        let [acc, gyro, mag] = &mut self.pending;
        let (Some(accelerometer), Some(gyroscope), Some(magnetometer)) =
            (acc.pop_front(), gyro.pop_front(), mag.pop_front())
        else {
            return Ok(None);
        };

        let triple = AlignedTriple {
            index: self.next_index,
            accelerometer,
            gyroscope,
            magnetometer,
        };
        self.next_index += 1;
        Ok(Some(triple))
    }

    /// Unmatched samples currently held for `sensor`.
    pub fn pending(&self, sensor: SensorKind) -> usize {
        self.pending[sensor.index()].len()
    }

    /// Number of triples emitted so far.
    pub fn aligned_count(&self) -> u64 {
        self.next_index
    }
}

/// Iterator that pulls from three sensor channels and yields aligned triples.
///
/// Ends with `Err(SourceError)` when any source fails or terminates: a
/// transport error ends the stream immediately, a closed source ends it once
/// its remaining samples have been paired. A stop flag ends it with `None`.
pub struct SyncedStream<'a> {
    receivers: [&'a Receiver<SourceMessage<Sample>>; 3],
    synchronizer: StreamSynchronizer,
    closed: [bool; 3],
    running: Option<Arc<AtomicBool>>,
    received: u64,
    finished: bool,
}

impl<'a> SyncedStream<'a> {
    /// Build from receivers given in accelerometer, gyroscope, magnetometer order.
    pub fn new(receivers: [&'a Receiver<SourceMessage<Sample>>; 3], backlog_capacity: usize) -> Self {
        Self {
            receivers,
            synchronizer: StreamSynchronizer::new(backlog_capacity),
            closed: [false; 3],
            running: None,
            received: 0,
            finished: false,
        }
    }

    /// Build from subscriptions in alignment order.
    pub fn from_subscriptions(subscriptions: &'a [Subscription<Sample>; 3], backlog_capacity: usize) -> Self {
        let [acc, gyro, mag] = subscriptions;
        Self::new(
            [acc.receiver(), gyro.receiver(), mag.receiver()],
            backlog_capacity,
        )
    }

    /// Stop yielding once `running` is cleared.
    pub fn with_stop_flag(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = Some(running);
        self
    }

    /// Triples yielded so far.
    pub fn aligned_count(&self) -> u64 {
        self.synchronizer.aligned_count()
    }

    /// Samples received across all three sources.
    pub fn received_count(&self) -> u64 {
        self.received
    }

    fn stop_requested(&self) -> bool {
        self.running
            .as_ref()
            .map_or(false, |r| !r.load(Ordering::SeqCst))
    }

    fn finish(&mut self, error: SourceError) -> Option<Result<AlignedTriple, SourceError>> {
        self.finished = true;
        Some(Err(error))
    }
}

impl Iterator for SyncedStream<'_> {
    type Item = Result<AlignedTriple, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            if self.stop_requested() {
                self.finished = true;
                return None;
            }

            // A closed source with nothing buffered can never complete another triple.
            if let Some(sensor) = SensorKind::ALL
                .into_iter()
                .find(|s| self.closed[s.index()] && self.synchronizer.pending(*s) == 0)
            {
                return self.finish(SourceError::terminated(sensor));
            }

            let mut select = Select::new();
            let mut slots: Vec<(usize, SensorKind)> = Vec::with_capacity(3);
            for sensor in SensorKind::ALL {
                if !self.closed[sensor.index()] && self.synchronizer.accepts(sensor) {
                    let slot = select.recv(self.receivers[sensor.index()]);
                    slots.push((slot, sensor));
                }
            }

            if slots.is_empty() {
                let sensor = SensorKind::ALL
                    .into_iter()
                    .find(|s| self.closed[s.index()])
                    .unwrap_or(SensorKind::Accelerometer);
                return self.finish(SourceError::terminated(sensor));
            }

            let operation = match select.select_timeout(POLL_INTERVAL) {
                Ok(operation) => operation,
                Err(_) => continue,
            };
            let Some(&(_, sensor)) = slots.iter().find(|(slot, _)| *slot == operation.index()) else {
                continue;
            };

            match operation.recv(self.receivers[sensor.index()]) {
                Ok(Ok(sample)) => {
                    self.received += 1;
                    match self.synchronizer.push(sensor, sample) {
                        Ok(Some(triple)) => return Some(Ok(triple)),
                        Ok(None) => {}
                        Err(full) => {
                            return self.finish(SourceError::transport(sensor, full.to_string()));
                        }
                    }
                }
                Ok(Err(error)) => return self.finish(error),
                Err(_) => {
                    tracing::debug!(%sensor, "sensor channel closed");
                    self.closed[sensor.index()] = true;
                }
            }
        }
    }
}
