//! Replays a recording file as three sensor streams.

use crate::collector::subscription::{Emitter, Subscription};
use crate::collector::types::{Sample, SensorKind, SourceError};
use crate::collector::SensorSource;
use crate::recording::{read_recording, RecordedRow};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sensor source backed by previously recorded rows.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    rows: Arc<Vec<RecordedRow>>,
    paced: bool,
    capacity: usize,
}

impl ReplaySource {
    /// Load a recording from disk.
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let rows = read_recording(path).map_err(|e| SourceError::unavailable("replay", e.to_string()))?;
        Ok(Self::from_rows(rows))
    }

    /// Replay rows already in memory.
    pub fn from_rows(rows: Vec<RecordedRow>) -> Self {
        Self {
            rows: Arc::new(rows),
            paced: false,
            capacity: 256,
        }
    }

    /// Emit at the subscribed rate instead of as fast as possible.
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    /// Number of rows available per stream.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn sample_for(row: &RecordedRow, sensor: SensorKind) -> Sample {
    match sensor {
        SensorKind::Accelerometer => row.accelerometer,
        SensorKind::Gyroscope => row.gyroscope,
        SensorKind::Magnetometer => row.magnetometer,
    }
}

impl SensorSource for ReplaySource {
    fn subscribe(&self, sensor: SensorKind, rate_hz: u32) -> Result<Subscription<Sample>, SourceError> {
        let rows = self.rows.clone();
        let interval = (self.paced && rate_hz > 0).then(|| Duration::from_secs_f64(1.0 / f64::from(rate_hz)));

        Subscription::spawn(
            format!("replay-{sensor}"),
            self.capacity,
            move |emitter: Emitter<Sample>| {
                let started = Instant::now();
                for (index, row) in rows.iter().enumerate() {
                    if let Some(interval) = interval {
                        let due = interval * index as u32;
                        if let Some(wait) = due.checked_sub(started.elapsed()) {
                            std::thread::sleep(wait);
                        }
                    }
                    if !emitter.emit(sample_for(row, sensor)) {
                        return;
                    }
                }
            },
        )
    }
}
