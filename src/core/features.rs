//! Feature vector construction from completed windows.
//!
//! A window of `W` triples becomes a flat buffer of `9 * W` values laid out
//! channel-major: all `W` accelerometer x values, then all accelerometer y
//! values, and so on through magnetometer z. The value of channel `c` at
//! position `i` lives at index `i + c * W`.

use crate::collector::types::SensorKind;
use crate::core::sync::AlignedTriple;
use crate::core::windowing::Window;
use serde::{Deserialize, Serialize};

/// Number of channels per aligned triple.
pub const CHANNEL_COUNT: usize = 9;

/// One axis of one sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    AccX,
    AccY,
    AccZ,
    GyroX,
    GyroY,
    GyroZ,
    MagX,
    MagY,
    MagZ,
}

impl Channel {
    /// Channels in feature-vector order.
    pub const ALL: [Channel; CHANNEL_COUNT] = [
        Channel::AccX,
        Channel::AccY,
        Channel::AccZ,
        Channel::GyroX,
        Channel::GyroY,
        Channel::GyroZ,
        Channel::MagX,
        Channel::MagY,
        Channel::MagZ,
    ];

    /// Block index of this channel inside a feature vector.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn sensor(self) -> SensorKind {
        match self {
            Channel::AccX | Channel::AccY | Channel::AccZ => SensorKind::Accelerometer,
            Channel::GyroX | Channel::GyroY | Channel::GyroZ => SensorKind::Gyroscope,
            Channel::MagX | Channel::MagY | Channel::MagZ => SensorKind::Magnetometer,
        }
    }

    /// Read this channel from a triple.
    pub fn value(self, triple: &AlignedTriple) -> f64 {
        let sample = triple.sample(self.sensor());
        match self.index() % 3 {
            0 => sample.x,
            1 => sample.y,
            _ => sample.z,
        }
    }
}

/// Flat classifier input for one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    sequence: u64,
    window_size: usize,
    values: Vec<f64>,
}

impl FeatureVector {
    /// Wrap raw values. Callers are responsible for the layout.
    pub fn from_raw(sequence: u64, window_size: usize, values: Vec<f64>) -> Self {
        Self {
            sequence,
            window_size,
            values,
        }
    }

    /// Sequence number of the source window.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether the buffer has the `9 * W` length the classifier expects.
    pub fn is_well_formed(&self) -> bool {
        self.values.len() == CHANNEL_COUNT * self.window_size
    }

    /// The `W` values of one channel, or an empty slice if malformed.
    pub fn channel(&self, channel: Channel) -> &[f64] {
        let start = channel.index() * self.window_size;
        self.values
            .get(start..start + self.window_size)
            .unwrap_or(&[])
    }

    /// Single-precision copy for models that take `f32` input.
    pub fn to_f32(&self) -> Vec<f32> {
        self.values.iter().map(|&v| v as f32).collect()
    }
}

/// The window handed to the feature builder had the wrong length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeError {
    pub expected: usize,
    pub actual: usize,
}

impl std::fmt::Display for ShapeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Shape error: window has {} triples, expected {}",
            self.actual, self.expected
        )
    }
}

impl std::error::Error for ShapeError {}

/// Builds feature vectors for a fixed window size.
#[derive(Debug, Clone, Copy)]
pub struct FeatureBuilder {
    window_size: usize,
}

impl FeatureBuilder {
    pub fn new(window_size: usize) -> Self {
        Self { window_size }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Length of every vector this builder produces.
    pub fn vector_len(&self) -> usize {
        CHANNEL_COUNT * self.window_size
    }

    pub fn build(&self, window: &Window) -> Result<FeatureVector, ShapeError> {
        build_feature_vector(window, self.window_size)
    }
}

/// Flatten `window` into a channel-major feature vector.
///
/// Fails if the window does not hold exactly `window_size` triples; the
/// input is never truncated or padded.
pub fn build_feature_vector(window: &Window, window_size: usize) -> Result<FeatureVector, ShapeError> {
    if window.len() != window_size {
        return Err(ShapeError {
            expected: window_size,
            actual: window.len(),
        });
    }

    let mut values = vec![0.0; CHANNEL_COUNT * window_size];
    for (i, triple) in window.triples().iter().enumerate() {
        for channel in Channel::ALL {
            values[i + channel.index() * window_size] = channel.value(triple);
        }
    }

    Ok(FeatureVector {
        sequence: window.sequence(),
        window_size,
        values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::types::Sample;

    fn triple(i: u64) -> AlignedTriple {
        let base = i as f64;
        AlignedTriple {
            index: i,
            accelerometer: Sample::new(base, base + 0.1, base + 0.2, base + 0.3),
            gyroscope: Sample::new(base, base + 0.4, base + 0.5, base + 0.6),
            magnetometer: Sample::new(base, base + 0.7, base + 0.8, base + 0.9),
        }
    }

    fn window(len: u64) -> Window {
        Window::from_triples(7, (0..len).map(triple).collect())
    }

    #[test]
    fn test_channel_major_layout() {
        let vector = build_feature_vector(&window(3), 3).unwrap();
        assert_eq!(vector.len(), 27);
        assert!(vector.is_well_formed());
        assert_eq!(vector.sequence(), 7);

        // acc.x block, then acc.y block
        assert_eq!(&vector.as_slice()[0..3], &[0.1, 1.1, 2.1]);
        assert_eq!(&vector.as_slice()[3..6], &[0.2, 1.2, 2.2]);
        // value at position 2 of mag.z lives at 2 + 8 * 3
        assert_eq!(vector.as_slice()[2 + 8 * 3], 2.9);
        assert_eq!(vector.channel(Channel::GyroY), &[0.5, 1.5, 2.5]);
    }

    #[test]
    fn test_default_window_gives_450_values() {
        let vector = FeatureBuilder::new(50).build(&window(50)).unwrap();
        assert_eq!(vector.len(), 450);
        assert_eq!(FeatureBuilder::new(50).vector_len(), 450);
    }

    #[test]
    fn test_wrong_length_is_shape_error() {
        assert_eq!(
            build_feature_vector(&window(49), 50),
            Err(ShapeError {
                expected: 50,
                actual: 49
            })
        );
        assert_eq!(
            build_feature_vector(&window(51), 50),
            Err(ShapeError {
                expected: 50,
                actual: 51
            })
        );
    }

    #[test]
    fn test_build_is_deterministic() {
        let w = window(10);
        let a = build_feature_vector(&w, 10).unwrap();
        let b = build_feature_vector(&w, 10).unwrap();
        let bits = |v: &FeatureVector| v.as_slice().iter().map(|x| x.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&a), bits(&b));
    }

    #[test]
    fn test_channel_sensor_mapping() {
        assert_eq!(Channel::AccZ.sensor(), SensorKind::Accelerometer);
        assert_eq!(Channel::GyroX.sensor(), SensorKind::Gyroscope);
        assert_eq!(Channel::MagY.index(), 7);
    }
}
