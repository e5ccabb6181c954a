//! Classifier gateway and the shared latest-prediction state.
//!
//! The model is opaque: anything implementing [`Classifier`] maps a feature
//! vector to a probability in `[0, 1]`. The gateway validates input and
//! output, and publishes successful scores to a [`SharedPrediction`] that
//! the alert gate and UI readers consult. Failed calls leave the previous
//! score in place.

use crate::core::features::{Channel, FeatureVector, CHANNEL_COUNT};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

/// Number of predictions kept for history readers (one minute at 1 Hz).
pub const PREDICTION_HISTORY_LEN: usize = 60;

/// Latest classifier output, or the "no prediction yet" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PredictionScore(f64);

impl PredictionScore {
    /// Sentinel meaning no window has been scored yet.
    pub const NONE: PredictionScore = PredictionScore(-1.0);

    /// Wrap a probability. Values outside `[0, 1]` are rejected.
    pub fn new(value: f64) -> Option<Self> {
        (0.0..=1.0).contains(&value).then_some(Self(value))
    }

    /// Raw value, `-1.0` when absent.
    pub fn raw(self) -> f64 {
        self.0
    }

    pub fn value(self) -> Option<f64> {
        (self.0 >= 0.0).then_some(self.0)
    }

    pub fn is_available(self) -> bool {
        self.0 >= 0.0
    }

    /// Strictly above `threshold`; never true for the sentinel.
    pub fn exceeds(self, threshold: f64) -> bool {
        self.is_available() && self.0 > threshold
    }

    /// Whether readers should show the user as distracted.
    pub fn is_distracted(self, threshold: f64) -> bool {
        self.exceeds(threshold)
    }

    /// Display label used by readers.
    pub fn label(self, threshold: f64) -> &'static str {
        if !self.is_available() {
            "No prediction"
        } else if self.is_distracted(threshold) {
            "Distracted"
        } else {
            "Idle"
        }
    }
}

impl Default for PredictionScore {
    fn default() -> Self {
        Self::NONE
    }
}

impl std::fmt::Display for PredictionScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.value() {
            Some(v) => write!(f, "{v:.3}"),
            None => write!(f, "n/a"),
        }
    }
}

/// A published prediction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub at: DateTime<Utc>,
    pub window_sequence: u64,
    pub score: PredictionScore,
}

#[derive(Debug, Default)]
struct PredictionInner {
    latest: PredictionScore,
    history: VecDeque<PredictionRecord>,
}

/// Latest score plus a short history. Written only by the classifier gateway.
#[derive(Debug, Default)]
pub struct PredictionState {
    inner: RwLock<PredictionInner>,
}

/// Thread-safe shared prediction state.
pub type SharedPrediction = Arc<PredictionState>;

/// Create an empty shared prediction state.
pub fn create_shared_prediction() -> SharedPrediction {
    Arc::new(PredictionState::default())
}

impl PredictionState {
    pub fn latest(&self) -> PredictionScore {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .latest
    }

    /// Oldest-first copy of the retained history.
    pub fn history(&self) -> Vec<PredictionRecord> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .history
            .iter()
            .cloned()
            .collect()
    }

    fn publish(&self, score: PredictionScore, window_sequence: u64) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.latest = score;
        inner.history.push_back(PredictionRecord {
            at: Utc::now(),
            window_sequence,
            score,
        });
        while inner.history.len() > PREDICTION_HISTORY_LEN {
            inner.history.pop_front();
        }
    }
}

/// Execution constraints passed to the classifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InferenceOptions {
    /// Restrict inference to the CPU (background execution contexts)
    pub cpu_only: bool,
}

/// Classifier call failures.
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceError {
    /// The vector does not have the length the model expects
    MalformedInput { expected: usize, actual: usize },
    /// The model returned something that is not a probability
    InvalidOutput(f64),
    /// The model requires an accelerator but CPU-only execution was requested
    AcceleratorRequired,
    /// Memory or compute resources were exhausted
    ResourceExhausted(String),
    /// Any other model failure
    Model(String),
}

impl std::fmt::Display for InferenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InferenceError::MalformedInput { expected, actual } => {
                write!(f, "Malformed input: expected {expected} values, got {actual}")
            }
            InferenceError::InvalidOutput(v) => write!(f, "Invalid model output: {v}"),
            InferenceError::AcceleratorRequired => {
                write!(f, "Model requires an accelerator but CPU-only inference was requested")
            }
            InferenceError::ResourceExhausted(msg) => write!(f, "Resources exhausted: {msg}"),
            InferenceError::Model(msg) => write!(f, "Model error: {msg}"),
        }
    }
}

impl std::error::Error for InferenceError {}

/// An opaque scoring function over feature vectors.
pub trait Classifier: Send {
    /// Probability that the window shows the device in active use.
    fn score(&self, input: &FeatureVector, options: &InferenceOptions) -> Result<f64, InferenceError>;

    /// Whether the model cannot run on the CPU alone.
    fn requires_accelerator(&self) -> bool {
        false
    }
}

impl<F> Classifier for F
where
    F: Fn(&FeatureVector) -> Result<f64, InferenceError> + Send,
{
    fn score(&self, input: &FeatureVector, _options: &InferenceOptions) -> Result<f64, InferenceError> {
        self(input)
    }
}

/// Runs the classifier and publishes successful scores.
pub struct ClassifierGateway {
    classifier: Box<dyn Classifier>,
    state: SharedPrediction,
    options: InferenceOptions,
    window_size: usize,
}

impl ClassifierGateway {
    pub fn new(
        classifier: Box<dyn Classifier>,
        state: SharedPrediction,
        window_size: usize,
        background_safe: bool,
    ) -> Self {
        Self {
            classifier,
            state,
            options: InferenceOptions {
                cpu_only: background_safe,
            },
            window_size,
        }
    }

    /// Score a vector. On success the shared state holds the returned score;
    /// on failure it is left untouched.
    pub fn predict(&self, vector: &FeatureVector) -> Result<PredictionScore, InferenceError> {
        let expected = CHANNEL_COUNT * self.window_size;
        if vector.len() != expected {
            return Err(InferenceError::MalformedInput {
                expected,
                actual: vector.len(),
            });
        }
        if self.options.cpu_only && self.classifier.requires_accelerator() {
            return Err(InferenceError::AcceleratorRequired);
        }

        let raw = self.classifier.score(vector, &self.options)?;
        let score = PredictionScore::new(raw).ok_or(InferenceError::InvalidOutput(raw))?;

        self.state.publish(score, vector.sequence());
        Ok(score)
    }

    /// Shared state this gateway writes to.
    pub fn state(&self) -> &SharedPrediction {
        &self.state
    }

    pub fn options(&self) -> InferenceOptions {
        self.options
    }
}

/// CPU-only heuristic model.
///
/// A handheld device rotates restlessly while gravity stays steady; a device
/// in a pocket bounces with the gait but barely rotates. The score is a
/// logistic over the spread of gyroscope and accelerometer magnitudes.
#[derive(Debug, Clone)]
pub struct MotionVarianceClassifier {
    rotation_weight: f64,
    rotation_center: f64,
    bounce_weight: f64,
    bounce_center: f64,
}

impl MotionVarianceClassifier {
    pub fn new() -> Self {
        Self {
            rotation_weight: 12.0,
            rotation_center: 0.08,
            bounce_weight: 6.0,
            bounce_center: 0.15,
        }
    }
}

impl Default for MotionVarianceClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-position magnitude of a three-channel sensor block.
fn magnitudes(input: &FeatureVector, axes: [Channel; 3]) -> Vec<f64> {
    let [x, y, z] = axes.map(|c| input.channel(c));
    x.iter()
        .zip(y)
        .zip(z)
        .map(|((x, y), z)| (x * x + y * y + z * z).sqrt())
        .collect()
}

impl Classifier for MotionVarianceClassifier {
    fn score(&self, input: &FeatureVector, _options: &InferenceOptions) -> Result<f64, InferenceError> {
        if !input.is_well_formed() || input.window_size() < 2 {
            return Err(InferenceError::MalformedInput {
                expected: CHANNEL_COUNT * input.window_size().max(2),
                actual: input.len(),
            });
        }

        let rotation = magnitudes(input, [Channel::GyroX, Channel::GyroY, Channel::GyroZ]).std_dev();
        let bounce = magnitudes(input, [Channel::AccX, Channel::AccY, Channel::AccZ]).std_dev();
        if !rotation.is_finite() || !bounce.is_finite() {
            return Err(InferenceError::Model("non-finite sensor values".to_string()));
        }

        let z = self.rotation_weight * (rotation - self.rotation_center)
            - self.bounce_weight * (bounce - self.bounce_center);
        Ok(1.0 / (1.0 + (-z).exp()))
    }
}
