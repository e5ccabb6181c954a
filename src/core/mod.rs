//! Core pipeline stages.
//!
//! This module contains:
//! - Ordinal alignment of the three motion streams
//! - Count-driven tumbling windows and the drop-oldest window queue
//! - Channel-major feature vector construction
//! - The classifier gateway and shared prediction state
//! - The proximity alert gate

pub mod alert;
pub mod classifier;
pub mod features;
pub mod sync;
pub mod windowing;

// Re-export commonly used types
pub use alert::{AlertGate, AlertSettings, GateDecision, ProximityThrottle};
pub use classifier::{
    create_shared_prediction, Classifier, ClassifierGateway, InferenceError, InferenceOptions,
    MotionVarianceClassifier, PredictionRecord, PredictionScore, PredictionState,
    SharedPrediction, PREDICTION_HISTORY_LEN,
};
pub use features::{build_feature_vector, Channel, FeatureBuilder, FeatureVector, ShapeError, CHANNEL_COUNT};
pub use sync::{AlignedTriple, BacklogFull, StreamSynchronizer, SyncedStream};
pub use windowing::{Window, WindowAggregator, WindowConsumer, WindowProducer, WindowQueue};
