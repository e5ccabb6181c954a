//! Motion Alert Agent - distraction detection from motion sensors.
//!
//! This library aligns accelerometer, gyroscope and magnetometer streams,
//! scores fixed-size windows with a pluggable classifier, and fires a
//! one-shot alert when a nearby beacon is detected while the user appears
//! to be using their device.
//!
//! # Guarantees
//!
//! - **Ordinal alignment**: the k-th samples of the three sensors always
//!   form the k-th triple
//! - **Exact windows**: every classified window holds exactly `W` triples
//! - **Bounded memory**: sensor backlogs and the window queue are capped
//! - **At most one alert** per throttle interval
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                      Motion Alert Agent                       │
//! ├───────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐          │
//! │  │   Sensors   │──▶│ Synchronizer│──▶│  Windowing  │──┐       │
//! │  │ acc/gyr/mag │   │  (ordinal)  │   │ (W triples) │  │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘  │       │
//! │                           │            drop-oldest ▼ queue    │
//! │                           ▼          ┌─────────────┐          │
//! │                    ┌─────────────┐   │  Features + │          │
//! │                    │  Recording  │   │  Classifier │          │
//! │                    └─────────────┘   └─────────────┘          │
//! │                                             │ prediction      │
//! │  ┌─────────────┐                     ┌─────────────┐          │
//! │  │  Proximity  │────────────────────▶│ Alert Gate  │──▶ notify│
//! │  └─────────────┘                     └─────────────┘          │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use motion_alert_agent::collector::{MotionProfile, SimulatedBeacon, SimulatedSensorSource};
//! use motion_alert_agent::config::{Config, DEFAULT_BEACON_UUID};
//! use motion_alert_agent::core::MotionVarianceClassifier;
//! use motion_alert_agent::notify::ConsoleNotifier;
//! use motion_alert_agent::pipeline::Pipeline;
//! use std::time::Duration;
//!
//! let sensors = SimulatedSensorSource::new(MotionProfile::Hands);
//! let beacon = SimulatedBeacon::new(DEFAULT_BEACON_UUID, Duration::from_secs(1));
//!
//! let handle = Pipeline::new(
//!     Config::default(),
//!     Box::new(MotionVarianceClassifier::new()),
//!     Box::new(ConsoleNotifier),
//! )
//! .start(&sensors, Some(&beacon))
//! .expect("Failed to start pipeline");
//!
//! println!("latest: {}", handle.prediction().latest());
//! ```

pub mod collector;
pub mod config;
pub mod core;
pub mod notify;
pub mod pipeline;
pub mod recording;
pub mod stats;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use collector::{ProximityEvent, ProximityLevel, Sample, SensorKind, SourceError};
pub use config::{Config, ConfigError};
pub use core::{
    AlertGate, AlignedTriple, Classifier, ClassifierGateway, FeatureVector, InferenceError,
    PredictionScore, ShapeError, StreamSynchronizer, Window, WindowAggregator,
};
pub use notify::{ConsoleNotifier, DispatchError, Notifier};
pub use pipeline::{Pipeline, PipelineHandle};
pub use recording::{CsvRecorder, LogSink, RecordingError, RecordingMode};
pub use stats::{PipelineStats, SharedStats, StatsSnapshot};

#[cfg(feature = "webhook")]
pub use notify::{WebhookConfig, WebhookNotifier};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
