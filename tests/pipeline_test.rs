//! End-to-end tests for the motion alert pipeline

use motion_alert_agent::collector::{
    ChannelProximitySource, Emitter, MotionProfile, ProximityEvent, ProximityLevel, ReplaySource,
    Sample, SensorKind, SensorSource, SimulatedSensorSource, SourceError, Subscription,
};
use motion_alert_agent::config::Config;
use motion_alert_agent::core::{FeatureVector, InferenceError, PredictionScore};
use motion_alert_agent::notify::MemoryNotifier;
use motion_alert_agent::pipeline::Pipeline;
use motion_alert_agent::recording::{read_recording, CsvRecorder, RecordingMode};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

fn test_config(window_size: usize) -> Config {
    Config {
        window_size,
        beacon_uuid: None,
        ..Config::default()
    }
}

fn finite_sensors(samples: usize) -> SimulatedSensorSource {
    SimulatedSensorSource::new(MotionProfile::Hands)
        .with_limit(samples)
        .paced(false)
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn test_hundred_samples_make_two_full_windows() {
    let lengths = Arc::new(Mutex::new(Vec::new()));
    let seen = lengths.clone();
    let classifier = move |v: &FeatureVector| -> Result<f64, InferenceError> {
        seen.lock().unwrap().push(v.len());
        Ok(0.6)
    };

    let mut handle = Pipeline::new(
        test_config(50),
        Box::new(classifier),
        Box::new(MemoryNotifier::new()),
    )
    .start(&finite_sensors(100), None)
    .expect("pipeline starts");
    let stats = handle.stats().clone();
    let error = handle.wait();

    assert!(matches!(error, Some(SourceError::Terminated { .. })));
    assert_eq!(*lengths.lock().unwrap(), vec![450, 450]);
    let snapshot = stats.stats();
    assert_eq!(snapshot.triples, 100);
    assert_eq!(snapshot.windows_completed, 2);
    assert_eq!(snapshot.predictions, 2);
}

#[test]
fn test_inference_failure_keeps_previous_score() {
    let classifier = |v: &FeatureVector| -> Result<f64, InferenceError> {
        match v.sequence() {
            0 => Ok(0.8),
            _ => Err(InferenceError::ResourceExhausted("out of memory".to_string())),
        }
    };

    let mut handle = Pipeline::new(
        test_config(50),
        Box::new(classifier),
        Box::new(MemoryNotifier::new()),
    )
    .start(&finite_sensors(100), None)
    .expect("pipeline starts");
    let prediction = handle.prediction().clone();
    let stats = handle.stats().clone();
    handle.wait();

    assert_eq!(prediction.latest(), PredictionScore::new(0.8).unwrap());
    assert_eq!(prediction.history().len(), 1);
    assert_eq!(stats.stats().inference_failures, 1);
}

#[test]
fn test_near_beacon_while_distracted_alerts_once() {
    let notifier = MemoryNotifier::new();
    let (feeder, proximity) = ChannelProximitySource::new(16);

    let mut handle = Pipeline::new(
        test_config(50),
        Box::new(|_: &FeatureVector| -> Result<f64, InferenceError> { Ok(0.7) }),
        Box::new(notifier.clone()),
    )
    .start(&finite_sensors(100), Some(&proximity))
    .expect("pipeline starts");

    let prediction = handle.prediction().clone();
    assert!(wait_until(Duration::from_secs(5), || prediction
        .latest()
        .is_available()));

    let beacon = Uuid::new_v4();
    assert!(feeder.push(ProximityEvent::new(beacon, ProximityLevel::Near, 5)));
    assert!(feeder.push(ProximityEvent::new(beacon, ProximityLevel::Near, 5)));

    let stats = handle.stats().clone();
    assert!(wait_until(Duration::from_secs(5), || stats
        .stats()
        .proximity_events
        == 2));
    handle.wait();

    assert_eq!(notifier.sent().len(), 1);
    assert_eq!(notifier.sent()[0].body, "You are crossing the road!");
    assert_eq!(stats.stats().alerts_fired, 1);
}

#[test]
fn test_no_alert_before_first_prediction() {
    let notifier = MemoryNotifier::new();
    let (feeder, proximity) = ChannelProximitySource::new(16);

    // Endless paced sensors: the first window needs a full second at 50 Hz.
    let sensors = SimulatedSensorSource::new(MotionProfile::Hands);
    let mut handle = Pipeline::new(
        test_config(50),
        Box::new(|_: &FeatureVector| -> Result<f64, InferenceError> { Ok(0.99) }),
        Box::new(notifier.clone()),
    )
    .start(&sensors, Some(&proximity))
    .expect("pipeline starts");

    assert!(feeder.push(ProximityEvent::new(Uuid::nil(), ProximityLevel::Immediate, -40)));
    let stats = handle.stats().clone();
    assert!(wait_until(Duration::from_secs(2), || stats
        .stats()
        .proximity_events
        == 1));
    handle.stop();

    assert!(notifier.sent().is_empty());
}

#[test]
fn test_recording_replays_into_same_windows() {
    let dir = std::env::temp_dir().join(format!("motion-alert-recording-{}", Uuid::new_v4()));
    let recorder =
        CsvRecorder::create(&dir, RecordingMode::Hands, chrono_tz::UTC).expect("recorder");
    let path = recorder.path().to_path_buf();

    let mut handle = Pipeline::new(
        test_config(20),
        Box::new(|_: &FeatureVector| -> Result<f64, InferenceError> { Ok(0.5) }),
        Box::new(MemoryNotifier::new()),
    )
    .with_log_sink(Box::new(recorder), RecordingMode::Hands)
    .start(&finite_sensors(45), None)
    .expect("pipeline starts");
    handle.wait();

    let rows = read_recording(&path).expect("recording readable");
    assert_eq!(rows.len(), 45);
    assert!(rows.iter().all(|r| r.mode == RecordingMode::Hands));

    let replay = ReplaySource::open(&path).expect("replay opens");
    let mut handle = Pipeline::new(
        test_config(20),
        Box::new(|_: &FeatureVector| -> Result<f64, InferenceError> { Ok(0.5) }),
        Box::new(MemoryNotifier::new()),
    )
    .start(&replay, None)
    .expect("pipeline starts");
    let stats = handle.stats().clone();
    handle.wait();

    assert_eq!(stats.stats().windows_completed, 2);
    let _ = std::fs::remove_dir_all(dir);
}

/// Gyroscope fails after a few samples; the others keep going.
struct FlakyGyroscope;

impl SensorSource for FlakyGyroscope {
    fn subscribe(&self, sensor: SensorKind, _rate_hz: u32) -> Result<Subscription<Sample>, SourceError> {
        Subscription::spawn(sensor.to_string(), 16, move |emitter: Emitter<Sample>| {
            for i in 0..1000 {
                if sensor == SensorKind::Gyroscope && i == 10 {
                    emitter.fail(SourceError::transport(sensor, "bus reset"));
                    return;
                }
                if !emitter.emit(Sample::new(i as f64 * 0.02, 0.0, 0.0, 1.0)) {
                    return;
                }
            }
        })
    }
}

#[test]
fn test_source_failure_terminates_pipeline() {
    let mut handle = Pipeline::new(
        test_config(5),
        Box::new(|_: &FeatureVector| -> Result<f64, InferenceError> { Ok(0.1) }),
        Box::new(MemoryNotifier::new()),
    )
    .start(&FlakyGyroscope, None)
    .expect("pipeline starts");

    match handle.wait() {
        Some(SourceError::Transport { message, .. }) => assert_eq!(message, "bus reset"),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn test_slow_classifier_drops_oldest_windows() {
    let config = Config {
        window_queue_capacity: 1,
        ..test_config(5)
    };
    let classifier = |_: &FeatureVector| -> Result<f64, InferenceError> {
        std::thread::sleep(Duration::from_millis(200));
        Ok(0.2)
    };

    let mut handle = Pipeline::new(config, Box::new(classifier), Box::new(MemoryNotifier::new()))
        .start(&finite_sensors(200), None)
        .expect("pipeline starts");
    let stats = handle.stats().clone();
    handle.wait();

    let snapshot = stats.stats();
    assert_eq!(snapshot.windows_completed, 40);
    assert!(snapshot.windows_dropped > 0);
    assert_eq!(
        snapshot.predictions + snapshot.windows_dropped,
        snapshot.windows_completed
    );
}
