//! End-to-end pipeline: sensors to windows to predictions to alerts.
//!
//! Three worker threads share state through [`SharedPrediction`] and
//! [`SharedStats`]:
//!
//! - **ingest** aligns the sensor streams, records triples to the optional
//!   log sink and groups them into windows;
//! - **inference** builds feature vectors from queued windows and runs the
//!   classifier gateway;
//! - **alert** evaluates proximity events against the latest prediction.
//!
//! Ingest never waits on inference: windows go through a bounded queue that
//! drops the oldest entry when full.

use crate::collector::{
    ProximityEvent, ProximitySource, Sample, SensorSource, SourceError, Subscription,
};
use crate::config::Config;
use crate::core::{
    create_shared_prediction, AlertGate, AlertSettings, Classifier, ClassifierGateway,
    FeatureBuilder, GateDecision, SharedPrediction, SyncedStream, WindowAggregator,
    WindowConsumer, WindowProducer, WindowQueue,
};
use crate::notify::Notifier;
use crate::recording::{LogSink, RecordingMode};
use crate::stats::{create_shared_stats, SharedStats};
use crossbeam_channel::RecvTimeoutError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Pipeline components, assembled before [`start`](Pipeline::start).
pub struct Pipeline {
    config: Config,
    classifier: Box<dyn Classifier>,
    notifier: Box<dyn Notifier>,
    log_sink: Option<(Box<dyn LogSink>, RecordingMode)>,
    prediction: SharedPrediction,
    stats: SharedStats,
}

impl Pipeline {
    pub fn new(config: Config, classifier: Box<dyn Classifier>, notifier: Box<dyn Notifier>) -> Self {
        Self {
            config,
            classifier,
            notifier,
            log_sink: None,
            prediction: create_shared_prediction(),
            stats: create_shared_stats(),
        }
    }

    /// Record every aligned triple to `sink`, tagged with `mode`.
    pub fn with_log_sink(mut self, sink: Box<dyn LogSink>, mode: RecordingMode) -> Self {
        self.log_sink = Some((sink, mode));
        self
    }

    /// Use existing (e.g. persisted) stats instead of fresh counters.
    pub fn with_stats(mut self, stats: SharedStats) -> Self {
        self.stats = stats;
        self
    }

    /// Subscribe to the sources and spawn the worker threads.
    ///
    /// Without a proximity source no alert thread runs.
    pub fn start(
        self,
        sensors: &dyn SensorSource,
        proximity: Option<&dyn ProximitySource>,
    ) -> Result<PipelineHandle, SourceError> {
        let Pipeline {
            config,
            classifier,
            notifier,
            log_sink,
            prediction,
            stats,
        } = self;

        let subscriptions = sensors.subscribe_all(config.sample_rate_hz)?;
        let proximity = proximity.map(|source| source.subscribe()).transpose()?;

        let mut handle = PipelineHandle {
            running: Arc::new(AtomicBool::new(true)),
            prediction: prediction.clone(),
            stats: stats.clone(),
            ingest: None,
            inference: None,
            alert: None,
            alert_error: None,
        };

        let (producer, consumer) = WindowQueue::new(config.window_queue_capacity).split();

        let ingest = IngestWorker {
            subscriptions,
            backlog_capacity: config.sensor_backlog_capacity,
            aggregator: WindowAggregator::new(config.window_size),
            producer,
            log_sink,
            stats: stats.clone(),
            running: handle.running.clone(),
        };
        handle.ingest = Some(spawn("ingest", move || ingest.run())?);

        let inference = InferenceWorker {
            consumer,
            builder: FeatureBuilder::new(config.window_size),
            gateway: ClassifierGateway::new(
                classifier,
                prediction.clone(),
                config.window_size,
                config.background_safe_inference,
            ),
            stats: stats.clone(),
            running: handle.running.clone(),
        };
        handle.inference = Some(spawn("inference", move || inference.run())?);

        if let Some(subscription) = proximity {
            let alert = AlertWorker {
                subscription,
                gate: AlertGate::new(AlertSettings::from_config(&config), notifier),
                prediction,
                stats,
                running: handle.running.clone(),
            };
            handle.alert = Some(spawn("alert", move || alert.run())?);
        }

        tracing::info!(
            window_size = config.window_size,
            sample_rate_hz = config.sample_rate_hz,
            alerts = handle.alert.is_some(),
            "pipeline started"
        );
        Ok(handle)
    }
}

fn spawn<T, F>(name: &str, work: F) -> Result<JoinHandle<T>, SourceError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    thread::Builder::new()
        .name(format!("pipeline-{name}"))
        .spawn(work)
        .map_err(|e| SourceError::unavailable("pipeline", e.to_string()))
}

/// Running pipeline. Dropping the handle stops it.
pub struct PipelineHandle {
    running: Arc<AtomicBool>,
    prediction: SharedPrediction,
    stats: SharedStats,
    ingest: Option<JoinHandle<Option<SourceError>>>,
    inference: Option<JoinHandle<()>>,
    alert: Option<JoinHandle<Option<SourceError>>>,
    alert_error: Option<SourceError>,
}

impl PipelineHandle {
    /// Latest prediction and history.
    pub fn prediction(&self) -> &SharedPrediction {
        &self.prediction
    }

    pub fn stats(&self) -> &SharedStats {
        &self.stats
    }

    /// Whether the sensor streams are still being consumed.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
            && self.ingest.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Whether proximity events are still being evaluated.
    pub fn alerts_active(&self) -> bool {
        self.alert.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Error that ended the proximity stream, once the alert thread has
    /// stopped because of it. Sensor ingest and inference keep running.
    pub fn alert_error(&mut self) -> Option<SourceError> {
        if self.alert.as_ref().is_some_and(JoinHandle::is_finished) {
            self.join_alert();
        }
        self.alert_error.clone()
    }

    /// Wait for the sensor streams to end and queued windows to be scored,
    /// then stop the alert thread.
    ///
    /// Returns the error that terminated the sensor streams, if any. A
    /// proximity failure is available from [`alert_error`](Self::alert_error).
    pub fn wait(&mut self) -> Option<SourceError> {
        let error = join(self.ingest.take(), "ingest");
        join(self.inference.take(), "inference");
        self.running.store(false, Ordering::SeqCst);
        self.join_alert();
        error
    }

    /// Stop all threads and release the sources.
    pub fn stop(&mut self) -> Option<SourceError> {
        self.running.store(false, Ordering::SeqCst);
        let error = join(self.ingest.take(), "ingest");
        join(self.inference.take(), "inference");
        self.join_alert();
        error
    }

    fn join_alert(&mut self) {
        if let Some(error) = join(self.alert.take(), "alert") {
            self.alert_error = Some(error);
        }
    }
}

/// Join a worker, folding a panic into `None`.
fn join<T: Default>(handle: Option<JoinHandle<T>>, name: &str) -> T {
    match handle.map(JoinHandle::join) {
        Some(Ok(outcome)) => outcome,
        Some(Err(_)) => {
            tracing::error!(thread = name, "pipeline thread panicked");
            T::default()
        }
        None => T::default(),
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

struct IngestWorker {
    subscriptions: [Subscription<Sample>; 3],
    backlog_capacity: usize,
    aggregator: WindowAggregator,
    producer: WindowProducer,
    log_sink: Option<(Box<dyn LogSink>, RecordingMode)>,
    stats: SharedStats,
    running: Arc<AtomicBool>,
}

impl IngestWorker {
    fn run(mut self) -> Option<SourceError> {
        let mut stream = SyncedStream::from_subscriptions(&self.subscriptions, self.backlog_capacity)
            .with_stop_flag(self.running.clone());
        let mut counted = 0;
        let mut outcome = None;

        while let Some(item) = stream.next() {
            let received = stream.received_count();
            self.stats.record_samples(received - counted);
            counted = received;

            let triple = match item {
                Ok(triple) => triple,
                Err(error) => {
                    tracing::error!(%error, "sensor stream ended");
                    outcome = Some(error);
                    break;
                }
            };
            self.stats.record_triple();

            if let Some((sink, mode)) = self.log_sink.as_mut() {
                if let Err(e) = sink.record(&triple, *mode) {
                    tracing::warn!(error = %e, "recording failed, disabling log sink");
                    self.log_sink = None;
                }
            }

            if let Some(window) = self.aggregator.push(triple) {
                self.stats.record_window_completed();
                tracing::debug!(sequence = window.sequence(), "window completed");
                if let Some(evicted) = self.producer.push(window) {
                    self.stats.record_window_dropped();
                    tracing::debug!(sequence = evicted.sequence(), "inference behind, dropped oldest window");
                }
            }
        }
        drop(stream);

        let discarded = self.aggregator.discard_partial();
        if discarded > 0 {
            tracing::debug!(discarded, "discarded partial window");
        }
        if let Some((mut sink, _)) = self.log_sink.take() {
            if let Err(e) = sink.flush() {
                tracing::warn!(error = %e, "failed to flush recording");
            }
        }
        tracing::info!(
            windows = self.aggregator.completed_window_count(),
            "ingest stopped"
        );
        outcome
    }
}

struct InferenceWorker {
    consumer: WindowConsumer,
    builder: FeatureBuilder,
    gateway: ClassifierGateway,
    stats: SharedStats,
    running: Arc<AtomicBool>,
}

impl InferenceWorker {
    fn run(self) {
        while self.running.load(Ordering::SeqCst) {
            let window = match self.consumer.recv_timeout(POLL_INTERVAL) {
                Ok(window) => window,
                Err(true) => break,
                Err(false) => continue,
            };

            let vector = match self.builder.build(&window) {
                Ok(vector) => vector,
                Err(e) => {
                    self.stats.record_shape_error();
                    tracing::warn!(error = %e, sequence = window.sequence(), "skipping window");
                    continue;
                }
            };

            match self.gateway.predict(&vector) {
                Ok(score) => {
                    self.stats.record_prediction();
                    tracing::debug!(sequence = window.sequence(), %score, "window scored");
                }
                Err(e) => {
                    self.stats.record_inference_failure();
                    tracing::warn!(error = %e, sequence = window.sequence(), "inference failed");
                }
            }
        }
    }
}

struct AlertWorker {
    subscription: Subscription<ProximityEvent>,
    gate: AlertGate,
    prediction: SharedPrediction,
    stats: SharedStats,
    running: Arc<AtomicBool>,
}

impl AlertWorker {
    fn run(mut self) -> Option<SourceError> {
        let mut outcome = None;
        while self.running.load(Ordering::SeqCst) {
            let event = match self.subscription.receiver().recv_timeout(POLL_INTERVAL) {
                Ok(Ok(event)) => event,
                Ok(Err(error)) => {
                    tracing::error!(%error, "proximity source failed, alerts disabled");
                    outcome = Some(error);
                    break;
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    let error = SourceError::terminated(self.subscription.name());
                    tracing::warn!(%error, "proximity source closed, alerts disabled");
                    outcome = Some(error);
                    break;
                }
            };
            self.stats.record_proximity_event();

            match self.gate.evaluate(&event, self.prediction.latest()) {
                GateDecision::Fired { dispatch } => {
                    self.stats.record_alert_fired();
                    if dispatch.is_err() {
                        self.stats.record_dispatch_failure();
                    }
                }
                decision => tracing::trace!(?decision, "proximity event ignored"),
            }
        }
        self.subscription.unsubscribe();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{MotionProfile, SimulatedSensorSource};
    use crate::core::{FeatureVector, InferenceError};
    use crate::notify::MemoryNotifier;

    fn config(window_size: usize) -> Config {
        Config {
            window_size,
            ..Config::default()
        }
    }

    #[test]
    fn test_finite_stream_scores_every_full_window() {
        let sensors = SimulatedSensorSource::new(MotionProfile::Hands)
            .with_limit(25)
            .paced(false);
        let pipeline = Pipeline::new(
            config(10),
            Box::new(|_: &FeatureVector| -> Result<f64, InferenceError> { Ok(0.9) }),
            Box::new(MemoryNotifier::new()),
        );

        let mut handle = pipeline.start(&sensors, None).unwrap();
        let stats = handle.stats().clone();
        let prediction = handle.prediction().clone();
        let error = handle.wait();

        assert!(matches!(error, Some(SourceError::Terminated { .. })));
        let snapshot = stats.stats();
        assert_eq!(snapshot.samples, 75);
        assert_eq!(snapshot.triples, 25);
        assert_eq!(snapshot.windows_completed, 2);
        assert_eq!(
            snapshot.predictions + snapshot.windows_dropped,
            snapshot.windows_completed
        );
        assert_eq!(prediction.latest().value(), Some(0.9));
    }

    #[test]
    fn test_stop_releases_endless_sources() {
        let sensors = SimulatedSensorSource::new(MotionProfile::Pocket).paced(false);
        let pipeline = Pipeline::new(
            config(50),
            Box::new(crate::core::MotionVarianceClassifier::new()),
            Box::new(MemoryNotifier::new()),
        );

        let mut handle = pipeline.start(&sensors, None).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(handle.stop().is_none());
        assert!(!handle.is_running());
        assert!(handle.alert_error().is_none());
    }

    #[test]
    fn test_proximity_failure_reaches_handle() {
        let sensors = SimulatedSensorSource::new(MotionProfile::Hands).paced(false);
        let (feeder, proximity) = crate::collector::ChannelProximitySource::new(4);
        let pipeline = Pipeline::new(
            config(50),
            Box::new(|_: &FeatureVector| -> Result<f64, InferenceError> { Ok(0.9) }),
            Box::new(MemoryNotifier::new()),
        );

        let mut handle = pipeline.start(&sensors, Some(&proximity)).unwrap();
        assert!(feeder.fail(SourceError::transport("beacon", "radio off")));

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while handle.alerts_active() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }

        assert!(!handle.alerts_active());
        assert!(handle.is_running());
        assert_eq!(
            handle.alert_error(),
            Some(SourceError::transport("beacon", "radio off"))
        );
        // The subscription is gone, so the feeder is disconnected.
        assert!(!feeder.fail(SourceError::transport("beacon", "again")));

        handle.stop();
        assert_eq!(
            handle.alert_error(),
            Some(SourceError::transport("beacon", "radio off"))
        );
    }
}
