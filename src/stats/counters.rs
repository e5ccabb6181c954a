//! Atomic pipeline counters with optional JSON persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for the current session.
#[derive(Debug)]
pub struct PipelineStats {
    /// Sensor samples received across all three streams
    samples: AtomicU64,
    /// Aligned triples produced by the synchronizer
    triples: AtomicU64,
    /// Windows completed by the aggregator
    windows_completed: AtomicU64,
    /// Windows evicted from the full window queue
    windows_dropped: AtomicU64,
    /// Windows rejected by the feature builder
    shape_errors: AtomicU64,
    /// Successful classifier calls
    predictions: AtomicU64,
    /// Failed classifier calls
    inference_failures: AtomicU64,
    /// Proximity events received
    proximity_events: AtomicU64,
    /// Alerts fired by the gate
    alerts_fired: AtomicU64,
    /// Fired alerts whose notification failed
    dispatch_failures: AtomicU64,
    /// Session start time
    session_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

macro_rules! counter {
    ($record:ident, $field:ident) => {
        #[doc = concat!("Increment `", stringify!($field), "`.")]
        pub fn $record(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            samples: AtomicU64::new(0),
            triples: AtomicU64::new(0),
            windows_completed: AtomicU64::new(0),
            windows_dropped: AtomicU64::new(0),
            shape_errors: AtomicU64::new(0),
            predictions: AtomicU64::new(0),
            inference_failures: AtomicU64::new(0),
            proximity_events: AtomicU64::new(0),
            alerts_fired: AtomicU64::new(0),
            dispatch_failures: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create stats that load from and save to `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            tracing::warn!(error = %e, "could not load previous pipeline stats");
        }

        stats
    }

    /// Record `count` samples.
    pub fn record_samples(&self, count: u64) {
        self.samples.fetch_add(count, Ordering::Relaxed);
    }

    counter!(record_triple, triples);
    counter!(record_window_completed, windows_completed);
    counter!(record_window_dropped, windows_dropped);
    counter!(record_shape_error, shape_errors);
    counter!(record_prediction, predictions);
    counter!(record_inference_failure, inference_failures);
    counter!(record_proximity_event, proximity_events);
    counter!(record_alert_fired, alerts_fired);
    counter!(record_dispatch_failure, dispatch_failures);

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            samples: self.samples.load(Ordering::Relaxed),
            triples: self.triples.load(Ordering::Relaxed),
            windows_completed: self.windows_completed.load(Ordering::Relaxed),
            windows_dropped: self.windows_dropped.load(Ordering::Relaxed),
            shape_errors: self.shape_errors.load(Ordering::Relaxed),
            predictions: self.predictions.load(Ordering::Relaxed),
            inference_failures: self.inference_failures.load(Ordering::Relaxed),
            proximity_events: self.proximity_events.load(Ordering::Relaxed),
            alerts_fired: self.alerts_fired.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Session Statistics:\n\
             - Samples received: {}\n\
             - Aligned triples: {}\n\
             - Windows completed: {} ({} dropped, {} malformed)\n\
             - Predictions: {} ({} failed)\n\
             - Proximity events: {}\n\
             - Alerts fired: {} ({} not delivered)\n\
             - Session duration: {} seconds",
            stats.samples,
            stats.triples,
            stats.windows_completed,
            stats.windows_dropped,
            stats.shape_errors,
            stats.predictions,
            stats.inference_failures,
            stats.proximity_events,
            stats.alerts_fired,
            stats.dispatch_failures,
            stats.session_duration_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let persisted = PersistedStats {
                counters: self.stats(),
                last_updated: Utc::now(),
            };
            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;
                self.store(&persisted.counters);
            }
        }
        Ok(())
    }

    fn store(&self, s: &StatsSnapshot) {
        self.samples.store(s.samples, Ordering::Relaxed);
        self.triples.store(s.triples, Ordering::Relaxed);
        self.windows_completed.store(s.windows_completed, Ordering::Relaxed);
        self.windows_dropped.store(s.windows_dropped, Ordering::Relaxed);
        self.shape_errors.store(s.shape_errors, Ordering::Relaxed);
        self.predictions.store(s.predictions, Ordering::Relaxed);
        self.inference_failures.store(s.inference_failures, Ordering::Relaxed);
        self.proximity_events.store(s.proximity_events, Ordering::Relaxed);
        self.alerts_fired.store(s.alerts_fired, Ordering::Relaxed);
        self.dispatch_failures.store(s.dispatch_failures, Ordering::Relaxed);
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.store(&StatsSnapshot::zero(self.session_start));
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub samples: u64,
    pub triples: u64,
    pub windows_completed: u64,
    pub windows_dropped: u64,
    pub shape_errors: u64,
    pub predictions: u64,
    pub inference_failures: u64,
    pub proximity_events: u64,
    pub alerts_fired: u64,
    pub dispatch_failures: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

impl StatsSnapshot {
    fn zero(session_start: DateTime<Utc>) -> Self {
        Self {
            samples: 0,
            triples: 0,
            windows_completed: 0,
            windows_dropped: 0,
            shape_errors: 0,
            predictions: 0,
            inference_failures: 0,
            proximity_events: 0,
            alerts_fired: 0,
            dispatch_failures: 0,
            session_start,
            session_duration_secs: 0,
        }
    }
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    #[serde(flatten)]
    counters: StatsSnapshot,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared pipeline stats.
pub type SharedStats = Arc<PipelineStats>;

pub fn create_shared_stats() -> SharedStats {
    Arc::new(PipelineStats::new())
}

/// Create shared stats backed by a JSON file.
pub fn create_shared_stats_with_persistence(path: PathBuf) -> SharedStats {
    Arc::new(PipelineStats::with_persistence(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting() {
        let stats = PipelineStats::new();

        stats.record_samples(150);
        stats.record_triple();
        stats.record_triple();
        stats.record_alert_fired();

        let snapshot = stats.stats();
        assert_eq!(snapshot.samples, 150);
        assert_eq!(snapshot.triples, 2);
        assert_eq!(snapshot.alerts_fired, 1);
        assert_eq!(snapshot.predictions, 0);
    }

    #[test]
    fn test_reset() {
        let stats = PipelineStats::new();

        stats.record_samples(100);
        stats.record_window_dropped();
        stats.reset();

        let snapshot = stats.stats();
        assert_eq!(snapshot.samples, 0);
        assert_eq!(snapshot.windows_dropped, 0);
    }

    #[test]
    fn test_summary_format() {
        let stats = PipelineStats::new();
        stats.record_inference_failure();
        let summary = stats.summary();

        assert!(summary.contains("Samples received"));
        assert!(summary.contains("Predictions: 0 (1 failed)"));
        assert!(summary.contains("Alerts fired"));
    }

    #[test]
    fn test_persistence_round_trip() {
        let path = std::env::temp_dir()
            .join(format!("motion-alert-stats-{}", uuid::Uuid::new_v4()))
            .join("stats.json");

        let stats = PipelineStats::with_persistence(path.clone());
        stats.record_samples(42);
        stats.record_prediction();
        stats.save().unwrap();

        let restored = PipelineStats::with_persistence(path.clone());
        assert_eq!(restored.stats().samples, 42);
        assert_eq!(restored.stats().predictions, 1);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
