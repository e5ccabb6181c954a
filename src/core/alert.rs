//! Proximity-triggered alert gate.
//!
//! Proximity events pass through three stages before they can fire an alert:
//!
//! 1. events with zero signal strength (and, when a beacon region is
//!    configured, events from other beacons) are dropped as noise;
//! 2. a leading-edge throttle admits at most one event per throttle interval;
//! 3. the admitted event fires only if the beacon is near or immediate, the
//!    latest prediction is above the threshold, and the previous alert is at
//!    least one cooldown interval old.
//!
//! Firing dispatches a notification once; dispatch failures are logged and
//! never retried. The gate returns to idle after every evaluation.
//!
//! Throttle and cooldown run on the gate's own monotonic clock. Event
//! timestamps come from outside the process and are only logged.

use crate::collector::types::{monotonic_now, ProximityEvent, ProximityLevel};
use crate::config::Config;
use crate::core::classifier::PredictionScore;
use crate::notify::{DispatchError, Notifier};
use std::time::Duration;
use uuid::Uuid;

/// Thresholds and texts used by the gate.
#[derive(Debug, Clone)]
pub struct AlertSettings {
    /// Stream-level rate limit on considered proximity events
    pub throttle: Duration,
    /// Minimum time between two fired alerts
    pub cooldown: Duration,
    /// Prediction must be strictly above this value
    pub threshold: f64,
    /// Only events from this beacon region are considered, when set
    pub beacon: Option<Uuid>,
    pub title: String,
    pub body: String,
}

impl AlertSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            throttle: config.proximity_throttle,
            cooldown: config.alert_cooldown,
            threshold: config.prediction_alert_threshold,
            beacon: config.beacon_uuid,
            title: config.alert_title.clone(),
            body: config.alert_body.clone(),
        }
    }
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Leading-edge throttle over gate-clock readings.
#[derive(Debug, Clone)]
pub struct ProximityThrottle {
    interval: f64,
    last_admitted: Option<f64>,
}

impl ProximityThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.as_secs_f64(),
            last_admitted: None,
        }
    }

    /// Admit an event seen at `now` if the previous admission is at least
    /// one interval old. A clock that went backwards restarts the throttle.
    pub fn admit(&mut self, now: f64) -> bool {
        match self.last_admitted {
            Some(last) if within(now, last, self.interval) => false,
            _ => {
                self.last_admitted = Some(now);
                true
            }
        }
    }
}

/// Whether `now` lies less than `interval` after `since`.
fn within(now: f64, since: f64, interval: f64) -> bool {
    let elapsed = now - since;
    (0.0..interval).contains(&elapsed)
}

/// Outcome of evaluating one proximity event.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// Zero signal strength
    NoSignal,
    /// Event from a beacon outside the configured region
    ForeignBeacon,
    /// Dropped by the stream throttle
    Throttled,
    /// Beacon is not near enough
    TooFar(ProximityLevel),
    /// Prediction missing or not above the threshold
    BelowThreshold(PredictionScore),
    /// An alert fired too recently
    CoolingDown,
    /// Alert fired; `dispatch` is the notification result
    Fired { dispatch: Result<(), DispatchError> },
}

impl GateDecision {
    pub fn fired(&self) -> bool {
        matches!(self, GateDecision::Fired { .. })
    }

    /// Whether the event got past the noise filter and the throttle.
    pub fn considered(&self) -> bool {
        !matches!(
            self,
            GateDecision::NoSignal | GateDecision::ForeignBeacon | GateDecision::Throttled
        )
    }
}

/// Gate state machine. Owns the last-alert time on its own clock.
pub struct AlertGate {
    settings: AlertSettings,
    throttle: ProximityThrottle,
    last_alert_at: Option<f64>,
    notifier: Box<dyn Notifier>,
}

impl AlertGate {
    pub fn new(settings: AlertSettings, notifier: Box<dyn Notifier>) -> Self {
        Self {
            throttle: ProximityThrottle::new(settings.throttle),
            settings,
            last_alert_at: None,
            notifier,
        }
    }

    /// Evaluate `event` against the latest prediction `score`, now.
    pub fn evaluate(&mut self, event: &ProximityEvent, score: PredictionScore) -> GateDecision {
        self.evaluate_at(event, score, monotonic_now())
    }

    /// Evaluate `event` as if the gate clock read `now` seconds.
    pub fn evaluate_at(
        &mut self,
        event: &ProximityEvent,
        score: PredictionScore,
        now: f64,
    ) -> GateDecision {
        if event.signal_strength == 0 {
            return GateDecision::NoSignal;
        }
        if self.settings.beacon.is_some_and(|id| id != event.source_id) {
            return GateDecision::ForeignBeacon;
        }
        if !self.throttle.admit(now) {
            return GateDecision::Throttled;
        }

        tracing::debug!(
            proximity = ?event.proximity,
            accuracy = event.accuracy,
            signal = event.signal_strength,
            reported_at = event.timestamp,
            %score,
            "proximity event considered"
        );

        if !event.proximity.is_close() {
            return GateDecision::TooFar(event.proximity);
        }
        if !score.exceeds(self.settings.threshold) {
            return GateDecision::BelowThreshold(score);
        }
        let cooldown = self.settings.cooldown.as_secs_f64();
        if self.last_alert_at.is_some_and(|last| within(now, last, cooldown)) {
            return GateDecision::CoolingDown;
        }

        self.last_alert_at = Some(now);
        let dispatch = self
            .notifier
            .notify(&self.settings.title, &self.settings.body);
        match &dispatch {
            Ok(()) => tracing::info!(%score, proximity = ?event.proximity, "alert fired"),
            Err(e) => tracing::warn!(error = %e, "alert fired but notification failed"),
        }
        GateDecision::Fired { dispatch }
    }

    /// Gate-clock time of the last fired alert.
    pub fn last_alert_at(&self) -> Option<f64> {
        self.last_alert_at
    }

    pub fn settings(&self) -> &AlertSettings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::MemoryNotifier;

    struct FailingNotifier;

    impl Notifier for FailingNotifier {
        fn notify(&self, _: &str, _: &str) -> Result<(), DispatchError> {
            Err(DispatchError::Unavailable("offline".to_string()))
        }
    }

    fn settings() -> AlertSettings {
        AlertSettings {
            throttle: Duration::from_secs(5),
            cooldown: Duration::from_secs(5),
            threshold: 0.5,
            beacon: None,
            title: "Beware!".to_string(),
            body: "You are crossing the road!".to_string(),
        }
    }

    fn event(level: ProximityLevel, signal: i32) -> ProximityEvent {
        ProximityEvent::new(Uuid::nil(), level, signal)
    }

    fn score(v: f64) -> PredictionScore {
        PredictionScore::new(v).unwrap()
    }

    #[test]
    fn test_near_event_with_high_score_fires_once() {
        let notifier = MemoryNotifier::new();
        let mut gate = AlertGate::new(settings(), Box::new(notifier.clone()));

        let decision = gate.evaluate(&event(ProximityLevel::Near, 5), score(0.7));
        assert!(decision.fired());
        assert_eq!(notifier.sent().len(), 1);
        assert_eq!(notifier.sent()[0].title, "Beware!");
    }

    #[test]
    fn test_repeat_within_throttle_does_not_fire() {
        let notifier = MemoryNotifier::new();
        let mut gate = AlertGate::new(settings(), Box::new(notifier.clone()));

        assert!(gate
            .evaluate(&event(ProximityLevel::Near, 5), score(0.7))
            .fired());
        assert_eq!(
            gate.evaluate(&event(ProximityLevel::Near, 5), score(0.7)),
            GateDecision::Throttled
        );
        assert_eq!(notifier.sent().len(), 1);
    }

    #[test]
    fn test_never_fires_twice_within_throttle_window() {
        let notifier = MemoryNotifier::new();
        let mut gate = AlertGate::new(settings(), Box::new(notifier.clone()));

        let mut fire_times = Vec::new();
        for step in 0..200 {
            let t = step as f64 * 0.25;
            if gate
                .evaluate_at(&event(ProximityLevel::Immediate, -40), score(0.95), t)
                .fired()
            {
                fire_times.push(t);
            }
        }

        assert!(fire_times.len() >= 2);
        assert!(fire_times.windows(2).all(|w| w[1] - w[0] >= 5.0));
        assert_eq!(notifier.sent().len(), fire_times.len());
    }

    #[test]
    fn test_zero_signal_is_noise_and_does_not_consume_throttle() {
        let notifier = MemoryNotifier::new();
        let mut gate = AlertGate::new(settings(), Box::new(notifier.clone()));

        assert_eq!(
            gate.evaluate_at(&event(ProximityLevel::Near, 0), score(0.9), 100.0),
            GateDecision::NoSignal
        );
        assert!(gate
            .evaluate_at(&event(ProximityLevel::Near, -50), score(0.9), 100.5)
            .fired());
    }

    #[test]
    fn test_far_event_consumes_throttle_window() {
        let notifier = MemoryNotifier::new();
        let mut gate = AlertGate::new(settings(), Box::new(notifier.clone()));

        assert_eq!(
            gate.evaluate_at(&event(ProximityLevel::Far, -80), score(0.9), 10.0),
            GateDecision::TooFar(ProximityLevel::Far)
        );
        assert_eq!(
            gate.evaluate_at(&event(ProximityLevel::Near, -50), score(0.9), 11.0),
            GateDecision::Throttled
        );
        assert!(gate
            .evaluate_at(&event(ProximityLevel::Near, -50), score(0.9), 15.0)
            .fired());
    }

    #[test]
    fn test_low_or_missing_score_does_not_fire() {
        let notifier = MemoryNotifier::new();
        let mut gate = AlertGate::new(settings(), Box::new(notifier.clone()));

        assert_eq!(
            gate.evaluate_at(&event(ProximityLevel::Near, -50), score(0.5), 0.0),
            GateDecision::BelowThreshold(score(0.5))
        );
        assert_eq!(
            gate.evaluate_at(&event(ProximityLevel::Near, -50), PredictionScore::NONE, 10.0),
            GateDecision::BelowThreshold(PredictionScore::NONE)
        );
        assert!(notifier.sent().is_empty());
        assert!(gate.last_alert_at().is_none());
    }

    #[test]
    fn test_cooldown_independent_of_throttle() {
        let notifier = MemoryNotifier::new();
        let mut gate = AlertGate::new(
            AlertSettings {
                throttle: Duration::from_secs(1),
                cooldown: Duration::from_secs(30),
                ..settings()
            },
            Box::new(notifier.clone()),
        );

        assert!(gate
            .evaluate_at(&event(ProximityLevel::Near, -50), score(0.9), 0.0)
            .fired());
        assert_eq!(
            gate.evaluate_at(&event(ProximityLevel::Near, -50), score(0.9), 2.0),
            GateDecision::CoolingDown
        );
        assert!(gate
            .evaluate_at(&event(ProximityLevel::Near, -50), score(0.9), 31.0)
            .fired());
    }

    #[test]
    fn test_dispatch_failure_is_absorbed() {
        let mut gate = AlertGate::new(settings(), Box::new(FailingNotifier));

        let decision = gate.evaluate_at(&event(ProximityLevel::Near, -50), score(0.9), 0.0);
        assert_eq!(
            decision,
            GateDecision::Fired {
                dispatch: Err(DispatchError::Unavailable("offline".to_string()))
            }
        );
        // Still a fire for cooldown purposes; the next window fires again.
        assert_eq!(gate.last_alert_at(), Some(0.0));
        assert!(gate
            .evaluate_at(&event(ProximityLevel::Near, -50), score(0.9), 6.0)
            .fired());
    }

    #[test]
    fn test_foreign_beacon_is_ignored() {
        let region = Uuid::new_v4();
        let notifier = MemoryNotifier::new();
        let mut gate = AlertGate::new(
            AlertSettings {
                beacon: Some(region),
                ..settings()
            },
            Box::new(notifier.clone()),
        );

        let foreign = ProximityEvent::new(Uuid::new_v4(), ProximityLevel::Near, -50);
        assert_eq!(
            gate.evaluate_at(&foreign, score(0.9), 0.0),
            GateDecision::ForeignBeacon
        );

        let ours = ProximityEvent::new(region, ProximityLevel::Near, -50);
        assert!(gate.evaluate_at(&ours, score(0.9), 0.5).fired());
    }

    #[test]
    fn test_event_timestamps_do_not_drive_the_gate() {
        let notifier = MemoryNotifier::new();
        let mut gate = AlertGate::new(settings(), Box::new(notifier.clone()));

        // Epoch-style timestamp followed by small ones.
        let far = event(ProximityLevel::Far, -80).at(1.7e9);
        assert_eq!(
            gate.evaluate_at(&far, score(0.9), 10.0),
            GateDecision::TooFar(ProximityLevel::Far)
        );

        let mut fired = 0;
        for (i, reported) in [60.0, 120.0, 180.0, 240.0, 300.0].into_iter().enumerate() {
            let near = event(ProximityLevel::Near, -50).at(reported);
            if gate
                .evaluate_at(&near, score(0.9), 20.0 + i as f64 * 10.0)
                .fired()
            {
                fired += 1;
            }
        }
        assert_eq!(fired, 5);
        assert_eq!(notifier.sent().len(), 5);
    }

    #[test]
    fn test_clock_going_backwards_restarts_throttle_and_cooldown() {
        let notifier = MemoryNotifier::new();
        let mut gate = AlertGate::new(settings(), Box::new(notifier.clone()));

        assert!(gate
            .evaluate_at(&event(ProximityLevel::Near, -50), score(0.9), 1.7e9)
            .fired());
        assert!(gate
            .evaluate_at(&event(ProximityLevel::Near, -50), score(0.9), 60.0)
            .fired());
        assert_eq!(
            gate.evaluate_at(&event(ProximityLevel::Near, -50), score(0.9), 62.0),
            GateDecision::Throttled
        );
        assert_eq!(gate.last_alert_at(), Some(60.0));
    }

    #[test]
    fn test_throttle_admits_after_interval() {
        let mut throttle = ProximityThrottle::new(Duration::from_secs(5));
        assert!(throttle.admit(100.0));
        assert!(!throttle.admit(104.9));
        assert!(throttle.admit(105.0));
        assert!(throttle.admit(3.0));
    }
}
