//! Proximity (beacon ranging) sources.

use crate::collector::subscription::{Emitter, SourceMessage, Subscription};
use crate::collector::types::{ProximityEvent, ProximityLevel, SourceError};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Longest a scripted beacon sleeps before re-checking for teardown.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A provider of ranging observations.
pub trait ProximitySource {
    fn subscribe(&self) -> Result<Subscription<ProximityEvent>, SourceError>;
}

/// Proximity source fed from outside the crate (HTTP ingest, platform glue).
///
/// Single-subscriber: the receiver moves into the first subscription, so the
/// feeder sees a disconnect once that subscription is gone.
pub struct ChannelProximitySource {
    receiver: Mutex<Option<Receiver<SourceMessage<ProximityEvent>>>>,
}

/// Feeding end of a [`ChannelProximitySource`].
#[derive(Clone)]
pub struct ProximityFeeder {
    sender: Sender<SourceMessage<ProximityEvent>>,
}

impl ProximityFeeder {
    /// Push an event without blocking. Returns `false` when the queue is
    /// full or nobody is subscribed anymore.
    pub fn push(&self, event: ProximityEvent) -> bool {
        match self.sender.try_send(Ok(event)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!("proximity queue full, dropping event");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Report that ranging failed.
    pub fn fail(&self, error: SourceError) -> bool {
        self.sender.try_send(Err(error)).is_ok()
    }
}

impl ChannelProximitySource {
    /// Create a source and the feeder that drives it.
    pub fn new(capacity: usize) -> (ProximityFeeder, Self) {
        let (sender, receiver) = bounded(capacity.max(1));
        (
            ProximityFeeder { sender },
            Self {
                receiver: Mutex::new(Some(receiver)),
            },
        )
    }
}

impl ProximitySource for ChannelProximitySource {
    fn subscribe(&self) -> Result<Subscription<ProximityEvent>, SourceError> {
        let receiver = self
            .receiver
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .ok_or_else(|| SourceError::unavailable("proximity", "already subscribed"))?;
        Ok(Subscription::from_receiver("proximity", receiver))
    }
}

/// Scripted beacon that repeats a cycle of proximity levels.
#[derive(Debug, Clone)]
pub struct SimulatedBeacon {
    source_id: Uuid,
    interval: Duration,
    levels: Vec<ProximityLevel>,
    signal_strength: i32,
}

impl SimulatedBeacon {
    /// A beacon ranging every `interval`, walking far → near → immediate → near.
    pub fn new(source_id: Uuid, interval: Duration) -> Self {
        Self {
            source_id,
            interval,
            levels: vec![
                ProximityLevel::Far,
                ProximityLevel::Near,
                ProximityLevel::Immediate,
                ProximityLevel::Near,
            ],
            signal_strength: -65,
        }
    }

    /// Replace the level cycle.
    pub fn with_levels(mut self, levels: Vec<ProximityLevel>) -> Self {
        self.levels = levels;
        self
    }
}

impl ProximitySource for SimulatedBeacon {
    fn subscribe(&self) -> Result<Subscription<ProximityEvent>, SourceError> {
        if self.levels.is_empty() {
            return Err(SourceError::unavailable("beacon", "no proximity levels to cycle"));
        }
        let beacon = self.clone();

        Subscription::spawn("beacon", 16, move |emitter: Emitter<ProximityEvent>| {
            for level in beacon.levels.iter().cycle() {
                let due = Instant::now() + beacon.interval;
                while let Some(wait) = due.checked_duration_since(Instant::now()) {
                    if wait.is_zero() || !emitter.is_active() {
                        break;
                    }
                    std::thread::sleep(wait.min(IDLE_POLL_INTERVAL));
                }
                let event = ProximityEvent::new(beacon.source_id, *level, beacon.signal_strength);
                if !emitter.emit(event) {
                    return;
                }
            }
        })
    }
}
