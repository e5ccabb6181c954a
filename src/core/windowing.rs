//! Count-driven tumbling windows over aligned triples.
//!
//! Triples are collected into fixed-size, non-overlapping windows. A window
//! is only released once it holds exactly the configured number of triples;
//! a partially filled buffer is discarded when the stream ends.

use crate::core::sync::AlignedTriple;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A completed batch of consecutive aligned triples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Window {
    sequence: u64,
    triples: Vec<AlignedTriple>,
}

impl Window {
    /// Wrap triples as a window. Length is not checked here; the feature
    /// builder validates it.
    pub fn from_triples(sequence: u64, triples: Vec<AlignedTriple>) -> Self {
        Self { sequence, triples }
    }

    /// Position of this window in emission order, starting at 0.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn triples(&self) -> &[AlignedTriple] {
        &self.triples
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    /// Timestamp of the first triple.
    pub fn start_timestamp(&self) -> Option<f64> {
        self.triples.first().map(AlignedTriple::max_timestamp)
    }

    /// Timestamp of the last triple.
    pub fn end_timestamp(&self) -> Option<f64> {
        self.triples.last().map(AlignedTriple::max_timestamp)
    }
}

/// Buffers triples and emits a [`Window`] every `window_size` items.
#[derive(Debug)]
pub struct WindowAggregator {
    window_size: usize,
    buffer: Vec<AlignedTriple>,
    next_sequence: u64,
    discarded_triples: u64,
}

impl WindowAggregator {
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            window_size,
            buffer: Vec::with_capacity(window_size),
            next_sequence: 0,
            discarded_triples: 0,
        }
    }

    /// Add a triple, returning the completed window when the buffer fills.
    pub fn push(&mut self, triple: AlignedTriple) -> Option<Window> {
        self.buffer.push(triple);
        if self.buffer.len() < self.window_size {
            return None;
        }

        let triples = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.window_size));
        let window = Window::from_triples(self.next_sequence, triples);
        self.next_sequence += 1;
        Some(window)
    }

    /// Drop the partially filled buffer (e.g. when the upstream stream ends).
    ///
    /// Returns how many triples were discarded.
    pub fn discard_partial(&mut self) -> usize {
        let count = self.buffer.len();
        self.buffer.clear();
        self.discarded_triples += count as u64;
        count
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Triples waiting for the current window to fill.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Windows emitted so far.
    pub fn completed_window_count(&self) -> u64 {
        self.next_sequence
    }

    /// Triples thrown away by [`discard_partial`](Self::discard_partial).
    pub fn discarded_triples(&self) -> u64 {
        self.discarded_triples
    }
}

/// Bounded FIFO of completed windows that drops the oldest entry when full.
///
/// Keeps the producer (sensor ingest) from ever waiting on the consumer
/// (inference), and keeps the newest window available.
pub struct WindowQueue {
    sender: Sender<Window>,
    receiver: Receiver<Window>,
}

impl WindowQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self { sender, receiver }
    }

    /// Split into the producing and consuming halves.
    pub fn split(self) -> (WindowProducer, WindowConsumer) {
        (
            WindowProducer {
                sender: self.sender,
                evictor: self.receiver.clone(),
            },
            WindowConsumer {
                receiver: self.receiver,
            },
        )
    }
}

/// Producing half of a [`WindowQueue`].
pub struct WindowProducer {
    sender: Sender<Window>,
    evictor: Receiver<Window>,
}

impl WindowProducer {
    /// Enqueue a window, evicting the oldest queued one if the queue is full.
    ///
    /// Returns the evicted window, if any. Order of the remaining windows is
    /// preserved.
    pub fn push(&self, window: Window) -> Option<Window> {
        let mut window = window;
        let mut evicted = None;
        loop {
            match self.sender.try_send(window) {
                Ok(()) => return evicted,
                Err(TrySendError::Full(returned)) => {
                    window = returned;
                    if let Ok(oldest) = self.evictor.try_recv() {
                        evicted = Some(oldest);
                    }
                }
                Err(TrySendError::Disconnected(_)) => return evicted,
            }
        }
    }
}

/// Consuming half of a [`WindowQueue`].
pub struct WindowConsumer {
    receiver: Receiver<Window>,
}

impl WindowConsumer {
    /// Wait up to `timeout` for the next window.
    ///
    /// `Err(true)` means the producer is gone and the queue is drained;
    /// `Err(false)` is a plain timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Window, bool> {
        self.receiver.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => false,
            RecvTimeoutError::Disconnected => true,
        })
    }

    /// Windows currently queued.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::types::Sample;

    fn triple(index: u64) -> AlignedTriple {
        let t = index as f64 * 0.02;
        let sample = Sample::new(t, 0.0, 0.0, 0.0);
        AlignedTriple {
            index,
            accelerometer: sample,
            gyroscope: sample,
            magnetometer: sample,
        }
    }

    #[test]
    fn test_emits_floor_n_over_w_windows() {
        let mut aggregator = WindowAggregator::new(50);
        let windows: Vec<Window> = (0..173).filter_map(|i| aggregator.push(triple(i))).collect();

        assert_eq!(windows.len(), 3);
        assert!(windows.iter().all(|w| w.len() == 50));
        assert_eq!(aggregator.buffered(), 23);
        assert_eq!(aggregator.discard_partial(), 23);
        assert_eq!(aggregator.buffered(), 0);
    }

    #[test]
    fn test_windows_do_not_overlap() {
        let mut aggregator = WindowAggregator::new(4);
        let windows: Vec<Window> = (0..8).filter_map(|i| aggregator.push(triple(i))).collect();

        let first: Vec<u64> = windows[0].triples().iter().map(|t| t.index).collect();
        let second: Vec<u64> = windows[1].triples().iter().map(|t| t.index).collect();
        assert_eq!(first, vec![0, 1, 2, 3]);
        assert_eq!(second, vec![4, 5, 6, 7]);
        assert_eq!(windows[0].sequence(), 0);
        assert_eq!(windows[1].sequence(), 1);
    }

    #[test]
    fn test_window_timestamps() {
        let window = Window::from_triples(0, vec![triple(0), triple(1), triple(2)]);
        assert_eq!(window.start_timestamp(), Some(0.0));
        assert_eq!(window.end_timestamp(), Some(0.04));
        assert!(Window::from_triples(1, vec![]).start_timestamp().is_none());
    }

    #[test]
    fn test_queue_drops_oldest_when_full() {
        let (producer, consumer) = WindowQueue::new(2).split();

        assert!(producer.push(Window::from_triples(0, vec![])).is_none());
        assert!(producer.push(Window::from_triples(1, vec![])).is_none());
        let evicted = producer.push(Window::from_triples(2, vec![])).unwrap();
        assert_eq!(evicted.sequence(), 0);

        let timeout = Duration::from_millis(10);
        assert_eq!(consumer.recv_timeout(timeout).unwrap().sequence(), 1);
        assert_eq!(consumer.recv_timeout(timeout).unwrap().sequence(), 2);
        assert_eq!(consumer.recv_timeout(timeout), Err(false));

        drop(producer);
        assert_eq!(consumer.recv_timeout(timeout), Err(true));
    }
}
