//! Subscription handles for push-based sources.
//!
//! A producer thread pushes into a bounded channel through an [`Emitter`];
//! the consumer pulls from [`Subscription::receiver`]. Unsubscribing (or
//! dropping the subscription) stops and joins the producer, so the
//! underlying source is released on every exit path.

use crate::collector::types::SourceError;
use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How long a blocked producer waits before re-checking for teardown.
const SEND_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Item carried on a subscription channel.
pub type SourceMessage<T> = Result<T, SourceError>;

/// Producer side of a subscription.
pub struct Emitter<T> {
    sender: Sender<SourceMessage<T>>,
    running: Arc<AtomicBool>,
}

impl<T> Emitter<T> {
    /// Push an item downstream.
    ///
    /// Blocks while the channel is full. Returns `false` once the
    /// subscription has been torn down; the producer should then return.
    pub fn emit(&self, item: T) -> bool {
        self.send(Ok(item))
    }

    /// Report a fatal source error. The producer should return afterwards.
    pub fn fail(&self, error: SourceError) -> bool {
        self.send(Err(error))
    }

    /// Whether the consumer still wants items.
    pub fn is_active(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn send(&self, mut message: SourceMessage<T>) -> bool {
        loop {
            if !self.is_active() {
                return false;
            }
            match self.sender.send_timeout(message, SEND_POLL_INTERVAL) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(returned)) => message = returned,
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }
}

/// Consumer side of a source stream plus its teardown handle.
pub struct Subscription<T> {
    name: String,
    receiver: Receiver<SourceMessage<T>>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Subscription<T> {
    /// Start a producer thread feeding a bounded channel of `capacity` items.
    pub fn spawn<F>(name: impl Into<String>, capacity: usize, producer: F) -> Result<Self, SourceError>
    where
        F: FnOnce(Emitter<T>) + Send + 'static,
    {
        let name = name.into();
        let (sender, receiver) = bounded(capacity.max(1));
        let running = Arc::new(AtomicBool::new(true));

        let emitter = Emitter {
            sender,
            running: running.clone(),
        };

        let handle = thread::Builder::new()
            .name(format!("source-{name}"))
            .spawn(move || producer(emitter))
            .map_err(|e| SourceError::unavailable(&name, e.to_string()))?;

        Ok(Self {
            name,
            receiver,
            running,
            thread_handle: Some(handle),
        })
    }
}

impl<T> Subscription<T> {
    /// Wrap a channel fed by something outside this crate.
    pub fn from_receiver(name: impl Into<String>, receiver: Receiver<SourceMessage<T>>) -> Self {
        Self {
            name: name.into(),
            receiver,
            running: Arc::new(AtomicBool::new(true)),
            thread_handle: None,
        }
    }

    /// Name of the source behind this subscription.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Receiver for the source stream.
    pub fn receiver(&self) -> &Receiver<SourceMessage<T>> {
        &self.receiver
    }

    /// Whether the subscription has not been torn down yet.
    pub fn is_active(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the producer and wait for it to release the source.
    pub fn unsubscribe(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                tracing::error!(source = %self.name, "source producer panicked");
            } else {
                tracing::debug!(source = %self.name, "source released");
            }
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_items_flow_in_order() {
        let subscription = Subscription::spawn("counter", 4, |emitter: Emitter<u32>| {
            for i in 0..10 {
                if !emitter.emit(i) {
                    return;
                }
            }
        })
        .unwrap();

        let received: Vec<u32> = subscription
            .receiver()
            .iter()
            .map(|m| m.unwrap())
            .collect();
        assert_eq!(received, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_unsubscribe_releases_blocked_producer() {
        let released = Arc::new(AtomicUsize::new(0));
        let flag = released.clone();

        let mut subscription = Subscription::spawn("endless", 1, move |emitter: Emitter<u32>| {
            let mut i = 0;
            while emitter.emit(i) {
                i += 1;
            }
            flag.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        // Nobody reads, so the producer is parked on a full channel.
        thread::sleep(Duration::from_millis(20));
        subscription.unsubscribe();

        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(!subscription.is_active());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();

        {
            let _subscription = Subscription::spawn("endless", 1, move |emitter: Emitter<u32>| {
                while emitter.emit(0) {}
                flag.store(true, Ordering::SeqCst);
            })
            .unwrap();
        }

        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_errors_are_delivered() {
        let subscription = Subscription::spawn("faulty", 4, |emitter: Emitter<u32>| {
            emitter.emit(1);
            emitter.fail(SourceError::transport("faulty", "bus fault"));
        })
        .unwrap();

        let messages: Vec<_> = subscription.receiver().iter().collect();
        assert_eq!(messages.len(), 2);
        assert!(messages[1].is_err());
    }
}
