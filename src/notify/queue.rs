//! Fire-and-forget delivery worker.
//!
//! `DeliveryQueue` is itself an [`AlertSink`]: wrapping the real push sink in
//! one makes every dispatch non-blocking. Payloads are enqueued with
//! `try_send`; a full or closed queue fails immediately with
//! `DeliveryError::Full` / `Closed`. Failures on the worker side are logged
//! and counted, never retried.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, warn};

use crate::error::{FenceError, FenceResult};

use super::payload::NotificationPayload;
use super::sink::{AlertSink, DeliveryError};

#[derive(Debug, Default)]
struct QueueCounters {
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Bounded queue in front of an alert sink, drained by one worker thread.
#[allow(missing_docs)]
pub struct DeliveryQueue {
    tx: Mutex<Option<Sender<NotificationPayload>>>,
    capacity: usize,
    counters: Arc<QueueCounters>,
    rejected: AtomicU64,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl DeliveryQueue {
    /// Starts the worker delivering into `sink`.
    ///
    /// # Panics
    ///
    /// Panics if the worker thread cannot be spawned.
    pub fn start(sink: Arc<dyn AlertSink>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded::<NotificationPayload>(capacity);
        let counters = Arc::new(QueueCounters::default());

        let thread_counters = Arc::clone(&counters);
        let join = thread::Builder::new()
            .name("fencewatch-delivery".to_string())
            .spawn(move || worker_loop(sink, rx, thread_counters))
            .expect("failed to spawn fencewatch delivery worker");

        Self {
            tx: Mutex::new(Some(tx)),
            capacity,
            counters,
            rejected: AtomicU64::new(0),
            join: Mutex::new(Some(join)),
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Payloads the worker handed to the sink successfully.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.counters.delivered.load(Ordering::Relaxed)
    }

    /// Payloads the sink rejected on the worker side.
    #[must_use]
    pub fn failed_deliveries(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }

    /// Payloads refused at enqueue time (queue full or closed).
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Queues `payload` for delivery without blocking.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryFailed` immediately if the queue is full or closed.
    pub fn enqueue(&self, payload: &NotificationPayload) -> FenceResult<()> {
        self.deliver(payload).map_err(FenceError::from)
    }

    /// Stops accepting payloads, lets the worker drain what is queued, and
    /// waits for it to exit.
    pub fn close(&self) {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
        if let Ok(mut guard) = self.join.lock() {
            if let Some(handle) = guard.take() {
                let _ = handle.join();
            }
        }
    }
}

impl AlertSink for DeliveryQueue {
    fn deliver(&self, payload: &NotificationPayload) -> Result<(), DeliveryError> {
        let guard = self.tx.lock().map_err(|_| DeliveryError::Closed)?;
        let Some(tx) = guard.as_ref() else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(DeliveryError::Closed);
        };
        match tx.try_send(payload.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                Err(DeliveryError::Full)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                Err(DeliveryError::Closed)
            }
        }
    }
}

impl Drop for DeliveryQueue {
    fn drop(&mut self) {
        // Close the channel so the worker exits, but do not join: a slow sink
        // must not stall shutdown. Queued payloads may be abandoned.
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
        if let Ok(mut guard) = self.join.lock() {
            drop(guard.take());
        }
    }
}

fn worker_loop(sink: Arc<dyn AlertSink>, rx: Receiver<NotificationPayload>, counters: Arc<QueueCounters>) {
    for payload in rx.iter() {
        match sink.deliver(&payload) {
            Ok(()) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(payload = %payload.id, kind = %payload.kind, error = %err, "queued delivery failed");
            }
        }
    }
    debug!("delivery worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Barrier;
    use std::time::Duration;

    use chrono::Utc;
    use uuid::Uuid;

    use crate::feed::EventKind;
    use crate::ids::SubjectId;
    use crate::notify::sink::ChannelSink;

    fn payload() -> NotificationPayload {
        NotificationPayload {
            id: Uuid::new_v4(),
            title: "t".to_string(),
            body: "b".to_string(),
            target: SubjectId::from("parent"),
            subject: SubjectId::from("child"),
            kind: EventKind::BreachAlert,
            timestamp: Utc::now(),
        }
    }

    /// Blocks the worker until the test releases it.
    struct GatedSink {
        gate: Arc<Barrier>,
    }

    impl AlertSink for GatedSink {
        fn deliver(&self, _payload: &NotificationPayload) -> Result<(), DeliveryError> {
            self.gate.wait();
            Ok(())
        }
    }

    #[test]
    fn queued_payloads_reach_the_sink() {
        let (sink, stream) = ChannelSink::new(16);
        let queue = DeliveryQueue::start(Arc::new(sink), 16);
        for _ in 0..5 {
            queue.deliver(&payload()).unwrap();
        }
        queue.close();
        assert_eq!(stream.drain().len(), 5);
        assert_eq!(queue.delivered(), 5);
    }

    #[test]
    fn full_queue_fails_fast() {
        let gate = Arc::new(Barrier::new(2));
        let queue = DeliveryQueue::start(Arc::new(GatedSink { gate: Arc::clone(&gate) }), 1);

        // First payload is picked up by the worker, which then blocks on the gate.
        queue.deliver(&payload()).unwrap();
        let mut accepted = 1;
        let mut saw_full = false;
        for _ in 0..100 {
            match queue.deliver(&payload()) {
                Ok(()) => accepted += 1,
                Err(DeliveryError::Full) => {
                    saw_full = true;
                    break;
                }
                Err(other) => panic!("unexpected error: {other:?}"),
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(saw_full);
        assert!(queue.rejected() >= 1);

        assert!(accepted <= queue.capacity() + 1);

        // Release the worker for every payload that made it in.
        for _ in 0..accepted {
            gate.wait();
        }
        queue.close();
        assert_eq!(queue.delivered(), accepted as u64);
    }

    #[test]
    fn closed_queue_rejects() {
        let (sink, _stream) = ChannelSink::new(1);
        let queue = DeliveryQueue::start(Arc::new(sink), 4);
        queue.close();
        assert_eq!(queue.deliver(&payload()), Err(DeliveryError::Closed));
        assert!(queue.enqueue(&payload()).unwrap_err().is_delivery_failed());
    }

    #[test]
    fn worker_failures_are_counted() {
        let (sink, stream) = ChannelSink::new(1);
        drop(stream);
        let queue = DeliveryQueue::start(Arc::new(sink), 4);
        queue.deliver(&payload()).unwrap();
        queue.close();
        assert_eq!(queue.failed_deliveries(), 1);
    }
}
