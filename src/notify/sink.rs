use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use thiserror::Error;

use crate::error::{ExecutionError, FenceError, FenceResult};

use super::payload::NotificationPayload;

/// Errors reported by an alert sink.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DeliveryError {
    /// The sink is not accepting more payloads right now.
    #[error("alert sink is full")]
    Full,

    /// The sink's receiving side is gone.
    #[error("alert sink is closed")]
    Closed,

    /// The push backend rejected the payload.
    #[error("push backend rejected payload: {0}")]
    Rejected(String),
}

impl From<DeliveryError> for FenceError {
    fn from(err: DeliveryError) -> Self {
        FenceError::Execution(ExecutionError::DeliveryFailed {
            reason: err.to_string(),
        })
    }
}

/// External push / local alert mechanism.
///
/// Delivery is fire-and-forget from the engine's point of view: the sink owns
/// any retry or backoff, and `deliver` must not block waiting for the user's
/// device to confirm.
pub trait AlertSink: Send + Sync {
    fn deliver(&self, payload: &NotificationPayload) -> Result<(), DeliveryError>;
}

/// In-process sink backed by a bounded channel.
///
/// Never blocks: a full channel rejects the payload with `DeliveryError::Full`.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<NotificationPayload>,
}

impl ChannelSink {
    /// Creates a sink and the stream that receives its payloads.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, AlertStream) {
        let (tx, rx) = bounded(capacity.max(1));
        (Self { tx }, AlertStream { rx })
    }
}

impl AlertSink for ChannelSink {
    fn deliver(&self, payload: &NotificationPayload) -> Result<(), DeliveryError> {
        match self.tx.try_send(payload.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(DeliveryError::Full),
            Err(TrySendError::Disconnected(_)) => Err(DeliveryError::Closed),
        }
    }
}

/// Receiving end of a [`ChannelSink`].
#[derive(Debug)]
pub struct AlertStream {
    rx: Receiver<NotificationPayload>,
}

impl AlertStream {
    /// Receive the next payload (blocking).
    pub fn recv(&self) -> FenceResult<NotificationPayload> {
        self.rx
            .recv()
            .map_err(|_| FenceError::source_disconnected("alert_stream"))
    }

    /// Receive the next payload with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> FenceResult<NotificationPayload> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => FenceError::Execution(ExecutionError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            RecvTimeoutError::Disconnected => FenceError::source_disconnected("alert_stream"),
        })
    }

    /// Everything currently buffered, without blocking.
    #[must_use]
    pub fn drain(&self) -> Vec<NotificationPayload> {
        self.rx.try_iter().collect()
    }
}
