//! Notification dispatcher.
//!
//! Turns a breach or a de-duplicated feed record into a payload, writes the
//! history record for breaches, and hands the payload to the alert sink. The
//! dispatcher never retries: a sink failure is reported to the caller as
//! `DeliveryFailed` and the payload is gone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::detector::BreachEvent;
use crate::error::{FenceError, FenceResult};
use crate::feed::ChangeEvent;
use crate::ids::SubjectId;
use crate::store::NotificationLog;

use super::payload::{compose_breach, compose_change, NotificationPayload, NotificationRecord};
use super::sink::AlertSink;

/// Something the dispatcher can turn into an alert.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatchable {
    Breach(BreachEvent),
    Change(ChangeEvent),
}

impl From<BreachEvent> for Dispatchable {
    fn from(event: BreachEvent) -> Self {
        Self::Breach(event)
    }
}

impl From<ChangeEvent> for Dispatchable {
    fn from(event: ChangeEvent) -> Self {
        Self::Change(event)
    }
}

/// Outcome of dispatching a group of events.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DispatchReport {
    /// Payloads the sink accepted.
    pub delivered: Vec<NotificationPayload>,
    /// Errors for everything else.
    pub failures: Vec<FenceError>,
}

impl DispatchReport {
    /// True if nothing failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub(crate) fn record(&mut self, result: FenceResult<NotificationPayload>) {
        match result {
            Ok(payload) => self.delivered.push(payload),
            Err(err) => self.failures.push(err),
        }
    }

    pub(crate) fn merge(&mut self, other: DispatchReport) {
        self.delivered.extend(other.delivered);
        self.failures.extend(other.failures);
    }
}

#[allow(missing_docs)]
pub struct NotificationDispatcher {
    sink: Arc<dyn AlertSink>,
    log: Arc<dyn NotificationLog>,
    names: RwLock<HashMap<SubjectId, String>>,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl NotificationDispatcher {
    #[must_use]
    pub fn new(sink: Arc<dyn AlertSink>, log: Arc<dyn NotificationLog>) -> Self {
        Self {
            sink,
            log,
            names: RwLock::new(HashMap::new()),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Display name used for `subject` in breach alerts.
    pub fn set_subject_name(&self, subject: SubjectId, name: impl Into<String>) -> FenceResult<()> {
        let mut names = self
            .names
            .write()
            .map_err(|_| FenceError::internal("poisoned lock: dispatcher.names"))?;
        names.insert(subject, name.into());
        Ok(())
    }

    /// Display name for `subject`, falling back to its id.
    #[must_use]
    pub fn subject_name(&self, subject: &SubjectId) -> String {
        self.names
            .read()
            .ok()
            .and_then(|names| names.get(subject).cloned())
            .unwrap_or_else(|| subject.to_string())
    }

    /// Pure mapping from event to payload.
    #[must_use]
    pub fn compose(&self, item: &Dispatchable) -> NotificationPayload {
        match item {
            Dispatchable::Breach(event) => compose_breach(event, &self.subject_name(&event.subject)),
            Dispatchable::Change(event) => compose_change(event),
        }
    }

    /// Composes, records (breaches only) and delivers one alert.
    ///
    /// # Errors
    ///
    /// - `Storage` if the breach history record could not be written; nothing
    ///   is delivered in that case.
    /// - `DeliveryFailed` if the sink rejected the payload. Not retried.
    pub fn dispatch(&self, item: &Dispatchable) -> FenceResult<NotificationPayload> {
        let payload = self.compose(item);

        if let Dispatchable::Breach(event) = item {
            let record = NotificationRecord::from_breach(event, &self.subject_name(&event.subject));
            self.log.append(record).map_err(|err| {
                warn!(subject = %event.subject, region = %event.region.id, error = %err, "failed to record breach");
                FenceError::from(err)
            })?;
        }

        match self.sink.deliver(&payload) {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                debug!(payload = %payload.id, kind = %payload.kind, target = %payload.target, "notification handed to sink");
                Ok(payload)
            }
            Err(err) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(payload = %payload.id, kind = %payload.kind, error = %err, "notification delivery failed");
                Err(err.into())
            }
        }
    }

    /// Dispatches every item, collecting successes and failures.
    pub fn dispatch_all<I>(&self, items: I) -> DispatchReport
    where
        I: IntoIterator<Item = Dispatchable>,
    {
        let mut report = DispatchReport::default();
        for item in items {
            report.record(self.dispatch(&item));
        }
        report
    }

    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}
