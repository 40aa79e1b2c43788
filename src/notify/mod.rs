//! Notification dispatch.
//!
//! Breaches and de-duplicated feed records become [`NotificationPayload`]s
//! handed to an external [`AlertSink`]. Breaches also leave a
//! [`NotificationRecord`] in the parent's history.

/// Event to payload mapping and delivery.
pub mod dispatcher;
/// Payload and history record types.
pub mod payload;
/// Non-blocking delivery worker.
pub mod queue;
/// Sink trait and the in-process channel sink.
pub mod sink;

pub use dispatcher::{DispatchReport, Dispatchable, NotificationDispatcher};
pub use payload::{compose_breach, compose_change, NotificationPayload, NotificationRecord};
pub use queue::DeliveryQueue;
pub use sink::{AlertSink, AlertStream, ChannelSink, DeliveryError};
