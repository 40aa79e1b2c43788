//! # fencewatch - Geofence & Notification Event Engine
//!
//! fencewatch decides when a monitored subject has entered a restricted
//! region and turns that, along with records arriving on change feeds, into
//! de-duplicated notifications for an external push mechanism.
//!
//! ## Core Concepts
//!
//! - **Region**: a circle (center + radius in meters) a parent attaches to a child
//! - **BreachDetector**: per (subject, region) `Outside`/`Inside` state machine;
//!   one alert per entry, never while staying inside
//! - **EventDeduplicator**: first-observer-wins seen-set gated by the session start
//! - **NotificationDispatcher**: maps breaches and feed records to payloads for an
//!   [`AlertSink`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fencewatch::{ChannelSink, EngineConfig, FenceEngine, GeoPoint, InMemoryNotificationLog, LocationSample};
//!
//! let (sink, alerts) = ChannelSink::new(64);
//! let engine = FenceEngine::new(
//!     EngineConfig::default(),
//!     Arc::new(sink),
//!     Arc::new(InMemoryNotificationLog::new()),
//!     chrono::Utc::now(),
//! )?;
//!
//! let mall = GeoPoint::new(51.5033, -0.1196)?;
//! engine.upsert_region(engine.region("mall", "parent-1", "child-1", "Mall", mall))?;
//! engine.handle_sample(&LocationSample::now("child-1", mall))?;
//! let alert = alerts.recv()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Value types
pub mod error;
pub mod feed;
pub mod geo;
pub mod ids;
pub mod region;
pub mod sample;

// Pipeline components
pub mod dedup;
pub mod detector;
pub mod notify;
pub mod registry;
pub mod store;

// Wiring
pub mod config;
pub mod engine;
pub mod runtime;

pub use config::EngineConfig;
pub use dedup::{Admission, EventDeduplicator};
pub use detector::{BreachDetector, BreachEvent, FenceState};
pub use engine::{EngineStats, FenceEngine};
pub use error::{ExecutionError, FenceError, FenceResult, ValidationError};
pub use feed::{ChangeEvent, ChangePayload, EventKind, FeedBatch};
pub use geo::{distance_between, distance_meters, GeoPoint, EARTH_RADIUS_M};
pub use ids::{EventId, OwnerId, RegionId, SubjectId};
pub use notify::{
    compose_breach, compose_change, AlertSink, AlertStream, ChannelSink, DeliveryError, DeliveryQueue,
    DispatchReport, Dispatchable, NotificationDispatcher, NotificationPayload, NotificationRecord,
};
pub use region::{Region, DEFAULT_RADIUS_M};
pub use registry::GeofenceRegistry;
pub use runtime::{EngineRuntime, RuntimeSignal};
pub use sample::LocationSample;
pub use store::{
    InMemoryNotificationLog, InMemoryRegionStore, NotificationLog, RegionChange, RegionStore, StorageError,
};
