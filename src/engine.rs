//! Engine façade.
//!
//! [`FenceEngine`] wires the pipeline together: location samples run through
//! the breach detector against the registry's current regions, change-feed
//! batches run through the deduplicator, and whatever survives is handed to
//! the notification dispatcher.
//!
//! The engine is synchronous and `Send + Sync`. For queued, sharded
//! processing wrap it in an [`EngineRuntime`](crate::runtime::EngineRuntime).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EngineConfig;
use crate::dedup::EventDeduplicator;
use crate::detector::BreachDetector;
use crate::error::FenceResult;
use crate::feed::{ChangeEvent, FeedBatch};
use crate::geo::GeoPoint;
use crate::ids::{OwnerId, RegionId, SubjectId};
use crate::notify::{AlertSink, DeliveryQueue, DispatchReport, Dispatchable, NotificationDispatcher};
use crate::region::Region;
use crate::registry::GeofenceRegistry;
use crate::sample::LocationSample;
use crate::store::{NotificationLog, RegionChange, RegionStore};

/// Point-in-time counters across the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Regions currently registered.
    pub regions: usize,
    /// Samples dropped for lacking a usable coordinate.
    pub dropped_samples: u64,
    /// Feed records marked processed this session.
    pub seen_events: usize,
    /// Feed records held back as replayed, stale or duplicate.
    pub suppressed_events: u64,
    /// Payloads the sink accepted.
    pub delivered: u64,
    /// Payloads the sink refused.
    pub failed_deliveries: u64,
    /// Payloads refused by the delivery queue because it was full or closed.
    pub queue_rejected: u64,
}

/// Geofence and notification pipeline for one listening session.
pub struct FenceEngine {
    config: EngineConfig,
    registry: GeofenceRegistry,
    detector: BreachDetector,
    dedup: EventDeduplicator,
    dispatcher: NotificationDispatcher,
    delivery: Option<Arc<DeliveryQueue>>,
    viewer: Option<SubjectId>,
}

impl FenceEngine {
    /// Creates an engine whose session started at `session_start`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` if `config` does not validate.
    pub fn new(
        config: EngineConfig,
        sink: Arc<dyn AlertSink>,
        log: Arc<dyn NotificationLog>,
        session_start: DateTime<Utc>,
    ) -> FenceResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            registry: GeofenceRegistry::new(),
            detector: BreachDetector::new(),
            dedup: EventDeduplicator::new(session_start),
            dispatcher: NotificationDispatcher::new(sink, log),
            delivery: None,
            viewer: None,
        })
    }

    /// Like [`FenceEngine::new`], but `sink` sits behind a [`DeliveryQueue`]
    /// of `config.delivery_queue_capacity` so dispatch never waits on it.
    ///
    /// A full queue shows up as a delivery failure in the dispatch report.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` if `config` does not validate.
    pub fn with_delivery_queue(
        config: EngineConfig,
        sink: Arc<dyn AlertSink>,
        log: Arc<dyn NotificationLog>,
        session_start: DateTime<Utc>,
    ) -> FenceResult<Self> {
        config.validate()?;
        let queue = Arc::new(DeliveryQueue::start(sink, config.delivery_queue_capacity));
        let mut engine = Self::new(config, queue.clone(), log, session_start)?;
        engine.delivery = Some(queue);
        Ok(engine)
    }

    /// Only notify about feed records addressed to `viewer`.
    #[must_use]
    pub fn with_viewer(mut self, viewer: impl Into<SubjectId>) -> Self {
        self.viewer = Some(viewer.into());
        self
    }

    /// Configuration the engine was built with.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Regions currently in force.
    #[must_use]
    pub const fn registry(&self) -> &GeofenceRegistry {
        &self.registry
    }

    /// Per-subject breach state.
    #[must_use]
    pub const fn detector(&self) -> &BreachDetector {
        &self.detector
    }

    /// Feed record deduplication state.
    #[must_use]
    pub const fn deduplicator(&self) -> &EventDeduplicator {
        &self.dedup
    }

    /// Payload composition and delivery counters.
    #[must_use]
    pub const fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    /// The delivery queue in front of the sink, if the engine was built with one.
    #[must_use]
    pub fn delivery_queue(&self) -> Option<&DeliveryQueue> {
        self.delivery.as_deref()
    }

    /// Flushes and stops the delivery queue. No-op without one.
    ///
    /// Breaches dispatched afterwards fail with `DeliveryError::Closed`.
    pub fn close_delivery(&self) {
        if let Some(queue) = self.delivery.as_ref() {
            queue.close();
        }
    }

    /// Builds a region with the configured default radius.
    #[must_use]
    pub fn region(
        &self,
        id: impl Into<RegionId>,
        owner: impl Into<OwnerId>,
        subject: impl Into<SubjectId>,
        label: impl Into<String>,
        center: GeoPoint,
    ) -> Region {
        Region::new(id, owner, subject, label, center).with_radius(self.config.default_radius_m)
    }

    /// Inserts or replaces a region.
    ///
    /// A new id, or a replacement with a different subject, center or radius,
    /// starts `Outside` for everyone. A relabel keeps the current state.
    pub fn upsert_region(&self, region: Region) -> FenceResult<Option<Region>> {
        let previous = self.registry.upsert_region(region.clone())?;
        match previous.as_ref() {
            Some(prev) if prev.same_geometry(&region) => {}
            Some(_) => {
                debug!(region = %region.id, "region reshaped; resetting breach state");
                self.detector.forget_region(&region.id)?;
            }
            None => self.detector.forget_region(&region.id)?,
        }
        Ok(previous)
    }

    /// Removes a region and the breach state held for it.
    pub fn remove_region(&self, id: &RegionId) -> FenceResult<Option<Region>> {
        let removed = self.registry.remove_region(id)?;
        if removed.is_some() {
            self.detector.forget_region(id)?;
        }
        Ok(removed)
    }

    /// Applies an add / modify / remove notification from the region store.
    pub fn apply_region_change(&self, change: RegionChange) -> FenceResult<Option<Region>> {
        match change {
            RegionChange::Added { region } | RegionChange::Modified { region } => {
                self.upsert_region(region)
            }
            RegionChange::Removed { id } => self.remove_region(&id),
        }
    }

    /// Replaces `subject`'s regions with what `store` lists for it.
    ///
    /// Returns the ids that disappeared. Breach state is dropped for those
    /// and for any region whose geometry changed.
    pub fn sync_regions(&self, store: &dyn RegionStore, subject: &SubjectId) -> FenceResult<Vec<RegionId>> {
        let before = self.registry.regions_for(subject)?;
        let stale = self.registry.sync_from_store(store, subject)?;

        for id in &stale {
            self.detector.forget_region(id)?;
        }
        for old in before.iter().filter(|r| !stale.contains(&r.id)) {
            match self.registry.get(&old.id)? {
                Some(current) if current.same_geometry(old) => {}
                _ => self.detector.forget_region(&old.id)?,
            }
        }
        Ok(stale)
    }

    /// Evaluates one location sample and dispatches any breaches.
    ///
    /// Delivery failures are collected in the report; they do not fail the
    /// call.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::MalformedSample` if the sample carries no
    /// usable coordinate. The sample is dropped and no state changes.
    pub fn handle_sample(&self, sample: &LocationSample) -> FenceResult<DispatchReport> {
        let events = self.detector.evaluate_against(sample, &self.registry)?;
        if events.is_empty() {
            return Ok(DispatchReport::default());
        }
        Ok(self
            .dispatcher
            .dispatch_all(events.into_iter().map(Dispatchable::from)))
    }

    /// Handles one live record from a change feed.
    pub fn handle_change(&self, event: ChangeEvent) -> DispatchReport {
        self.handle_feed_batch(&FeedBatch::live(vec![event]))
    }

    /// De-duplicates a feed batch and dispatches the fresh records.
    ///
    /// With a viewer set, records addressed to anyone else are skipped
    /// without being marked seen.
    pub fn handle_feed_batch(&self, batch: &FeedBatch) -> DispatchReport {
        let fresh = match self.viewer.as_ref() {
            Some(viewer) => {
                let changes: Vec<ChangeEvent> = batch
                    .changes
                    .iter()
                    .filter(|ev| {
                        let mine = ev.is_for(viewer);
                        if !mine {
                            debug!(event_id = %ev.id, recipient = %ev.payload.recipient, "change not addressed to viewer");
                        }
                        mine
                    })
                    .cloned()
                    .collect();
                self.dedup.ingest(&FeedBatch {
                    initial: batch.initial,
                    changes,
                })
            }
            None => self.dedup.ingest(batch),
        };

        self.dispatcher
            .dispatch_all(fresh.into_iter().map(Dispatchable::from))
    }

    /// Marks existing records as already processed without notifying.
    pub fn seed_baseline<'a, I>(&self, events: I) -> usize
    where
        I: IntoIterator<Item = &'a ChangeEvent>,
    {
        self.dedup.seed_baseline(events)
    }

    /// Most recent sample seen for `subject`, by capture time.
    pub fn last_known_location(&self, subject: &SubjectId) -> FenceResult<Option<LocationSample>> {
        self.detector.last_known_location(subject)
    }

    /// Display name used for `subject` in breach alerts.
    pub fn set_subject_name(&self, subject: impl Into<SubjectId>, name: impl Into<String>) -> FenceResult<()> {
        self.dispatcher.set_subject_name(subject.into(), name)
    }

    /// Snapshot of the pipeline counters.
    pub fn stats(&self) -> FenceResult<EngineStats> {
        Ok(EngineStats {
            regions: self.registry.len()?,
            dropped_samples: self.detector.dropped_samples(),
            seen_events: self.dedup.seen_count(),
            suppressed_events: self.dedup.suppressed(),
            delivered: self.dispatcher.delivered(),
            failed_deliveries: self.dispatcher.failed(),
            queue_rejected: self.delivery.as_ref().map_or(0, |q| q.rejected()),
        })
    }
}
