//! Breach detection.
//!
//! Each (subject, region) pair is a two-state machine, `Outside` and
//! `Inside`. A sample inside a region whose pair is `Outside` emits one
//! [`BreachEvent`] and flips the pair to `Inside`. A sample outside flips it
//! back silently. Staying inside never re-alerts; leaving and coming back
//! does, immediately, with no cooldown.
//!
//! State lives in memory only. After a restart every pair starts `Outside`,
//! so a subject already inside a region alerts once more on its first sample.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{FenceError, FenceResult};
use crate::ids::{RegionId, SubjectId};
use crate::region::Region;
use crate::registry::GeofenceRegistry;
use crate::sample::LocationSample;

fn lock_err(context: &'static str) -> FenceError {
    FenceError::internal(format!("poisoned lock: {context}"))
}

/// Position of a subject relative to one region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FenceState {
    /// Outside, or never observed.
    #[default]
    Outside,
    Inside,
}

/// A subject entered a region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreachEvent {
    /// Subject that entered.
    pub subject: SubjectId,
    /// Region as it was when the sample was evaluated.
    pub region: Region,
    /// The sample that triggered the entry.
    pub sample: LocationSample,
    /// Distance from the region center, in meters.
    pub distance_m: f64,
    /// Wall-clock time of the evaluation.
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct SubjectTrack {
    inside: HashSet<RegionId>,
    latest: Option<LocationSample>,
}

impl SubjectTrack {
    fn remember(&mut self, sample: &LocationSample) {
        let newer = self
            .latest
            .as_ref()
            .map_or(true, |prev| sample.captured_at >= prev.captured_at);
        if newer {
            self.latest = Some(sample.clone());
        }
    }
}

/// Per-subject breach state machine.
///
/// Every subject has its own mutex, held for the whole evaluation of one
/// sample, so two samples of the same subject can never both observe
/// `Outside` for the same region.
#[derive(Debug, Default)]
pub struct BreachDetector {
    subjects: RwLock<HashMap<SubjectId, Arc<Mutex<SubjectTrack>>>>,
    dropped_samples: AtomicU64,
}

impl BreachDetector {
    /// Creates a detector with every pair `Outside`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn track(&self, subject: &SubjectId) -> FenceResult<Arc<Mutex<SubjectTrack>>> {
        {
            let subjects = self.subjects.read().map_err(|_| lock_err("detector.track"))?;
            if let Some(track) = subjects.get(subject) {
                return Ok(Arc::clone(track));
            }
        }
        let mut subjects = self.subjects.write().map_err(|_| lock_err("detector.track"))?;
        Ok(Arc::clone(subjects.entry(subject.clone()).or_default()))
    }

    /// Evaluates one sample against a snapshot of the subject's regions.
    ///
    /// Every region is checked independently, so a point inside several
    /// overlapping regions yields one event per region that was `Outside`.
    /// Regions belonging to another subject are skipped.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::MalformedSample` (and counts the drop) if the
    /// sample has no usable coordinate. No state is modified in that case.
    pub fn evaluate(
        &self,
        sample: &LocationSample,
        regions: &[Region],
    ) -> FenceResult<Vec<BreachEvent>> {
        self.evaluate_with(sample, |_| Ok(regions))
    }

    /// Evaluates a sample against the registry's current regions for its subject.
    ///
    /// The snapshot is read while the subject's track is locked. A region
    /// removed or reshaped concurrently is either seen in its old form, with
    /// the state reset landing after this sample, or not seen at all.
    pub fn evaluate_against(
        &self,
        sample: &LocationSample,
        registry: &GeofenceRegistry,
    ) -> FenceResult<Vec<BreachEvent>> {
        self.evaluate_with(sample, |subject| registry.regions_for(subject))
    }

    fn evaluate_with<F, R>(&self, sample: &LocationSample, snapshot: F) -> FenceResult<Vec<BreachEvent>>
    where
        F: FnOnce(&SubjectId) -> FenceResult<R>,
        R: AsRef<[Region]>,
    {
        let point = match sample.checked_point() {
            Ok(p) => p,
            Err(err) => {
                self.dropped_samples.fetch_add(1, Ordering::Relaxed);
                warn!(subject = %sample.subject, error = %err, "dropping malformed location sample");
                return Err(err.into());
            }
        };

        let track = self.track(&sample.subject)?;
        let mut track = track.lock().map_err(|_| lock_err("detector.evaluate"))?;
        let regions = snapshot(&sample.subject)?;

        let now = Utc::now();
        let mut events = Vec::new();
        for region in regions.as_ref() {
            if region.subject != sample.subject {
                continue;
            }

            let distance_m = region.distance_from_center(point);
            if distance_m <= region.radius_m {
                if track.inside.insert(region.id.clone()) {
                    info!(
                        subject = %sample.subject,
                        region = %region.id,
                        distance_m,
                        radius_m = region.radius_m,
                        "restricted region entered"
                    );
                    events.push(BreachEvent {
                        subject: sample.subject.clone(),
                        region: region.clone(),
                        sample: sample.clone(),
                        distance_m,
                        detected_at: now,
                    });
                }
            } else if track.inside.remove(&region.id) {
                debug!(subject = %sample.subject, region = %region.id, distance_m, "restricted region left");
            }
        }

        track.remember(sample);
        Ok(events)
    }

    /// Current state of one (subject, region) pair.
    pub fn state_of(&self, subject: &SubjectId, region: &RegionId) -> FenceResult<FenceState> {
        let subjects = self.subjects.read().map_err(|_| lock_err("detector.state_of"))?;
        let Some(track) = subjects.get(subject) else {
            return Ok(FenceState::Outside);
        };
        let track = track.lock().map_err(|_| lock_err("detector.state_of"))?;
        Ok(if track.inside.contains(region) {
            FenceState::Inside
        } else {
            FenceState::Outside
        })
    }

    /// The most recently captured sample seen for `subject`.
    ///
    /// Late-arriving older samples are still evaluated but never replace a
    /// newer one here.
    pub fn last_known_location(&self, subject: &SubjectId) -> FenceResult<Option<LocationSample>> {
        let subjects = self.subjects.read().map_err(|_| lock_err("detector.last_known"))?;
        let Some(track) = subjects.get(subject) else {
            return Ok(None);
        };
        let track = track.lock().map_err(|_| lock_err("detector.last_known"))?;
        Ok(track.latest.clone())
    }

    /// Resets every subject's state for `region` to `Outside`.
    ///
    /// Each track is locked in turn, so a sample evaluated concurrently
    /// either finishes before the reset or starts after it.
    pub fn forget_region(&self, region: &RegionId) -> FenceResult<()> {
        let subjects = self.subjects.read().map_err(|_| lock_err("detector.forget_region"))?;
        for track in subjects.values() {
            let mut track = track.lock().map_err(|_| lock_err("detector.forget_region"))?;
            track.inside.remove(region);
        }
        Ok(())
    }

    /// Drops all state held for `subject`.
    pub fn forget_subject(&self, subject: &SubjectId) -> FenceResult<()> {
        let mut subjects = self.subjects.write().map_err(|_| lock_err("detector.forget_subject"))?;
        subjects.remove(subject);
        Ok(())
    }

    /// Malformed samples dropped so far.
    #[must_use]
    pub fn dropped_samples(&self) -> u64 {
        self.dropped_samples.load(Ordering::Relaxed)
    }
}
