//! Geofence registry.
//!
//! The registry is the single owner of region lifetime. The breach detector
//! never holds a reference into it; it evaluates against the cloned snapshot
//! returned by [`GeofenceRegistry::regions_for`].

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use tracing::debug;

use crate::error::{FenceError, FenceResult, ValidationError};
use crate::ids::{RegionId, SubjectId};
use crate::region::Region;
use crate::store::{RegionChange, RegionStore};

fn lock_err(context: &'static str) -> FenceError {
    FenceError::internal(format!("poisoned lock: {context}"))
}

#[derive(Debug, Default)]
struct RegistryState {
    by_id: HashMap<RegionId, Region>,
    by_subject: HashMap<SubjectId, HashSet<RegionId>>,
}

impl RegistryState {
    fn unindex(&mut self, region: &Region) {
        if let Some(set) = self.by_subject.get_mut(&region.subject) {
            set.remove(&region.id);
            if set.is_empty() {
                self.by_subject.remove(&region.subject);
            }
        }
    }

    fn insert(&mut self, region: Region) -> Option<Region> {
        let previous = self.by_id.remove(&region.id);
        if let Some(prev) = previous.as_ref() {
            self.unindex(prev);
        }
        self.by_subject
            .entry(region.subject.clone())
            .or_default()
            .insert(region.id.clone());
        self.by_id.insert(region.id.clone(), region);
        previous
    }

    fn remove(&mut self, id: &RegionId) -> Option<Region> {
        let removed = self.by_id.remove(id)?;
        self.unindex(&removed);
        Some(removed)
    }
}

/// Thread-safe set of restricted regions, indexed by subject.
#[derive(Debug, Default)]
pub struct GeofenceRegistry {
    state: RwLock<RegistryState>,
}

impl GeofenceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a region by id and returns the previous version.
    ///
    /// Upserting the same region twice leaves the registry unchanged.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidRegion` without touching the registry
    /// if the region fails [`Region::validate`].
    pub fn upsert_region(&self, region: Region) -> FenceResult<Option<Region>> {
        region.validate()?;
        let mut state = self.state.write().map_err(|_| lock_err("registry.upsert"))?;
        debug!(region = %region.id, subject = %region.subject, radius_m = region.radius_m, "region upserted");
        Ok(state.insert(region))
    }

    /// Removes a region. Absent ids are a no-op.
    pub fn remove_region(&self, id: &RegionId) -> FenceResult<Option<Region>> {
        let mut state = self.state.write().map_err(|_| lock_err("registry.remove"))?;
        let removed = state.remove(id);
        if removed.is_some() {
            debug!(region = %id, "region removed");
        }
        Ok(removed)
    }

    /// Snapshot of every region attached to `subject`, in no particular order.
    pub fn regions_for(&self, subject: &SubjectId) -> FenceResult<Vec<Region>> {
        let state = self.state.read().map_err(|_| lock_err("registry.regions_for"))?;
        let Some(ids) = state.by_subject.get(subject) else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().filter_map(|id| state.by_id.get(id).cloned()).collect())
    }

    /// Looks up a region by id.
    pub fn get(&self, id: &RegionId) -> FenceResult<Option<Region>> {
        let state = self.state.read().map_err(|_| lock_err("registry.get"))?;
        Ok(state.by_id.get(id).cloned())
    }

    /// Number of registered regions.
    pub fn len(&self) -> FenceResult<usize> {
        let state = self.state.read().map_err(|_| lock_err("registry.len"))?;
        Ok(state.by_id.len())
    }

    /// True if no region is registered.
    pub fn is_empty(&self) -> FenceResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Atomically replaces the full region set of `subject`.
    ///
    /// Every region must belong to `subject` and pass validation, otherwise
    /// nothing changes. Returns the ids that were dropped from the subject.
    pub fn replace_subject_regions(
        &self,
        subject: &SubjectId,
        regions: Vec<Region>,
    ) -> FenceResult<Vec<RegionId>> {
        for region in &regions {
            region.validate()?;
            if &region.subject != subject {
                return Err(ValidationError::InvalidRegion {
                    id: region.id.to_string(),
                    reason: format!("region belongs to '{}', not '{subject}'", region.subject),
                }
                .into());
            }
        }

        let mut state = self.state.write().map_err(|_| lock_err("registry.replace"))?;
        let incoming: HashSet<RegionId> = regions.iter().map(|r| r.id.clone()).collect();
        let stale: Vec<RegionId> = state
            .by_subject
            .get(subject)
            .map(|ids| ids.iter().filter(|id| !incoming.contains(*id)).cloned().collect())
            .unwrap_or_default();

        for id in &stale {
            state.remove(id);
        }
        for region in regions {
            state.insert(region);
        }

        debug!(subject = %subject, count = incoming.len(), dropped = stale.len(), "subject regions replaced");
        Ok(stale)
    }

    /// Applies one notification from the region collection.
    ///
    /// Returns the region version that was replaced or removed, if any.
    pub fn apply_change(&self, change: RegionChange) -> FenceResult<Option<Region>> {
        match change {
            RegionChange::Added { region } | RegionChange::Modified { region } => {
                self.upsert_region(region)
            }
            RegionChange::Removed { id } => self.remove_region(&id),
        }
    }

    /// Loads a subject's regions from the store, replacing what is registered.
    pub fn sync_from_store(
        &self,
        store: &dyn RegionStore,
        subject: &SubjectId,
    ) -> FenceResult<Vec<RegionId>> {
        let regions = store.list(subject)?;
        self.replace_subject_regions(subject, regions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::geo::GeoPoint;
    use crate::store::InMemoryRegionStore;

    fn region(id: &str, subject: &str) -> Region {
        Region::new(id, "parent", subject, "Mall", GeoPoint::new(1.0, 1.0).unwrap())
    }

    fn ids(regions: &[Region]) -> HashSet<String> {
        regions.iter().map(|r| r.id.to_string()).collect()
    }

    #[test]
    fn upsert_then_regions_for_includes_it() {
        let reg = GeofenceRegistry::new();
        reg.upsert_region(region("r1", "c1")).unwrap();
        let got = reg.regions_for(&SubjectId::from("c1")).unwrap();
        assert_eq!(ids(&got), HashSet::from(["r1".to_string()]));
    }

    #[test]
    fn remove_then_regions_for_excludes_it() {
        let reg = GeofenceRegistry::new();
        reg.upsert_region(region("r1", "c1")).unwrap();
        reg.upsert_region(region("r2", "c1")).unwrap();
        reg.remove_region(&RegionId::from("r1")).unwrap();
        let got = reg.regions_for(&SubjectId::from("c1")).unwrap();
        assert_eq!(ids(&got), HashSet::from(["r2".to_string()]));
    }

    #[test]
    fn remove_absent_is_noop() {
        let reg = GeofenceRegistry::new();
        assert!(reg.remove_region(&RegionId::from("ghost")).unwrap().is_none());
        assert!(reg.is_empty().unwrap());
    }

    #[test]
    fn upsert_is_idempotent_and_returns_previous() {
        let reg = GeofenceRegistry::new();
        let r = region("r1", "c1");
        assert!(reg.upsert_region(r.clone()).unwrap().is_none());
        assert_eq!(reg.upsert_region(r.clone()).unwrap(), Some(r));
        assert_eq!(reg.len().unwrap(), 1);
        assert_eq!(reg.regions_for(&SubjectId::from("c1")).unwrap().len(), 1);
    }

    #[test]
    fn invalid_region_is_rejected_without_mutation() {
        let reg = GeofenceRegistry::new();
        reg.upsert_region(region("r1", "c1")).unwrap();
        let bad = region("r1", "c1").with_radius(0.0);
        let err = reg.upsert_region(bad).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(reg.get(&RegionId::from("r1")).unwrap().unwrap().radius_m, 100.0);
    }

    #[test]
    fn upsert_moving_subject_reindexes() {
        let reg = GeofenceRegistry::new();
        reg.upsert_region(region("r1", "c1")).unwrap();
        reg.upsert_region(region("r1", "c2")).unwrap();
        assert!(reg.regions_for(&SubjectId::from("c1")).unwrap().is_empty());
        assert_eq!(reg.regions_for(&SubjectId::from("c2")).unwrap().len(), 1);
    }

    #[test]
    fn replace_subject_regions_reports_stale() {
        let reg = GeofenceRegistry::new();
        reg.upsert_region(region("r1", "c1")).unwrap();
        reg.upsert_region(region("r2", "c1")).unwrap();
        reg.upsert_region(region("other", "c2")).unwrap();

        let stale = reg
            .replace_subject_regions(&SubjectId::from("c1"), vec![region("r2", "c1"), region("r3", "c1")])
            .unwrap();
        assert_eq!(stale, vec![RegionId::from("r1")]);
        let got = reg.regions_for(&SubjectId::from("c1")).unwrap();
        assert_eq!(ids(&got), HashSet::from(["r2".to_string(), "r3".to_string()]));
        assert_eq!(reg.regions_for(&SubjectId::from("c2")).unwrap().len(), 1);
    }

    #[test]
    fn replace_rejects_foreign_region() {
        let reg = GeofenceRegistry::new();
        reg.upsert_region(region("r1", "c1")).unwrap();
        let err = reg
            .replace_subject_regions(&SubjectId::from("c1"), vec![region("x", "c2")])
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(reg.regions_for(&SubjectId::from("c1")).unwrap().len(), 1);
    }

    #[test]
    fn apply_change_and_store_sync() {
        let reg = GeofenceRegistry::new();
        reg.apply_change(RegionChange::Added { region: region("r1", "c1") }).unwrap();
        reg.apply_change(RegionChange::Modified {
            region: region("r1", "c1").with_radius(250.0),
        })
        .unwrap();
        assert_eq!(reg.get(&RegionId::from("r1")).unwrap().unwrap().radius_m, 250.0);
        reg.apply_change(RegionChange::Removed { id: RegionId::from("r1") }).unwrap();
        assert!(reg.is_empty().unwrap());

        let store = InMemoryRegionStore::new();
        store.put(region("s1", "c1")).unwrap();
        store.put(region("s2", "c1")).unwrap();
        reg.upsert_region(region("old", "c1")).unwrap();
        let stale = reg.sync_from_store(&store, &SubjectId::from("c1")).unwrap();
        assert_eq!(stale, vec![RegionId::from("old")]);
        assert_eq!(reg.len().unwrap(), 2);
    }
}
