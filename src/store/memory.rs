//! In-memory collaborator backends.
//!
//! Thread-safe implementations of the storage traits, for embedded usage,
//! tests, and the replay binary.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use uuid::Uuid;

use crate::ids::{OwnerId, RegionId, SubjectId};
use crate::notify::NotificationRecord;
use crate::region::Region;

use super::traits::{NotificationLog, RegionStore, StorageError};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

#[derive(Debug, Default)]
struct RegionState {
    by_id: HashMap<RegionId, Region>,
    by_subject: HashMap<SubjectId, HashSet<RegionId>>,
}

/// Thread-safe in-memory region collection.
#[derive(Debug, Default)]
pub struct InMemoryRegionStore {
    state: RwLock<RegionState>,
}

impl InMemoryRegionStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RegionStore for InMemoryRegionStore {
    fn list(&self, subject: &SubjectId) -> Result<Vec<Region>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("region.list"))?;
        let Some(ids) = state.by_subject.get(subject) else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().filter_map(|id| state.by_id.get(id).cloned()).collect())
    }

    fn put(&self, region: Region) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("region.put"))?;
        if let Some(prev) = state.by_id.get(&region.id).cloned() {
            if prev.subject != region.subject {
                if let Some(set) = state.by_subject.get_mut(&prev.subject) {
                    set.remove(&prev.id);
                }
            }
        }
        state
            .by_subject
            .entry(region.subject.clone())
            .or_default()
            .insert(region.id.clone());
        state.by_id.insert(region.id.clone(), region);
        Ok(())
    }

    fn delete(&self, id: &RegionId) -> Result<Region, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("region.delete"))?;
        let removed = state
            .by_id
            .remove(id)
            .ok_or_else(|| StorageError::RegionNotFound(id.clone()))?;
        if let Some(set) = state.by_subject.get_mut(&removed.subject) {
            set.remove(id);
            if set.is_empty() {
                state.by_subject.remove(&removed.subject);
            }
        }
        Ok(removed)
    }
}

#[derive(Debug, Default)]
struct LogState {
    ids: HashSet<Uuid>,
    by_parent: HashMap<OwnerId, Vec<NotificationRecord>>,
    total: usize,
}

/// Thread-safe in-memory notification-record collection.
#[derive(Debug, Default)]
pub struct InMemoryNotificationLog {
    state: RwLock<LogState>,
}

impl InMemoryNotificationLog {
    /// Create a new empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl NotificationLog for InMemoryNotificationLog {
    fn append(&self, record: NotificationRecord) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("log.append"))?;
        if !state.ids.insert(record.id) {
            return Err(StorageError::DuplicateKey(record.id.to_string()));
        }
        state.by_parent.entry(record.parent.clone()).or_default().push(record);
        state.total += 1;
        Ok(())
    }

    fn list_for_parent(&self, parent: &OwnerId) -> Result<Vec<NotificationRecord>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("log.list_for_parent"))?;
        let mut out = state.by_parent.get(parent).cloned().unwrap_or_default();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(out)
    }

    fn len(&self) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("log.len"))?;
        Ok(state.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{Duration, Utc};

    use crate::feed::EventKind;
    use crate::geo::GeoPoint;

    fn region(id: &str, subject: &str) -> Region {
        Region::new(id, "parent", subject, "Park", GeoPoint::new(10.0, 10.0).unwrap())
    }

    #[test]
    fn region_put_list_delete() {
        let store = InMemoryRegionStore::new();
        store.put(region("r1", "c1")).unwrap();
        store.put(region("r2", "c1")).unwrap();
        store.put(region("r3", "c2")).unwrap();

        let c1 = SubjectId::from("c1");
        assert_eq!(store.list(&c1).unwrap().len(), 2);

        let removed = store.delete(&RegionId::from("r1")).unwrap();
        assert_eq!(removed.id, RegionId::from("r1"));
        assert_eq!(
            store.delete(&RegionId::from("r1")),
            Err(StorageError::RegionNotFound(RegionId::from("r1")))
        );
        assert_eq!(store.list(&c1).unwrap().len(), 1);
    }

    #[test]
    fn region_put_moves_subject_index() {
        let store = InMemoryRegionStore::new();
        store.put(region("r1", "c1")).unwrap();
        store.put(region("r1", "c2")).unwrap();
        assert!(store.list(&SubjectId::from("c1")).unwrap().is_empty());
        assert_eq!(store.list(&SubjectId::from("c2")).unwrap().len(), 1);
    }

    #[test]
    fn log_lists_newest_first_and_rejects_duplicates() {
        let log = InMemoryNotificationLog::new();
        let t0 = Utc::now();
        let older = NotificationRecord::new(
            "parent",
            "child",
            "Sam",
            EventKind::Login,
            t0 - Duration::minutes(5),
        );
        let newer = NotificationRecord::new("parent", "child", "Sam", EventKind::Logout, t0);
        let other = NotificationRecord::new("someone-else", "child", "Sam", EventKind::Login, t0);

        log.append(older.clone()).unwrap();
        log.append(newer.clone()).unwrap();
        log.append(other).unwrap();
        assert!(matches!(log.append(older.clone()), Err(StorageError::DuplicateKey(_))));

        let listed = log.list_for_parent(&OwnerId::from("parent")).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, newer.id);
        assert_eq!(listed[1].id, older.id);
        assert_eq!(log.len().unwrap(), 3);
        assert!(!log.is_empty().unwrap());
    }
}
