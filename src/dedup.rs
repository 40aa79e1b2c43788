//! Change-feed de-duplication.
//!
//! A live query replays every matching record when it connects and again on
//! every reconnect, and the same collection is often watched by more than one
//! listener. The deduplicator keeps a session-wide seen-set so each record id
//! notifies at most once, and a session-start gate so the replay on first
//! connect does not flood the user with history.
//!
//! The seen-set is not persisted. After a restart, records stamped after the
//! new session start that were already notified in the previous session will
//! notify again.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::feed::{ChangeEvent, FeedBatch};
use crate::ids::EventId;

/// Outcome of offering one record to the deduplicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Admission {
    /// First sighting of a record created during this session: notify.
    Fresh,
    /// Already seen in this session.
    Duplicate,
    /// First sighting, but the record predates the session: baseline only.
    Historical,
}

impl Admission {
    /// True if the record should be notified.
    #[must_use]
    pub const fn is_fresh(self) -> bool {
        matches!(self, Self::Fresh)
    }
}

/// Session-scoped, first-observer-wins record filter.
#[derive(Debug)]
pub struct EventDeduplicator {
    session_start: DateTime<Utc>,
    seen: Mutex<HashSet<EventId>>,
    suppressed: AtomicU64,
}

impl EventDeduplicator {
    /// Creates a deduplicator for a session that started at `session_start`.
    #[must_use]
    pub fn new(session_start: DateTime<Utc>) -> Self {
        Self {
            session_start,
            seen: Mutex::new(HashSet::new()),
            suppressed: AtomicU64::new(0),
        }
    }

    /// Creates a deduplicator for a session starting now.
    #[must_use]
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// Start of the listening session.
    #[must_use]
    pub const fn session_start(&self) -> DateTime<Utc> {
        self.session_start
    }

    /// Marks `id` seen. Returns true only for the first call with that id.
    ///
    /// The check and the insert happen under one lock, so concurrent callers
    /// racing on the same id get exactly one `true` between them.
    pub fn observe_id(&self, id: &EventId) -> bool {
        // Poison only means another observer panicked; the set itself is intact.
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        seen.insert(id.clone())
    }

    /// Marks `event` seen. Returns true only for the first observation of its id.
    pub fn observe(&self, event: &ChangeEvent) -> bool {
        self.observe_id(&event.id)
    }

    /// Marks a snapshot of existing records as already processed.
    ///
    /// Returns how many ids were new.
    pub fn seed_baseline<'a, I>(&self, events: I) -> usize
    where
        I: IntoIterator<Item = &'a ChangeEvent>,
    {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        events
            .into_iter()
            .filter(|ev| seen.insert(ev.id.clone()))
            .count()
    }

    /// Observes `event` and applies the session-start gate.
    ///
    /// A record is alertable only if this is its first observation and it
    /// was stamped strictly after the session started.
    pub fn admit(&self, event: &ChangeEvent) -> Admission {
        if !self.observe(event) {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            return Admission::Duplicate;
        }
        if event.timestamp() <= self.session_start {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            return Admission::Historical;
        }
        Admission::Fresh
    }

    /// Returns the records of `batch` that should notify.
    ///
    /// The replay batch delivered on connect goes through the session-start
    /// gate. Live batches are additions made while listening, so every id not
    /// seen before is fresh regardless of the sender's clock.
    pub fn ingest(&self, batch: &FeedBatch) -> Vec<ChangeEvent> {
        let mut fresh = Vec::new();
        for event in &batch.changes {
            let admission = if batch.initial {
                self.admit(event)
            } else if self.observe(event) {
                Admission::Fresh
            } else {
                self.suppressed.fetch_add(1, Ordering::Relaxed);
                Admission::Duplicate
            };

            match admission {
                Admission::Fresh => fresh.push(event.clone()),
                other => {
                    debug!(event_id = %event.id, kind = %event.kind, admission = ?other, "change suppressed");
                }
            }
        }
        fresh
    }

    /// Number of distinct ids seen this session.
    #[must_use]
    pub fn seen_count(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Number of records suppressed as duplicate or historical.
    #[must_use]
    pub fn suppressed(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }
}
