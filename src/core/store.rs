//! In-memory tables with per-row async locks.
//!
//! Reads of committed records never block: they clone out of the `DashMap`
//! without touching the row lock. Mutating workflows take the row's
//! `tokio::sync::Mutex` first, re-read the committed record under it, and
//! hold the guard until their changes are journaled and applied. Row lock
//! acquisition is bounded; a timeout surfaces as a retryable storage error.

use std::cmp::Reverse;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;
use ulid::Ulid;

use crate::core::CoreError;
use crate::model::{
    BookingRecord, ChangeEvent, EventRecord, WaitlistEntry, WaitlistStatus,
};

struct Row<T> {
    record: T,
    lock: Arc<Mutex<()>>,
}

impl<T> Row<T> {
    fn new(record: T) -> Self {
        Row {
            record,
            lock: Arc::new(Mutex::new(())),
        }
    }
}

/// A committed record read under its row lock. Dropping the guard releases
/// the lock; the `record` field is a snapshot taken after acquisition, so
/// it reflects every commit that happened while the caller was waiting.
#[derive(Debug)]
pub struct RowGuard<T> {
    pub record: T,
    _lease: OwnedMutexGuard<()>,
}

pub struct InventoryStore {
    events: DashMap<Ulid, Row<EventRecord>>,
    bookings: DashMap<Ulid, Row<BookingRecord>>,
    waitlist: DashMap<Ulid, Row<WaitlistEntry>>,
    bookings_by_event: DashMap<Ulid, Vec<Ulid>>,
    waitlist_by_event: DashMap<Ulid, Vec<Ulid>>,
    row_lock_wait: Duration,
}

impl InventoryStore {
    pub fn new(row_lock_wait: Duration) -> Self {
        InventoryStore {
            events: DashMap::new(),
            bookings: DashMap::new(),
            waitlist: DashMap::new(),
            bookings_by_event: DashMap::new(),
            waitlist_by_event: DashMap::new(),
            row_lock_wait,
        }
    }

    // Snapshot reads: committed state, never blocked by row locks.

    pub fn get_event(&self, id: &Ulid) -> Option<EventRecord> {
        self.events.get(id).map(|row| row.record.clone())
    }

    pub fn get_booking(&self, id: &Ulid) -> Option<BookingRecord> {
        self.bookings.get(id).map(|row| row.record.clone())
    }

    pub fn get_waitlist_entry(&self, id: &Ulid) -> Option<WaitlistEntry> {
        self.waitlist.get(id).map(|row| row.record.clone())
    }

    // Row locks.

    async fn lock_row<T: Clone>(
        table: &DashMap<Ulid, Row<T>>,
        id: &Ulid,
        kind: &'static str,
        wait: Duration,
    ) -> Result<RowGuard<T>, CoreError> {
        let lock = table
            .get(id)
            .map(|row| Arc::clone(&row.lock))
            .ok_or(CoreError::NotFound { kind, id: *id })?;
        let lease = timeout(wait, lock.lock_owned()).await.map_err(|_| {
            CoreError::Storage {
                retryable: true,
                message: format!("timed out waiting for row lock on {kind} {id}"),
            }
        })?;
        // Re-read after acquisition: the record may have been rewritten
        // while we waited.
        let record = table
            .get(id)
            .map(|row| row.record.clone())
            .ok_or(CoreError::NotFound { kind, id: *id })?;
        Ok(RowGuard {
            record,
            _lease: lease,
        })
    }

    pub async fn lock_event(&self, id: &Ulid) -> Result<RowGuard<EventRecord>, CoreError> {
        Self::lock_row(&self.events, id, "Event", self.row_lock_wait).await
    }

    pub async fn lock_booking(&self, id: &Ulid) -> Result<RowGuard<BookingRecord>, CoreError> {
        Self::lock_row(&self.bookings, id, "Booking", self.row_lock_wait).await
    }

    pub async fn lock_waitlist_entry(
        &self,
        id: &Ulid,
    ) -> Result<RowGuard<WaitlistEntry>, CoreError> {
        Self::lock_row(&self.waitlist, id, "Waiting list entry", self.row_lock_wait).await
    }

    // Aggregates over committed state.

    /// Sum of tickets across pending and confirmed bookings for an event.
    /// This is the authoritative booked count; the event row's counters are
    /// derived from it at commit time.
    pub fn sum_active_booking_tickets(&self, event_id: &Ulid) -> u64 {
        let Some(ids) = self.bookings_by_event.get(event_id) else {
            return 0;
        };
        ids.iter()
            .filter_map(|id| self.bookings.get(id))
            .filter(|row| row.record.status.is_active())
            .map(|row| u64::from(row.record.number_of_tickets))
            .sum()
    }

    pub fn bookings_for_event(&self, event_id: &Ulid) -> Vec<BookingRecord> {
        let Some(ids) = self.bookings_by_event.get(event_id) else {
            return Vec::new();
        };
        let mut rows: Vec<BookingRecord> = ids
            .iter()
            .filter_map(|id| self.bookings.get(id))
            .map(|row| row.record.clone())
            .collect();
        rows.sort_by_key(|b| (b.created_at, b.id));
        rows
    }

    /// Waiting-list entries for an event, optionally filtered by status,
    /// in scheduling order: priority descending, then oldest first.
    pub fn waitlist_for_event(
        &self,
        event_id: &Ulid,
        status: Option<WaitlistStatus>,
    ) -> Vec<WaitlistEntry> {
        let Some(ids) = self.waitlist_by_event.get(event_id) else {
            return Vec::new();
        };
        let mut rows: Vec<WaitlistEntry> = ids
            .iter()
            .filter_map(|id| self.waitlist.get(id))
            .map(|row| row.record.clone())
            .filter(|entry| status.is_none_or(|s| entry.status == s))
            .collect();
        rows.sort_by_key(|e| (Reverse(e.priority), e.created_at, e.id));
        rows
    }

    pub fn max_priority(&self, event_id: &Ulid) -> u32 {
        let Some(ids) = self.waitlist_by_event.get(event_id) else {
            return 0;
        };
        ids.iter()
            .filter_map(|id| self.waitlist.get(id))
            .map(|row| row.record.priority)
            .max()
            .unwrap_or(0)
    }

    pub fn pending_entry_for_user(&self, event_id: &Ulid, user_id: &str) -> Option<WaitlistEntry> {
        let ids = self.waitlist_by_event.get(event_id)?;
        ids.iter()
            .filter_map(|id| self.waitlist.get(id))
            .find(|row| {
                row.record.status == WaitlistStatus::Pending && row.record.user_id == user_id
            })
            .map(|row| row.record.clone())
    }

    /// Lock every entry in the given status for an event, skipping rows
    /// whose lock is currently held by another task. Guards come back in
    /// scheduling order with their records re-read under the lock, so a row
    /// that changed status while we raced is dropped rather than returned
    /// stale.
    pub fn dequeue_waitlist(
        &self,
        event_id: &Ulid,
        status: WaitlistStatus,
    ) -> Vec<RowGuard<WaitlistEntry>> {
        let Some(ids) = self.waitlist_by_event.get(event_id) else {
            return Vec::new();
        };
        let candidates: Vec<(Ulid, Arc<Mutex<()>>)> = ids
            .iter()
            .filter_map(|id| self.waitlist.get(id))
            .filter(|row| row.record.status == status)
            .map(|row| (row.record.id, Arc::clone(&row.lock)))
            .collect();
        drop(ids);

        let mut guards = Vec::with_capacity(candidates.len());
        for (id, lock) in candidates {
            let Ok(lease) = lock.try_lock_owned() else {
                continue;
            };
            let Some(record) = self.get_waitlist_entry(&id) else {
                continue;
            };
            if record.status == status {
                guards.push(RowGuard {
                    record,
                    _lease: lease,
                });
            }
        }
        guards.sort_by_key(|g| (Reverse(g.record.priority), g.record.created_at, g.record.id));
        guards
    }

    // Mutation: driven by journaled change events — upserts, plus the
    // cascading remove for event deletion. Infallible; a change that
    // reached the journal is always applied.

    pub(crate) fn apply(&self, change: &ChangeEvent) {
        match change {
            ChangeEvent::EventCreated(event) | ChangeEvent::EventUpdated(event) => {
                Self::upsert(&self.events, event.id, event.clone());
            }
            ChangeEvent::EventDeleted(event) => {
                self.events.remove(&event.id);
                if let Some((_, ids)) = self.bookings_by_event.remove(&event.id) {
                    for id in ids {
                        self.bookings.remove(&id);
                    }
                }
                if let Some((_, ids)) = self.waitlist_by_event.remove(&event.id) {
                    for id in ids {
                        self.waitlist.remove(&id);
                    }
                }
            }
            ChangeEvent::BookingCreated(booking) | ChangeEvent::BookingCancelled(booking) => {
                if Self::upsert(&self.bookings, booking.id, booking.clone()) {
                    self.bookings_by_event
                        .entry(booking.event_id)
                        .or_default()
                        .push(booking.id);
                }
            }
            ChangeEvent::WaitlistAdded(entry) | ChangeEvent::WaitlistUpdated(entry) => {
                if Self::upsert(&self.waitlist, entry.id, entry.clone()) {
                    self.waitlist_by_event
                        .entry(entry.event_id)
                        .or_default()
                        .push(entry.id);
                }
            }
        }
    }

    /// Returns true if the row was newly inserted. Updates keep the
    /// existing row lock so guards held across the apply stay valid.
    fn upsert<T>(table: &DashMap<Ulid, Row<T>>, id: Ulid, record: T) -> bool {
        match table.entry(id) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().record = record;
                false
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Row::new(record));
                true
            }
        }
    }

    /// Full committed state as change events, events before the rows that
    /// reference them. Used to rebuild the journal during compaction.
    pub(crate) fn snapshot(&self) -> Vec<ChangeEvent> {
        let mut changes = Vec::new();
        for row in self.events.iter() {
            changes.push(ChangeEvent::EventCreated(row.record.clone()));
        }
        for row in self.bookings.iter() {
            changes.push(ChangeEvent::BookingCreated(row.record.clone()));
        }
        for row in self.waitlist.iter() {
            changes.push(ChangeEvent::WaitlistAdded(row.record.clone()));
        }
        changes
    }
}
